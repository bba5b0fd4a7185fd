use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::store::memory::MemoryStore;

/// MongoDB's TTL monitor runs about once a minute; match it.
pub const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Spawn a background worker that purges expired records from the memory
/// store.
///
/// Lookups already skip expired records, so this only bounds memory use.
pub fn spawn_expiry_sweeper(
    store: MemoryStore,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(interval_secs = interval.as_secs(), "expiry sweeper started");

        loop {
            if *shutdown.borrow() {
                tracing::info!("expiry sweeper shutting down");
                return;
            }

            let removed = store.sweep_expired();
            if removed > 0 {
                tracing::debug!(removed, "expired records purged");
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {}
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::tests::attrs;
    use crate::store::{RecordStore, RequestRecord, bootstrap};
    use chrono::Utc;

    async fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        bootstrap::ensure_schema(&store).await.expect("schema");

        let attrs = attrs("Texto para teste!");
        let request = attrs.validate().expect("valid request");
        let record = RequestRecord::new(&request, "abc".to_string(), Utc::now());
        store.insert(&record).await.expect("insert");
        store
    }

    #[tokio::test]
    async fn purges_expired_records_then_stops_on_shutdown() {
        let store = seeded_store().await;
        store.advance(Duration::from_secs(601));

        let (tx, rx) = watch::channel(false);
        let handle = spawn_expiry_sweeper(store.clone(), Duration::from_millis(10), rx);

        for _ in 0..100 {
            if store.record_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(store.record_count(), 0);

        tx.send(true).expect("sweeper still listening");
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper exits after shutdown")
            .expect("sweeper task did not panic");
    }

    #[tokio::test]
    async fn leaves_live_records_alone() {
        let store = seeded_store().await;

        let (tx, rx) = watch::channel(false);
        let handle = spawn_expiry_sweeper(store.clone(), Duration::from_millis(10), rx);
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(store.record_count(), 1);

        tx.send(true).expect("sweeper still listening");
        handle.await.expect("sweeper task did not panic");
    }
}
