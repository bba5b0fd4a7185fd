use super::{IndexSpec, RecordStore, StoreError};
use crate::config::Environment;

/// Bring the collection and its expiring index to the expected shape.
///
/// Safe to run against a store that is already correct: in that case it only
/// reads. Must finish before the listener is bound.
pub async fn ensure_schema(store: &impl RecordStore) -> Result<(), StoreError> {
    if store.collection_exists().await? {
        tracing::debug!("request collection present");
    } else {
        store.create_collection().await?;
        tracing::info!("created request collection with validator");
    }

    let indexes = store.list_indexes().await?;
    let on_date: Vec<&IndexSpec> = indexes
        .iter()
        .filter(|index| index.field == super::REQUEST_DATE_FIELD)
        .collect();

    let keep = on_date.iter().position(|index| index.is_canonical());

    for (i, index) in on_date.iter().enumerate() {
        if Some(i) == keep {
            continue;
        }
        tracing::info!(
            index = %index.name,
            ascending = index.ascending,
            expire_after_secs = index.expire_after.map(|d| d.as_secs()),
            "dropping non-canonical requestDate index"
        );
        store.drop_index(&index.name).await?;
    }

    if keep.is_none() {
        store.create_expiring_index().await?;
        tracing::info!(
            ttl_secs = super::RECORD_TTL.as_secs(),
            "created expiring requestDate index"
        );
    }

    Ok(())
}

/// Drop the collection (records and indexes) and recreate it from scratch.
/// Refused in production.
pub async fn reset(store: &impl RecordStore, environment: Environment) -> Result<(), StoreError> {
    if environment.is_production() {
        return Err(StoreError::Forbidden);
    }

    if store.collection_exists().await? {
        store.drop_collection().await?;
    }
    store.create_collection().await?;
    store.create_expiring_index().await?;

    tracing::info!("request collection reset");
    Ok(())
}
