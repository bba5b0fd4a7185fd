//! In-process backend with the same collection/index/TTL model as the
//! MongoDB one. Used for local runs without a database and in tests.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use super::{IndexSpec, RecordStore, RequestRecord, StoreError, StoreOp};

const ID_INDEX: &str = "_id_";

struct Collection {
    validated: bool,
    indexes: Vec<IndexSpec>,
    records: Vec<RequestRecord>,
}

impl Collection {
    fn new(validated: bool) -> Self {
        Self {
            validated,
            indexes: vec![IndexSpec {
                name: ID_INDEX.to_string(),
                field: "_id".to_string(),
                ascending: true,
                expire_after: None,
            }],
            records: Vec::new(),
        }
    }

    /// TTL currently in force: the expiring index on `requestDate`, if any.
    fn ttl(&self) -> Option<chrono::Duration> {
        self.indexes
            .iter()
            .find(|i| i.field == super::REQUEST_DATE_FIELD && i.expire_after.is_some())
            .and_then(|i| i.expire_after)
            .and_then(|d| chrono::Duration::from_std(d).ok())
    }

    fn is_live(&self, record: &RequestRecord, now: DateTime<Utc>) -> bool {
        match self.ttl() {
            Some(ttl) => record.request_date + ttl > now,
            None => true,
        }
    }
}

#[derive(Default)]
struct State {
    collection: Option<Collection>,
    clock_offset: std::time::Duration,
    fail_on: Option<StoreOp>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(state: &State, op: StoreOp) -> Result<(), StoreError> {
        if state.fail_on == Some(op) {
            return Err(StoreError::backend(op, "injected failure"));
        }
        Ok(())
    }

    fn clock(state: &State) -> DateTime<Utc> {
        let offset =
            chrono::Duration::from_std(state.clock_offset).unwrap_or(chrono::Duration::zero());
        Utc::now() + offset
    }

    /// Remove every expired record. Returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let mut state = self.lock();
        let now = Self::clock(&state);
        let Some(collection) = state.collection.as_mut() else {
            return 0;
        };
        let Some(ttl) = collection.ttl() else {
            return 0;
        };
        let before = collection.records.len();
        collection.records.retain(|r| r.request_date + ttl > now);
        before - collection.records.len()
    }

    #[cfg(test)]
    pub fn advance(&self, by: std::time::Duration) {
        self.lock().clock_offset += by;
    }

    #[cfg(test)]
    pub fn fail_on(&self, op: StoreOp) {
        self.lock().fail_on = Some(op);
    }

    #[cfg(test)]
    pub fn put_index(&self, index: IndexSpec) {
        let mut state = self.lock();
        let collection = state.collection.get_or_insert_with(|| Collection::new(false));
        collection.indexes.push(index);
    }

    #[cfg(test)]
    pub fn has_validator(&self) -> bool {
        self.lock().collection.as_ref().is_some_and(|c| c.validated)
    }

    /// Stored records, expired ones included until swept.
    #[cfg(test)]
    pub fn record_count(&self) -> usize {
        self.lock()
            .collection
            .as_ref()
            .map_or(0, |c| c.records.len())
    }
}

impl RecordStore for MemoryStore {
    fn now(&self) -> DateTime<Utc> {
        Self::clock(&self.lock())
    }

    async fn collection_exists(&self) -> Result<bool, StoreError> {
        let state = self.lock();
        Self::check(&state, StoreOp::ListCollections)?;
        Ok(state.collection.is_some())
    }

    async fn create_collection(&self) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::check(&state, StoreOp::CreateCollection)?;
        if state.collection.is_some() {
            return Err(StoreError::backend(
                StoreOp::CreateCollection,
                format!("collection '{}' already exists", super::COLLECTION_NAME),
            ));
        }
        state.collection = Some(Collection::new(true));
        Ok(())
    }

    async fn drop_collection(&self) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::check(&state, StoreOp::DropCollection)?;
        state.collection = None;
        Ok(())
    }

    async fn list_indexes(&self) -> Result<Vec<IndexSpec>, StoreError> {
        let state = self.lock();
        Self::check(&state, StoreOp::ListIndexes)?;
        match &state.collection {
            Some(collection) => Ok(collection.indexes.clone()),
            None => Err(StoreError::backend(
                StoreOp::ListIndexes,
                format!("collection '{}' does not exist", super::COLLECTION_NAME),
            )),
        }
    }

    async fn drop_index(&self, name: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::check(&state, StoreOp::DropIndex)?;
        let collection = state.collection.as_mut().ok_or_else(|| {
            StoreError::backend(StoreOp::DropIndex, "collection does not exist")
        })?;
        let before = collection.indexes.len();
        collection.indexes.retain(|i| i.name != name);
        if collection.indexes.len() == before {
            return Err(StoreError::backend(
                StoreOp::DropIndex,
                format!("index not found with name [{name}]"),
            ));
        }
        Ok(())
    }

    async fn create_expiring_index(&self) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::check(&state, StoreOp::CreateIndex)?;
        let collection = state
            .collection
            .get_or_insert_with(|| Collection::new(false));
        let index = IndexSpec::expiring();
        if let Some(existing) = collection.indexes.iter().find(|i| i.name == index.name) {
            if *existing == index {
                return Ok(());
            }
            return Err(StoreError::backend(
                StoreOp::CreateIndex,
                format!("an index named {} exists with different options", index.name),
            ));
        }
        collection.indexes.push(index);
        Ok(())
    }

    async fn insert(&self, record: &RequestRecord) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::check(&state, StoreOp::Insert)?;
        let collection = state
            .collection
            .get_or_insert_with(|| Collection::new(false));
        if collection.validated && record.request_hash.is_empty() {
            return Err(StoreError::SchemaViolation(format!(
                "{} must be a non-empty string",
                super::REQUEST_HASH_FIELD
            )));
        }
        collection.records.push(record.clone());
        Ok(())
    }

    async fn find_by_fingerprint(&self, hash: &str) -> Result<Vec<RequestRecord>, StoreError> {
        let state = self.lock();
        Self::check(&state, StoreOp::Find)?;
        let now = Self::clock(&state);
        let Some(collection) = state.collection.as_ref() else {
            return Ok(Vec::new());
        };
        Ok(collection
            .records
            .iter()
            .filter(|r| r.request_hash == hash && collection.is_live(r, now))
            .cloned()
            .collect())
    }
}
