pub mod bootstrap;
pub mod memory;
pub mod mongo;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{Config, StoreBackend};
use crate::fingerprint::ValidatedRequest;
use memory::MemoryStore;
use mongo::MongoStore;

pub const COLLECTION_NAME: &str = "request";
pub const REQUEST_HASH_FIELD: &str = "requestHash";
pub const REQUEST_DATE_FIELD: &str = "requestDate";

/// Records older than this are removed by the store and no longer count as
/// duplicates.
pub const RECORD_TTL: Duration = Duration::from_secs(600);

/// One accepted request, as persisted in the `request` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub request_hash: String,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub request_date: DateTime<Utc>,
    pub host: String,
    pub content_type_mime: String,
    pub content_length: i64,
    pub endpoint: String,
    pub http_verb: String,
}

impl RequestRecord {
    pub fn new(request: &ValidatedRequest<'_>, request_hash: String, at: DateTime<Utc>) -> Self {
        Self {
            request_hash,
            request_date: at,
            host: request.host.to_string(),
            content_type_mime: request.content_type.to_string(),
            content_length: i64::try_from(request.body.len()).unwrap_or(i64::MAX),
            endpoint: request.path.to_string(),
            http_verb: request.method.to_string(),
        }
    }
}

/// Backend-neutral view of an index definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    /// First key of the index.
    pub field: String,
    pub ascending: bool,
    pub expire_after: Option<Duration>,
}

impl IndexSpec {
    /// The single ascending 600s expiring index on `requestDate`.
    pub fn expiring() -> Self {
        Self {
            name: format!("{REQUEST_DATE_FIELD}_1"),
            field: REQUEST_DATE_FIELD.to_string(),
            ascending: true,
            expire_after: Some(RECORD_TTL),
        }
    }

    pub fn is_canonical(&self) -> bool {
        self.field == REQUEST_DATE_FIELD && self.ascending && self.expire_after == Some(RECORD_TTL)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Connect,
    ListCollections,
    CreateCollection,
    DropCollection,
    ListIndexes,
    DropIndex,
    CreateIndex,
    Insert,
    Find,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StoreOp::Connect => "connect",
            StoreOp::ListCollections => "list collections",
            StoreOp::CreateCollection => "create collection",
            StoreOp::DropCollection => "drop collection",
            StoreOp::ListIndexes => "list indexes",
            StoreOp::DropIndex => "drop index",
            StoreOp::CreateIndex => "create index",
            StoreOp::Insert => "insert record",
            StoreOp::Find => "find records",
        };
        f.write_str(label)
    }
}

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{op} failed: {source}")]
    Backend {
        op: StoreOp,
        #[source]
        source: BoxError,
    },

    #[error("document rejected by collection validator: {0}")]
    SchemaViolation(String),

    #[error("reset is not allowed in production")]
    Forbidden,
}

impl StoreError {
    pub fn backend(op: StoreOp, source: impl Into<BoxError>) -> Self {
        StoreError::Backend {
            op,
            source: source.into(),
        }
    }
}

/// Primitive operations over the `request` collection. The schema policy
/// on top of them lives in [`bootstrap`].
pub trait RecordStore: Send + Sync {
    /// Clock the store judges expiry by. Records are stamped from it.
    fn now(&self) -> DateTime<Utc>;

    fn collection_exists(&self) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Create the collection with a validator requiring `requestHash`
    /// (string) and `requestDate` (date).
    fn create_collection(&self) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn drop_collection(&self) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn list_indexes(&self) -> impl Future<Output = Result<Vec<IndexSpec>, StoreError>> + Send;

    fn drop_index(&self, name: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Create [`IndexSpec::expiring`].
    fn create_expiring_index(&self) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn insert(&self, record: &RequestRecord)
    -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Every unexpired record carrying `hash`. The expiring index does not
    /// make `requestHash` unique, so more than one may come back.
    fn find_by_fingerprint(
        &self,
        hash: &str,
    ) -> impl Future<Output = Result<Vec<RequestRecord>, StoreError>> + Send;
}

/// The configured backend.
#[derive(Clone)]
pub enum Store {
    Mongo(MongoStore),
    Memory(MemoryStore),
}

impl Store {
    /// Build the configured backend. For MongoDB this only parses the
    /// connection string and picks the database; the driver connects on the
    /// first operation, which is the schema bootstrap.
    pub async fn connect(config: &Config) -> Result<Self, StoreError> {
        match config.store_backend {
            StoreBackend::Memory => {
                if config.environment.is_production() {
                    tracing::warn!("memory store in production: records are lost on restart");
                }
                Ok(Store::Memory(MemoryStore::new()))
            }
            StoreBackend::Mongo => {
                let uri = config.mongodb_uri.as_deref().ok_or_else(|| {
                    StoreError::backend(StoreOp::Connect, "MONGODB_CONNSTRING is not set")
                })?;
                let options = MongoStore::parse_options(uri)
                    .await
                    .map_err(|e| StoreError::backend(StoreOp::Connect, e))?;
                let database = config.database_for(options.default_database.as_deref());
                let client = mongodb::Client::with_options(options)
                    .map_err(|e| StoreError::backend(StoreOp::Connect, e))?;

                let store = MongoStore::new(client, &database);
                tracing::info!(database = store.database_name(), "using MongoDB database");
                Ok(Store::Mongo(store))
            }
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Store::Mongo(_) => "mongodb",
            Store::Memory(_) => "memory",
        }
    }

    pub async fn shutdown(self) {
        if let Store::Mongo(mongo) = self {
            mongo.shutdown().await;
        }
    }
}

impl RecordStore for Store {
    fn now(&self) -> DateTime<Utc> {
        match self {
            Store::Mongo(s) => s.now(),
            Store::Memory(s) => s.now(),
        }
    }

    async fn collection_exists(&self) -> Result<bool, StoreError> {
        match self {
            Store::Mongo(s) => s.collection_exists().await,
            Store::Memory(s) => s.collection_exists().await,
        }
    }

    async fn create_collection(&self) -> Result<(), StoreError> {
        match self {
            Store::Mongo(s) => s.create_collection().await,
            Store::Memory(s) => s.create_collection().await,
        }
    }

    async fn drop_collection(&self) -> Result<(), StoreError> {
        match self {
            Store::Mongo(s) => s.drop_collection().await,
            Store::Memory(s) => s.drop_collection().await,
        }
    }

    async fn list_indexes(&self) -> Result<Vec<IndexSpec>, StoreError> {
        match self {
            Store::Mongo(s) => s.list_indexes().await,
            Store::Memory(s) => s.list_indexes().await,
        }
    }

    async fn drop_index(&self, name: &str) -> Result<(), StoreError> {
        match self {
            Store::Mongo(s) => s.drop_index(name).await,
            Store::Memory(s) => s.drop_index(name).await,
        }
    }

    async fn create_expiring_index(&self) -> Result<(), StoreError> {
        match self {
            Store::Mongo(s) => s.create_expiring_index().await,
            Store::Memory(s) => s.create_expiring_index().await,
        }
    }

    async fn insert(&self, record: &RequestRecord) -> Result<(), StoreError> {
        match self {
            Store::Mongo(s) => s.insert(record).await,
            Store::Memory(s) => s.insert(record).await,
        }
    }

    async fn find_by_fingerprint(&self, hash: &str) -> Result<Vec<RequestRecord>, StoreError> {
        match self {
            Store::Mongo(s) => s.find_by_fingerprint(hash).await,
            Store::Memory(s) => s.find_by_fingerprint(hash).await,
        }
    }
}

/// Whether a record with this fingerprint is still inside the window.
///
/// This is a plain read; a concurrent request with the same fingerprint can
/// pass the check before either insert lands.
pub async fn is_duplicate(store: &impl RecordStore, hash: &str) -> Result<bool, StoreError> {
    Ok(!store.find_by_fingerprint(hash).await?.is_empty())
}
