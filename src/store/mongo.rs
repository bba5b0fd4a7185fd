use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{Bson, Document, doc};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Collection, Database, IndexModel};

use super::{
    COLLECTION_NAME, IndexSpec, RECORD_TTL, REQUEST_DATE_FIELD, REQUEST_HASH_FIELD, RecordStore,
    RequestRecord, StoreError, StoreOp,
};

/// Server error code for a write rejected by the collection validator.
const DOCUMENT_VALIDATION_FAILURE: i32 = 121;

/// MongoDB-backed record store bound to one database.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    db: Database,
}

impl MongoStore {
    pub fn new(client: Client, database_name: &str) -> Self {
        let db = client.database(database_name);
        Self { client, db }
    }

    /// Parse the connection string without connecting. The driver connects
    /// lazily on the first operation.
    pub async fn parse_options(uri: &str) -> Result<ClientOptions, mongodb::error::Error> {
        ClientOptions::parse(uri).await
    }

    pub fn database_name(&self) -> &str {
        self.db.name()
    }

    fn records(&self) -> Collection<RequestRecord> {
        self.db.collection(COLLECTION_NAME)
    }

    pub async fn shutdown(self) {
        self.client.shutdown().await;
    }
}

/// `$jsonSchema` validator requiring the two fields the expiring index and
/// duplicate lookup depend on.
fn validator() -> Document {
    doc! {
        "$jsonSchema": {
            "bsonType": "object",
            "required": [REQUEST_HASH_FIELD, REQUEST_DATE_FIELD],
            "properties": {
                REQUEST_HASH_FIELD: {
                    "bsonType": "string",
                    "minLength": 1,
                    "description": "request fingerprint",
                },
                REQUEST_DATE_FIELD: {
                    "bsonType": "date",
                    "description": "acceptance time; drives the expiring index",
                },
            },
        }
    }
}

fn key_direction(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Int64(v) => Some(*v),
        Bson::Double(v) => Some(*v as i64),
        _ => None,
    }
}

fn index_spec(model: &IndexModel) -> Option<IndexSpec> {
    let (field, direction) = model.keys.iter().next()?;
    let options = model.options.as_ref();
    Some(IndexSpec {
        name: options
            .and_then(|o| o.name.clone())
            .unwrap_or_default(),
        field: field.clone(),
        ascending: key_direction(direction).is_some_and(|d| d > 0),
        expire_after: options.and_then(|o| o.expire_after),
    })
}

/// Records carrying `hash` that are still inside the window. The TTL
/// monitor only runs about once a minute, so expiry is also enforced here.
fn unexpired_filter(hash: &str, now: DateTime<Utc>) -> Document {
    let ttl = chrono::Duration::from_std(RECORD_TTL).unwrap_or(chrono::Duration::zero());
    let cutoff = mongodb::bson::DateTime::from_chrono(now - ttl);
    doc! {
        REQUEST_HASH_FIELD: hash,
        REQUEST_DATE_FIELD: { "$gt": cutoff },
    }
}

fn is_validation_failure(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error))
            if write_error.code == DOCUMENT_VALIDATION_FAILURE
    )
}

impl RecordStore for MongoStore {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn collection_exists(&self) -> Result<bool, StoreError> {
        let names = self
            .db
            .list_collection_names()
            .filter(doc! { "name": COLLECTION_NAME, "type": "collection" })
            .await
            .map_err(|e| StoreError::backend(StoreOp::ListCollections, e))?;
        Ok(names.iter().any(|name| name == COLLECTION_NAME))
    }

    async fn create_collection(&self) -> Result<(), StoreError> {
        self.db
            .create_collection(COLLECTION_NAME)
            .validator(validator())
            .await
            .map_err(|e| StoreError::backend(StoreOp::CreateCollection, e))
    }

    async fn drop_collection(&self) -> Result<(), StoreError> {
        self.records()
            .drop()
            .await
            .map_err(|e| StoreError::backend(StoreOp::DropCollection, e))
    }

    async fn list_indexes(&self) -> Result<Vec<IndexSpec>, StoreError> {
        let models: Vec<IndexModel> = self
            .records()
            .list_indexes()
            .await
            .map_err(|e| StoreError::backend(StoreOp::ListIndexes, e))?
            .try_collect()
            .await
            .map_err(|e| StoreError::backend(StoreOp::ListIndexes, e))?;

        Ok(models.iter().filter_map(index_spec).collect())
    }

    async fn drop_index(&self, name: &str) -> Result<(), StoreError> {
        self.records()
            .drop_index(name)
            .await
            .map_err(|e| StoreError::backend(StoreOp::DropIndex, e))
    }

    async fn create_expiring_index(&self) -> Result<(), StoreError> {
        let spec = IndexSpec::expiring();
        let model = IndexModel::builder()
            .keys(doc! { REQUEST_DATE_FIELD: 1 })
            .options(
                IndexOptions::builder()
                    .name(spec.name)
                    .expire_after(RECORD_TTL)
                    .build(),
            )
            .build();

        self.records()
            .create_index(model)
            .await
            .map(|_| ())
            .map_err(|e| StoreError::backend(StoreOp::CreateIndex, e))
    }

    async fn insert(&self, record: &RequestRecord) -> Result<(), StoreError> {
        match self.records().insert_one(record).await {
            Ok(_) => Ok(()),
            Err(e) if is_validation_failure(&e) => Err(StoreError::SchemaViolation(e.to_string())),
            Err(e) => Err(StoreError::backend(StoreOp::Insert, e)),
        }
    }

    async fn find_by_fingerprint(&self, hash: &str) -> Result<Vec<RequestRecord>, StoreError> {
        self.records()
            .find(unexpired_filter(hash, self.now()))
            .await
            .map_err(|e| StoreError::backend(StoreOp::Find, e))?
            .try_collect()
            .await
            .map_err(|e| StoreError::backend(StoreOp::Find, e))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn validator_requires_hash_and_date() {
        let validator = validator();
        let schema = validator.get_document("$jsonSchema").expect("schema");
        let required: Vec<&str> = schema
            .get_array("required")
            .expect("required")
            .iter()
            .filter_map(Bson::as_str)
            .collect();
        assert_eq!(required, vec![REQUEST_HASH_FIELD, REQUEST_DATE_FIELD]);
        assert_eq!(
            schema
                .get_document("properties")
                .and_then(|p| p.get_document(REQUEST_HASH_FIELD))
                .and_then(|p| p.get_i32("minLength"))
                .ok(),
            Some(1)
        );

        let properties = schema.get_document("properties").expect("properties");
        assert_eq!(
            properties
                .get_document(REQUEST_DATE_FIELD)
                .and_then(|p| p.get_str("bsonType"))
                .ok(),
            Some("date")
        );
    }

    #[test]
    fn lookup_excludes_records_past_the_window() {
        let now = Utc::now();
        let filter = unexpired_filter("abc", now);

        assert_eq!(filter.get_str(REQUEST_HASH_FIELD).ok(), Some("abc"));
        let cutoff = filter
            .get_document(REQUEST_DATE_FIELD)
            .and_then(|range| range.get_datetime("$gt"))
            .expect("requestDate lower bound");
        let window = now.timestamp_millis() - cutoff.timestamp_millis();
        assert_eq!(window, 600_000);
    }

    #[test]
    fn index_model_maps_to_spec() {
        let model = IndexModel::builder()
            .keys(doc! { REQUEST_DATE_FIELD: 1 })
            .options(
                IndexOptions::builder()
                    .name("requestDate_1".to_string())
                    .expire_after(Duration::from_secs(600))
                    .build(),
            )
            .build();
        let spec = index_spec(&model).expect("spec");
        assert!(spec.is_canonical());
        assert_eq!(spec, IndexSpec::expiring());
    }

    #[test]
    fn descending_index_without_ttl_is_not_canonical() {
        let model = IndexModel::builder()
            .keys(doc! { REQUEST_DATE_FIELD: -1i64 })
            .build();
        let spec = index_spec(&model).expect("spec");
        assert!(!spec.ascending);
        assert_eq!(spec.expire_after, None);
        assert!(spec.name.is_empty());
    }
}
