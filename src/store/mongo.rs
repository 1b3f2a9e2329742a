//! MongoDB-backed store, counter and checkpoint

use crate::config::MongoConfig;
use crate::error::StoreError;
use crate::store::{Counter, CursorCheckpoint, RecordStore};
use crate::types::outcome::{EnrichedRecord, Partition};
use crate::types::record::StreamPosition;
use anyhow::{Context, Result};
use async_trait::async_trait;
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::ReturnDocument;
use mongodb::{Client, Collection};
use tracing::{debug, info};

/// Field holding a counter's value in the counters collection
const SEQUENCE_FIELD: &str = "sequence_value";
/// Field holding a checkpointed stream position
const POSITION_FIELD: &str = "position";
/// MongoDB duplicate key error code
const DUPLICATE_KEY: i32 = 11000;

/// Store backed by a MongoDB database
#[derive(Clone)]
pub struct MongoStore {
    fraud: Collection<Document>,
    legit: Collection<Document>,
    counters: Collection<Document>,
}

impl MongoStore {
    /// Connect and verify the server answers a ping
    pub async fn connect(config: &MongoConfig) -> Result<Self> {
        let client = Client::with_uri_str(&config.uri)
            .await
            .with_context(|| format!("Invalid MongoDB uri {}", config.uri))?;
        let db = client.database(&config.database);

        db.run_command(doc! { "ping": 1 })
            .await
            .context("MongoDB ping failed")?;

        info!(
            database = %config.database,
            fraud = %config.fraud_collection,
            legit = %config.legit_collection,
            "Connected to MongoDB"
        );

        Ok(Self {
            fraud: db.collection(&config.fraud_collection),
            legit: db.collection(&config.legit_collection),
            counters: db.collection(&config.counters_collection),
        })
    }

    /// Create counter `key` at 0 if it does not exist yet
    pub async fn ensure_counter(&self, key: &str) -> Result<()> {
        let result = self
            .counters
            .update_one(
                doc! { "_id": key },
                doc! { "$setOnInsert": { "sequence_value": 0_i64 } },
            )
            .upsert(true)
            .await;

        match result {
            Ok(outcome) => {
                if outcome.upserted_id.is_some() {
                    info!(counter = %key, "Created counter");
                }
                Ok(())
            }
            // Another consumer created it first
            Err(e) if is_duplicate_key(&e) => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to ensure counter {key}")),
        }
    }

    fn collection(&self, partition: Partition) -> &Collection<Document> {
        match partition {
            Partition::Fraud => &self.fraud,
            Partition::Legit => &self.legit,
        }
    }
}

#[async_trait]
impl RecordStore for MongoStore {
    async fn insert(
        &self,
        partition: Partition,
        record: &EnrichedRecord,
    ) -> Result<String, StoreError> {
        let document = mongodb::bson::to_document(record)
            .map_err(|e| StoreError::Encode(e.to_string()))?;

        let result = self
            .collection(partition)
            .insert_one(document)
            .await
            .map_err(unavailable)?;

        let id = match result.inserted_id {
            Bson::ObjectId(oid) => oid.to_hex(),
            other => other.to_string(),
        };
        debug!(partition = %partition, id = %id, "Inserted record");
        Ok(id)
    }
}

#[async_trait]
impl Counter for MongoStore {
    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let updated = self
            .counters
            .find_one_and_update(doc! { "_id": key }, doc! { "$inc": { "sequence_value": 1_i64 } })
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await
            .map_err(unavailable)?
            .ok_or_else(|| StoreError::CounterMissing(key.to_string()))?;

        match updated.get(SEQUENCE_FIELD) {
            Some(Bson::Int64(v)) => Ok(*v),
            Some(Bson::Int32(v)) => Ok(i64::from(*v)),
            // Counters seeded by other tools may hold doubles
            Some(Bson::Double(v)) => Ok(*v as i64),
            _ => Err(StoreError::CounterMissing(key.to_string())),
        }
    }
}

#[async_trait]
impl CursorCheckpoint for MongoStore {
    async fn load(&self, stream_key: &str) -> Result<Option<StreamPosition>, StoreError> {
        let found = self
            .counters
            .find_one(doc! { "_id": checkpoint_id(stream_key) })
            .await
            .map_err(unavailable)?;

        let Some(document) = found else {
            return Ok(None);
        };
        let raw = document
            .get_str(POSITION_FIELD)
            .map_err(|e| StoreError::Encode(e.to_string()))?;
        raw.parse::<StreamPosition>()
            .map(Some)
            .map_err(|e| StoreError::Encode(e.to_string()))
    }

    async fn save(&self, stream_key: &str, position: StreamPosition) -> Result<(), StoreError> {
        self.counters
            .update_one(
                doc! { "_id": checkpoint_id(stream_key) },
                doc! { "$set": { "position": position.to_string() } },
            )
            .upsert(true)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}

fn checkpoint_id(stream_key: &str) -> String {
    format!("cursor:{stream_key}")
}

fn unavailable(e: mongodb::error::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn is_duplicate_key(e: &mongodb::error::Error) -> bool {
    match e.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(w)) => w.code == DUPLICATE_KEY,
        ErrorKind::Command(c) => c.code == DUPLICATE_KEY,
        _ => false,
    }
}
