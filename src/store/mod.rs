pub mod keys;
pub mod migrate;
pub mod operations;
pub mod trees;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Db;
use thiserror::Error;

#[derive(Debug)]
pub struct Store {
    db: Db,
    pub meta: sled::Tree,
    pub profiles: sled::Tree,
    pub goals: sled::Tree,
    pub schedules: sled::Tree,
    pub active_schedules: sled::Tree,
    pub daily_plans: sled::Tree,
    pub recommendations: sled::Tree,
    // Collaborator replicas
    pub flashcards: sled::Tree,
    pub flashcard_due_index: sled::Tree,
    pub quiz_attempts: sled::Tree,
    pub documents: sled::Tree,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("not found: entity={entity}, key={key}")]
    NotFound { entity: String, key: String },
    #[error("conflict: entity={entity}, key={key}")]
    Conflict { entity: String, key: String },
    #[error("CAS retry exhausted after {attempts} attempts: entity={entity}, key={key}")]
    CasRetryExhausted {
        entity: String,
        key: String,
        attempts: u32,
    },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("migration error at version {version}: {message}")]
    Migration { version: u32, message: String },
}

impl StoreError {
    pub fn not_found(entity: &str, key: &str) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            key: key.to_string(),
        }
    }
}

impl Store {
    pub fn open(sled_path: &str) -> Result<Self, StoreError> {
        let db = sled::open(sled_path)?;
        let meta = db.open_tree(trees::META)?;
        let profiles = db.open_tree(trees::PROFILES)?;
        let goals = db.open_tree(trees::GOALS)?;
        let schedules = db.open_tree(trees::SCHEDULES)?;
        let active_schedules = db.open_tree(trees::ACTIVE_SCHEDULES)?;
        let daily_plans = db.open_tree(trees::DAILY_PLANS)?;
        let recommendations = db.open_tree(trees::RECOMMENDATIONS)?;
        let flashcards = db.open_tree(trees::FLASHCARDS)?;
        let flashcard_due_index = db.open_tree(trees::FLASHCARD_DUE_INDEX)?;
        let quiz_attempts = db.open_tree(trees::QUIZ_ATTEMPTS)?;
        let documents = db.open_tree(trees::DOCUMENTS)?;

        Ok(Self {
            db,
            meta,
            profiles,
            goals,
            schedules,
            active_schedules,
            daily_plans,
            recommendations,
            flashcards,
            flashcard_due_index,
            quiz_attempts,
            documents,
        })
    }

    pub fn run_migrations(&self) -> Result<(), StoreError> {
        migrate::run(self)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub(crate) fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec(value)?)
    }

    pub(crate) fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

pub(crate) fn tx_serialize<T: Serialize>(
    value: &T,
) -> Result<Vec<u8>, ConflictableTransactionError<StoreError>> {
    serde_json::to_vec(value)
        .map_err(|error| ConflictableTransactionError::Abort(StoreError::Serialization(error)))
}

pub(crate) fn tx_deserialize<T: DeserializeOwned>(
    bytes: &[u8],
) -> Result<T, ConflictableTransactionError<StoreError>> {
    serde_json::from_slice(bytes)
        .map_err(|error| ConflictableTransactionError::Abort(StoreError::Serialization(error)))
}

pub(crate) fn map_tx_error(error: TransactionError<StoreError>) -> StoreError {
    match error {
        TransactionError::Abort(store_error) => store_error,
        TransactionError::Storage(storage_error) => StoreError::Sled(storage_error),
    }
}
