use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: entity={entity}, id={id}")]
    NotFound { entity: String, id: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },
    #[error("transient infrastructure error: {0}")]
    Transient(String),
    #[error("permanent compute error: {0}")]
    Permanent(String),
}

impl SchedulerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(entity: &str, id: &str) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    /// Only infrastructure failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

// StoreError 映射：
// - Sled / CAS 重试耗尽 -> Transient（存储暂不可用，可重试）
// - Serialization / Migration -> Permanent（数据损坏，重试无意义）
impl From<StoreError> for SchedulerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Validation(msg) => Self::Validation(msg),
            StoreError::NotFound { entity, key } => Self::NotFound { entity, id: key },
            StoreError::Conflict { entity, key } => {
                Self::Conflict(format!("{entity} already exists: {key}"))
            }
            StoreError::Sled(e) => Self::Transient(e.to_string()),
            StoreError::CasRetryExhausted { .. } => Self::Transient(value.to_string()),
            StoreError::Serialization(e) => Self::Permanent(format!("corrupt record: {e}")),
            StoreError::Migration { .. } => Self::Permanent(value.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sled_errors_are_retryable() {
        let err: SchedulerError =
            StoreError::Sled(sled::Error::Unsupported("offline".to_string())).into();
        assert!(err.is_retryable());
    }

    #[test]
    fn validation_and_not_found_are_not_retryable() {
        let v: SchedulerError = StoreError::Validation("bad".to_string()).into();
        assert!(matches!(v, SchedulerError::Validation(_)));
        assert!(!v.is_retryable());

        let nf: SchedulerError = StoreError::NotFound {
            entity: "goal".to_string(),
            key: "g1".to_string(),
        }
        .into();
        assert!(matches!(nf, SchedulerError::NotFound { .. }));
        assert!(!nf.is_retryable());
    }

    #[test]
    fn corrupt_data_is_permanent() {
        let json_err = serde_json::from_str::<u32>("not-json").unwrap_err();
        let err: SchedulerError = StoreError::Serialization(json_err).into();
        assert!(matches!(err, SchedulerError::Permanent(_)));
    }
}
