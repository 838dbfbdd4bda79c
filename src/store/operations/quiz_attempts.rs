use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::keys;
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizAttempt {
    pub id: String,
    pub user_id: String,
    pub quiz_id: String,
    pub topic: Option<String>,
    /// 0-100
    pub score_percentage: f64,
    #[serde(default)]
    pub time_spent_minutes: u32,
    pub completed_at: DateTime<Utc>,
}

impl Store {
    pub fn record_quiz_attempt(&self, attempt: &QuizAttempt) -> Result<(), StoreError> {
        if !(0.0..=100.0).contains(&attempt.score_percentage) {
            return Err(StoreError::Validation(format!(
                "score_percentage out of range: {}",
                attempt.score_percentage
            )));
        }
        let key = keys::quiz_attempt_key(
            &attempt.user_id,
            attempt.completed_at.timestamp_millis(),
            &attempt.id,
        )?;
        self.quiz_attempts
            .insert(key.as_bytes(), Self::serialize(attempt)?)?;
        Ok(())
    }

    /// Attempts completed at or after `since`, newest first.
    pub fn quiz_attempts_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<QuizAttempt>, StoreError> {
        let prefix = keys::user_prefix(user_id)?;
        let mut attempts = Vec::new();
        for item in self.quiz_attempts.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item?;
            let attempt: QuizAttempt = Self::deserialize(&value)?;
            // 键按时间倒序，遇到更早的记录即可停止
            if attempt.completed_at < since {
                break;
            }
            attempts.push(attempt);
        }
        Ok(attempts)
    }

    pub fn latest_quiz_attempt(&self, user_id: &str) -> Result<Option<QuizAttempt>, StoreError> {
        let prefix = keys::user_prefix(user_id)?;
        match self.quiz_attempts.scan_prefix(prefix.as_bytes()).next() {
            Some(item) => {
                let (_, value) = item?;
                Ok(Some(Self::deserialize(&value)?))
            }
            None => Ok(None),
        }
    }
}
