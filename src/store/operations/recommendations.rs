use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::keys;
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationType {
    DueFlashcards,
    WeakTopicFocus,
    QuizSuggestion,
    DocumentReread,
    GoalProgress,
    Reinforcement,
}

impl RecommendationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DueFlashcards => "due_flashcards",
            Self::WeakTopicFocus => "weak_topic_focus",
            Self::QuizSuggestion => "quiz_suggestion",
            Self::DocumentReread => "document_reread",
            Self::GoalProgress => "goal_progress",
            Self::Reinforcement => "reinforcement",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl RecommendationPriority {
    pub fn rank(self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Urgent => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendationAction {
    View,
    Accept,
    Dismiss,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub id: String,
    pub user_id: String,
    pub recommendation_type: RecommendationType,
    /// Dedup key within a type: a topic, goal id, document id, or a fixed tag.
    pub subject: String,
    pub title: String,
    pub reason: String,
    pub priority: RecommendationPriority,
    pub relevance_score: f64,
    pub confidence_score: f64,
    pub expected_impact: f64,
    #[serde(default)]
    pub target_ids: Vec<String>,
    #[serde(default)]
    pub is_viewed: bool,
    #[serde(default)]
    pub is_accepted: bool,
    #[serde(default)]
    pub is_dismissed: bool,
    pub viewed_at: Option<DateTime<Utc>>,
    pub acted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Recommendation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && !self.is_dismissed
    }

    /// Priority rank desc, then relevance desc, then confidence desc.
    pub fn display_order(a: &Self, b: &Self) -> Ordering {
        b.priority
            .rank()
            .cmp(&a.priority.rank())
            .then_with(|| b.relevance_score.total_cmp(&a.relevance_score))
            .then_with(|| b.confidence_score.total_cmp(&a.confidence_score))
    }

    fn apply(&mut self, action: RecommendationAction, now: DateTime<Utc>) {
        match action {
            RecommendationAction::View => {
                if !self.is_viewed {
                    self.is_viewed = true;
                    self.viewed_at = Some(now);
                }
            }
            RecommendationAction::Accept => {
                self.is_viewed = true;
                self.viewed_at.get_or_insert(now);
                self.is_accepted = true;
                self.is_dismissed = false;
                self.acted_at = Some(now);
            }
            RecommendationAction::Dismiss => {
                self.is_viewed = true;
                self.viewed_at.get_or_insert(now);
                self.is_dismissed = true;
                self.is_accepted = false;
                self.acted_at = Some(now);
            }
        }
    }
}

impl Store {
    pub fn insert_recommendations(&self, items: &[Recommendation]) -> Result<(), StoreError> {
        let mut batch = sled::Batch::default();
        for item in items {
            let key = keys::recommendation_key(&item.user_id, &item.id)?;
            batch.insert(key.as_bytes(), Self::serialize(item)?);
        }
        self.recommendations.apply_batch(batch)?;
        Ok(())
    }

    pub fn get_recommendation(
        &self,
        user_id: &str,
        recommendation_id: &str,
    ) -> Result<Option<Recommendation>, StoreError> {
        let key = keys::recommendation_key(user_id, recommendation_id)?;
        match self.recommendations.get(key.as_bytes())? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn list_recommendations(&self, user_id: &str) -> Result<Vec<Recommendation>, StoreError> {
        let prefix = keys::user_prefix(user_id)?;
        let mut items = Vec::new();
        for item in self.recommendations.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item?;
            items.push(Self::deserialize::<Recommendation>(&value)?);
        }
        Ok(items)
    }

    /// Non-expired, non-dismissed recommendations in display order.
    pub fn list_active_recommendations(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Recommendation>, StoreError> {
        let mut items: Vec<Recommendation> = self
            .list_recommendations(user_id)?
            .into_iter()
            .filter(|r| r.is_active(now))
            .collect();
        items.sort_by(Recommendation::display_order);
        Ok(items)
    }

    /// Keys of the user's recommendations whose `expires_at` has passed.
    pub fn expired_recommendation_keys(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        let prefix = keys::user_prefix(user_id)?;
        let mut expired = Vec::new();
        for item in self.recommendations.scan_prefix(prefix.as_bytes()) {
            let (key, value) = item?;
            let rec: Recommendation = Self::deserialize(&value)?;
            if rec.is_expired(now) {
                expired.push(String::from_utf8_lossy(&key).to_string());
            }
        }
        Ok(expired)
    }

    pub fn purge_expired_recommendations(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let expired = self.expired_recommendation_keys(user_id, now)?;
        let mut batch = sled::Batch::default();
        for key in &expired {
            batch.remove(key.as_bytes());
        }
        self.recommendations.apply_batch(batch)?;
        Ok(expired.len())
    }

    /// Sweep every user; undecodable rows are logged and left in place.
    pub fn purge_all_expired_recommendations(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut batch = sled::Batch::default();
        let mut purged = 0usize;
        for item in self.recommendations.iter() {
            let (key, value) = item?;
            match Self::deserialize::<Recommendation>(&value) {
                Ok(rec) if rec.is_expired(now) => {
                    batch.remove(key);
                    purged += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        key = %String::from_utf8_lossy(&key),
                        error = %e,
                        "Skipping undecodable recommendation"
                    );
                }
            }
        }
        self.recommendations.apply_batch(batch)?;
        Ok(purged)
    }

    pub fn record_recommendation_action(
        &self,
        user_id: &str,
        recommendation_id: &str,
        action: RecommendationAction,
        now: DateTime<Utc>,
    ) -> Result<Recommendation, StoreError> {
        let Some(mut rec) = self.get_recommendation(user_id, recommendation_id)? else {
            return Err(StoreError::not_found("recommendation", recommendation_id));
        };
        rec.apply(action, now);
        let key = keys::recommendation_key(user_id, recommendation_id)?;
        self.recommendations
            .insert(key.as_bytes(), Self::serialize(&rec)?)?;
        Ok(rec)
    }
}
