use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::store::keys;
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LearningProfile {
    pub user_id: String,
    /// Mastered cards per active study day.
    pub learning_velocity: f64,
    pub recommended_daily_load: u32,
    pub retention_rate: f64,
    pub accuracy_rate: f64,
    pub current_streak_days: u32,
    pub longest_streak_days: u32,
    pub last_activity_date: Option<NaiveDate>,
    #[serde(default)]
    pub total_reviews: u64,
    #[serde(default)]
    pub total_quizzes: u64,
    #[serde(default)]
    pub weak_topics: Vec<String>,
    #[serde(default)]
    pub strong_topics: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LearningProfile {
    pub fn new(user_id: &str, daily_load: u32, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            learning_velocity: 0.0,
            recommended_daily_load: daily_load,
            retention_rate: 0.0,
            accuracy_rate: 0.0,
            current_streak_days: 0,
            longest_streak_days: 0,
            last_activity_date: None,
            total_reviews: 0,
            total_quizzes: 0,
            weak_topics: Vec::new(),
            strong_topics: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Extend, keep or reset the streak for activity on `day`.
    pub fn record_activity(&mut self, day: NaiveDate) {
        match self.last_activity_date {
            Some(last) if last == day => {}
            Some(last) if day.signed_duration_since(last).num_days() == 1 => {
                self.current_streak_days += 1;
            }
            // 乱序到达的旧事件不影响连续天数
            Some(last) if day < last => return,
            _ => self.current_streak_days = 1,
        }
        self.longest_streak_days = self.longest_streak_days.max(self.current_streak_days);
        self.last_activity_date = Some(day);
    }
}

impl Store {
    pub fn get_profile(&self, user_id: &str) -> Result<Option<LearningProfile>, StoreError> {
        let key = keys::profile_key(user_id)?;
        match self.profiles.get(key.as_bytes())? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    /// Lazily create the profile on first access. A concurrent creator wins
    /// and its row is returned.
    pub fn get_or_create_profile(
        &self,
        user_id: &str,
        default_daily_load: u32,
    ) -> Result<LearningProfile, StoreError> {
        if let Some(profile) = self.get_profile(user_id)? {
            return Ok(profile);
        }
        let key = keys::profile_key(user_id)?;
        let profile = LearningProfile::new(user_id, default_daily_load, Utc::now());
        let swapped = self.profiles.compare_and_swap(
            key.as_bytes(),
            None as Option<&[u8]>,
            Some(Self::serialize(&profile)?),
        )?;
        match swapped {
            Ok(()) => Ok(profile),
            Err(cas) => match cas.current {
                Some(existing) => Self::deserialize(&existing),
                None => Err(StoreError::CasRetryExhausted {
                    entity: "profile".to_string(),
                    key,
                    attempts: 1,
                }),
            },
        }
    }

    pub fn put_profile(&self, profile: &LearningProfile) -> Result<(), StoreError> {
        let key = keys::profile_key(&profile.user_id)?;
        self.profiles.insert(key.as_bytes(), Self::serialize(profile)?)?;
        Ok(())
    }
}
