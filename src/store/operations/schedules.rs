use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use sled::transaction::ConflictableTransactionError;
use sled::Transactional;

use crate::store::keys;
use crate::store::{map_tx_error, tx_deserialize, tx_serialize, Store, StoreError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdaptationMode {
    Strict,
    Moderate,
    Flexible,
    HighlyAdaptive,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CatchUpStrategy {
    Skip,
    Gradual,
    Intensive,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleType {
    Daily,
    Weekdays,
    #[serde(rename_all = "camelCase")]
    Custom { study_days: Vec<Weekday> },
}

impl ScheduleType {
    pub fn covers(&self, date: NaiveDate) -> bool {
        match self {
            Self::Daily => true,
            Self::Weekdays => !matches!(date.weekday(), Weekday::Sat | Weekday::Sun),
            Self::Custom { study_days } => study_days.contains(&date.weekday()),
        }
    }

    /// Number of study days per week implied by the type.
    pub fn days_per_week(&self) -> u32 {
        match self {
            Self::Daily => 7,
            Self::Weekdays => 5,
            Self::Custom { study_days } => {
                let mut days: Vec<u32> = study_days
                    .iter()
                    .map(|d| d.num_days_from_monday())
                    .collect();
                days.sort_unstable();
                days.dedup();
                days.len() as u32
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityDistribution {
    pub flashcards: f64,
    pub quizzes: f64,
    pub reading: f64,
    pub practice: f64,
}

impl ActivityDistribution {
    pub fn total(&self) -> f64 {
        self.flashcards + self.quizzes + self.reading + self.practice
    }
}

impl Default for ActivityDistribution {
    fn default() -> Self {
        Self {
            flashcards: 0.4,
            quizzes: 0.3,
            reading: 0.2,
            practice: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfig {
    pub daily_minutes: u32,
    pub days_per_week: u32,
    pub activity_distribution: ActivityDistribution,
    #[serde(default)]
    pub focus_areas: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleStats {
    pub total_days_scheduled: u32,
    pub days_completed: u32,
    pub days_missed: u32,
    pub days_partial: u32,
    pub avg_adherence_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudySchedule {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub schedule_type: ScheduleType,
    pub schedule_config: ScheduleConfig,
    pub adaptation_mode: AdaptationMode,
    pub min_daily_load: u32,
    pub max_daily_load: u32,
    pub catch_up_strategy: CatchUpStrategy,
    pub is_active: bool,
    #[serde(default)]
    pub stats: ScheduleStats,
    pub last_adjusted_at: Option<DateTime<Utc>>,
    pub adjustment_reason: Option<String>,
    #[serde(default)]
    pub adjustment_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Store {
    pub fn create_schedule(&self, schedule: &StudySchedule) -> Result<(), StoreError> {
        let key = keys::schedule_key(&schedule.user_id, &schedule.id)?;
        let swapped = self.schedules.compare_and_swap(
            key.as_bytes(),
            None as Option<&[u8]>,
            Some(Self::serialize(schedule)?),
        )?;
        if swapped.is_err() {
            return Err(StoreError::Conflict {
                entity: "schedule".to_string(),
                key,
            });
        }
        Ok(())
    }

    /// Apply `mutate` to the stored schedule inside a transaction. `mutate`
    /// returns whether it changed anything; unchanged rows are not rewritten.
    ///
    /// `is_active` always keeps its stored value: activation only moves through
    /// [`Store::activate_schedule`] and [`Store::deactivate_schedule`].
    pub fn update_schedule<F>(
        &self,
        user_id: &str,
        schedule_id: &str,
        mutate: F,
    ) -> Result<StudySchedule, StoreError>
    where
        F: Fn(&mut StudySchedule) -> bool,
    {
        let key = keys::schedule_key(user_id, schedule_id)?;
        self.schedules
            .transaction(|tx| {
                let Some(raw) = tx.get(key.as_bytes())? else {
                    return Err(ConflictableTransactionError::Abort(StoreError::not_found(
                        "schedule",
                        schedule_id,
                    )));
                };
                let mut schedule: StudySchedule = tx_deserialize(&raw)?;
                let was_active = schedule.is_active;
                if !mutate(&mut schedule) {
                    return Ok(schedule);
                }
                schedule.is_active = was_active;
                tx.insert(key.as_bytes(), tx_serialize(&schedule)?)?;
                Ok(schedule)
            })
            .map_err(map_tx_error)
    }

    pub fn get_schedule(
        &self,
        user_id: &str,
        schedule_id: &str,
    ) -> Result<Option<StudySchedule>, StoreError> {
        let key = keys::schedule_key(user_id, schedule_id)?;
        match self.schedules.get(key.as_bytes())? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn list_schedules(&self, user_id: &str) -> Result<Vec<StudySchedule>, StoreError> {
        let prefix = keys::user_prefix(user_id)?;
        let mut schedules = Vec::new();
        for item in self.schedules.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item?;
            schedules.push(Self::deserialize::<StudySchedule>(&value)?);
        }
        schedules.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(schedules)
    }

    pub fn get_active_schedule(&self, user_id: &str) -> Result<Option<StudySchedule>, StoreError> {
        let index_key = keys::active_schedule_key(user_id)?;
        let Some(raw_id) = self.active_schedules.get(index_key.as_bytes())? else {
            return Ok(None);
        };
        let schedule_id = String::from_utf8_lossy(&raw_id).to_string();
        Ok(self
            .get_schedule(user_id, &schedule_id)?
            .filter(|s| s.is_active))
    }

    /// `(user_id, schedule_id)` for every user that has an active schedule.
    pub fn list_active_schedule_owners(&self) -> Result<Vec<(String, String)>, StoreError> {
        let mut owners = Vec::new();
        for item in self.active_schedules.iter() {
            let (key, value) = item?;
            owners.push((
                String::from_utf8_lossy(&key).to_string(),
                String::from_utf8_lossy(&value).to_string(),
            ));
        }
        Ok(owners)
    }

    /// Activate one schedule and deactivate every other active schedule of the
    /// same user inside a single transaction.
    pub fn activate_schedule(
        &self,
        user_id: &str,
        schedule_id: &str,
        now: DateTime<Utc>,
    ) -> Result<StudySchedule, StoreError> {
        let target_key = keys::schedule_key(user_id, schedule_id)?;
        let index_key = keys::active_schedule_key(user_id)?;

        // 索引之外残留的激活计划（例如迁移前的数据）也要一并停用
        let mut stray_keys = Vec::new();
        for schedule in self.list_schedules(user_id)? {
            if schedule.is_active && schedule.id != schedule_id {
                stray_keys.push(keys::schedule_key(user_id, &schedule.id)?);
            }
        }

        (&self.schedules, &self.active_schedules)
            .transaction(|(tx_schedules, tx_active)| {
                let Some(raw) = tx_schedules.get(target_key.as_bytes())? else {
                    return Err(ConflictableTransactionError::Abort(StoreError::not_found(
                        "schedule",
                        schedule_id,
                    )));
                };
                let mut target: StudySchedule = tx_deserialize(&raw)?;

                let mut to_deactivate = stray_keys.clone();
                if let Some(previous) = tx_active.get(index_key.as_bytes())? {
                    let previous_id = String::from_utf8_lossy(&previous).to_string();
                    if previous_id != schedule_id {
                        to_deactivate.push(
                            keys::schedule_key(user_id, &previous_id)
                                .map_err(ConflictableTransactionError::Abort)?,
                        );
                    }
                }

                for key in &to_deactivate {
                    if let Some(raw) = tx_schedules.get(key.as_bytes())? {
                        let mut other: StudySchedule = tx_deserialize(&raw)?;
                        if other.is_active {
                            other.is_active = false;
                            other.updated_at = now;
                            tx_schedules.insert(key.as_bytes(), tx_serialize(&other)?)?;
                        }
                    }
                }

                target.is_active = true;
                target.updated_at = now;
                tx_schedules.insert(target_key.as_bytes(), tx_serialize(&target)?)?;
                tx_active.insert(index_key.as_bytes(), schedule_id.as_bytes())?;

                Ok(target)
            })
            .map_err(map_tx_error)
    }

    pub fn deactivate_schedule(
        &self,
        user_id: &str,
        schedule_id: &str,
        now: DateTime<Utc>,
    ) -> Result<StudySchedule, StoreError> {
        let target_key = keys::schedule_key(user_id, schedule_id)?;
        let index_key = keys::active_schedule_key(user_id)?;

        (&self.schedules, &self.active_schedules)
            .transaction(|(tx_schedules, tx_active)| {
                let Some(raw) = tx_schedules.get(target_key.as_bytes())? else {
                    return Err(ConflictableTransactionError::Abort(StoreError::not_found(
                        "schedule",
                        schedule_id,
                    )));
                };
                let mut target: StudySchedule = tx_deserialize(&raw)?;
                target.is_active = false;
                target.updated_at = now;
                tx_schedules.insert(target_key.as_bytes(), tx_serialize(&target)?)?;

                if let Some(current) = tx_active.get(index_key.as_bytes())? {
                    if current.as_ref() == schedule_id.as_bytes() {
                        tx_active.remove(index_key.as_bytes())?;
                    }
                }
                Ok(target)
            })
            .map_err(map_tx_error)
    }

    pub fn delete_schedule(&self, user_id: &str, schedule_id: &str) -> Result<bool, StoreError> {
        let target_key = keys::schedule_key(user_id, schedule_id)?;
        let index_key = keys::active_schedule_key(user_id)?;

        (&self.schedules, &self.active_schedules)
            .transaction(|(tx_schedules, tx_active)| {
                let removed = tx_schedules.remove(target_key.as_bytes())?;
                if let Some(current) = tx_active.get(index_key.as_bytes())? {
                    if current.as_ref() == schedule_id.as_bytes() {
                        tx_active.remove(index_key.as_bytes())?;
                    }
                }
                Ok(removed.is_some())
            })
            .map_err(map_tx_error)
    }
}
