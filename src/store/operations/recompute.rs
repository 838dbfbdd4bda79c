use sled::Transactional;

use crate::store::keys;
use crate::store::operations::goals::LearningGoal;
use crate::store::operations::profiles::LearningProfile;
use crate::store::operations::recommendations::Recommendation;
use crate::store::operations::schedules::StudySchedule;
use crate::store::{map_tx_error, tx_deserialize, tx_serialize, Store, StoreError};

/// Everything one learning event changes, written as a single unit.
#[derive(Debug, Clone)]
pub struct RecomputeCommit {
    pub user_id: String,
    pub goals: Vec<LearningGoal>,
    pub expired_recommendation_keys: Vec<String>,
    pub new_recommendations: Vec<Recommendation>,
    /// Present only when the adjuster changed the active schedule.
    pub schedule: Option<StudySchedule>,
    pub profile: LearningProfile,
}

impl Store {
    pub fn commit_recompute(&self, commit: &RecomputeCommit) -> Result<(), StoreError> {
        let mut goal_rows = Vec::with_capacity(commit.goals.len());
        for goal in &commit.goals {
            goal_rows.push((
                keys::goal_key(&goal.user_id, &goal.id)?,
                Self::serialize(goal)?,
            ));
        }
        let mut recommendation_rows = Vec::with_capacity(commit.new_recommendations.len());
        for rec in &commit.new_recommendations {
            recommendation_rows.push((
                keys::recommendation_key(&rec.user_id, &rec.id)?,
                Self::serialize(rec)?,
            ));
        }
        let schedule_key = match &commit.schedule {
            Some(s) => Some(keys::schedule_key(&s.user_id, &s.id)?),
            None => None,
        };
        let profile_key = keys::profile_key(&commit.user_id)?;
        let profile_row = Self::serialize(&commit.profile)?;

        (
            &self.goals,
            &self.recommendations,
            &self.schedules,
            &self.profiles,
        )
            .transaction(|(tx_goals, tx_recs, tx_schedules, tx_profiles)| {
                for (key, value) in &goal_rows {
                    // 目标在处理期间被删除时不再复活
                    if tx_goals.get(key.as_bytes())?.is_some() {
                        tx_goals.insert(key.as_bytes(), value.as_slice())?;
                    }
                }

                for key in &commit.expired_recommendation_keys {
                    tx_recs.remove(key.as_bytes())?;
                }
                for (key, value) in &recommendation_rows {
                    tx_recs.insert(key.as_bytes(), value.as_slice())?;
                }

                if let (Some(key), Some(adjusted)) = (&schedule_key, &commit.schedule) {
                    if let Some(raw) = tx_schedules.get(key.as_bytes())? {
                        let current: StudySchedule = tx_deserialize(&raw)?;
                        let mut next = adjusted.clone();
                        // 激活状态只由激活操作维护
                        next.is_active = current.is_active;
                        tx_schedules.insert(key.as_bytes(), tx_serialize(&next)?)?;
                    }
                }

                tx_profiles.insert(profile_key.as_bytes(), profile_row.as_slice())?;
                Ok(())
            })
            .map_err(map_tx_error)
    }
}
