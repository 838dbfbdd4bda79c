use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::store::keys;
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GoalType {
    VocabularyCount,
    QuizScore,
    ExamPreparation,
    TimeBased,
    TopicMastery,
}

/// Which learning activity feeds a goal's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricFamily {
    Flashcards,
    Quizzes,
    StudyTime,
}

impl GoalType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VocabularyCount => "vocabulary_count",
            Self::QuizScore => "quiz_score",
            Self::ExamPreparation => "exam_preparation",
            Self::TimeBased => "time_based",
            Self::TopicMastery => "topic_mastery",
        }
    }

    pub fn metric_family(self) -> MetricFamily {
        match self {
            Self::VocabularyCount | Self::TopicMastery => MetricFamily::Flashcards,
            Self::QuizScore | Self::ExamPreparation => MetricFamily::Quizzes,
            Self::TimeBased => MetricFamily::StudyTime,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Draft,
    Active,
    Paused,
    Completed,
    Abandoned,
}

impl GoalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }

    /// draft→active, active→{paused,completed,abandoned}, paused→active.
    pub fn can_transition_to(self, next: GoalStatus) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Active)
                | (Self::Active, Self::Paused)
                | (Self::Active, Self::Completed)
                | (Self::Active, Self::Abandoned)
                | (Self::Paused, Self::Active)
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GoalPriority {
    Low,
    Medium,
    High,
    Urgent,
}

/// Type-specific target, tagged by goal type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetMetrics {
    #[serde(rename_all = "camelCase")]
    VocabularyCount { target_words: u32 },
    #[serde(rename_all = "camelCase")]
    QuizScore {
        target_score: f64,
        #[serde(default)]
        topic: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ExamPreparation {
        target_score: f64,
        #[serde(default)]
        topics: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    TimeBased { target_minutes: u32 },
    #[serde(rename_all = "camelCase")]
    TopicMastery { topic: String, target_mastery: f64 },
}

impl TargetMetrics {
    pub fn goal_type(&self) -> GoalType {
        match self {
            Self::VocabularyCount { .. } => GoalType::VocabularyCount,
            Self::QuizScore { .. } => GoalType::QuizScore,
            Self::ExamPreparation { .. } => GoalType::ExamPreparation,
            Self::TimeBased { .. } => GoalType::TimeBased,
            Self::TopicMastery { .. } => GoalType::TopicMastery,
        }
    }
}

/// Observed progress, same variant as the goal's [`TargetMetrics`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GoalProgress {
    #[serde(rename_all = "camelCase")]
    VocabularyCount { words_mastered: u32 },
    #[serde(rename_all = "camelCase")]
    QuizScore {
        latest_score: f64,
        best_score: f64,
        attempts: u32,
    },
    #[serde(rename_all = "camelCase")]
    ExamPreparation { average_score: f64, attempts: u32 },
    #[serde(rename_all = "camelCase")]
    TimeBased { minutes_studied: u32 },
    #[serde(rename_all = "camelCase")]
    TopicMastery {
        mastery: f64,
        mastered_cards: u32,
        total_cards: u32,
    },
}

impl GoalProgress {
    pub fn initial(metrics: &TargetMetrics) -> Self {
        match metrics {
            TargetMetrics::VocabularyCount { .. } => Self::VocabularyCount { words_mastered: 0 },
            TargetMetrics::QuizScore { .. } => Self::QuizScore {
                latest_score: 0.0,
                best_score: 0.0,
                attempts: 0,
            },
            TargetMetrics::ExamPreparation { .. } => Self::ExamPreparation {
                average_score: 0.0,
                attempts: 0,
            },
            TargetMetrics::TimeBased { .. } => Self::TimeBased { minutes_studied: 0 },
            TargetMetrics::TopicMastery { .. } => Self::TopicMastery {
                mastery: 0.0,
                mastered_cards: 0,
                total_cards: 0,
            },
        }
    }

    pub fn goal_type(&self) -> GoalType {
        match self {
            Self::VocabularyCount { .. } => GoalType::VocabularyCount,
            Self::QuizScore { .. } => GoalType::QuizScore,
            Self::ExamPreparation { .. } => GoalType::ExamPreparation,
            Self::TimeBased { .. } => GoalType::TimeBased,
            Self::TopicMastery { .. } => GoalType::TopicMastery,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub index: u32,
    pub title: String,
    pub target_date: NaiveDate,
    /// Progress percentage of the whole goal this milestone stands for.
    pub target_percentage: f64,
    pub target_value: f64,
    pub achieved: bool,
    pub achieved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningGoal {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub goal_type: GoalType,
    pub target_metrics: TargetMetrics,
    pub current_progress: GoalProgress,
    pub start_date: NaiveDate,
    pub target_date: NaiveDate,
    pub status: GoalStatus,
    pub priority: GoalPriority,
    pub completion_percentage: f64,
    pub is_on_track: bool,
    pub days_behind: u32,
    #[serde(default)]
    pub milestones: Vec<Milestone>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Store {
    pub fn create_goal(&self, goal: &LearningGoal) -> Result<(), StoreError> {
        let key = keys::goal_key(&goal.user_id, &goal.id)?;
        let swapped = self.goals.compare_and_swap(
            key.as_bytes(),
            None as Option<&[u8]>,
            Some(Self::serialize(goal)?),
        )?;
        if swapped.is_err() {
            return Err(StoreError::Conflict {
                entity: "goal".to_string(),
                key,
            });
        }
        Ok(())
    }

    pub fn put_goal(&self, goal: &LearningGoal) -> Result<(), StoreError> {
        let key = keys::goal_key(&goal.user_id, &goal.id)?;
        self.goals.insert(key.as_bytes(), Self::serialize(goal)?)?;
        Ok(())
    }

    pub fn get_goal(&self, user_id: &str, goal_id: &str) -> Result<Option<LearningGoal>, StoreError> {
        let key = keys::goal_key(user_id, goal_id)?;
        match self.goals.get(key.as_bytes())? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn list_goals(&self, user_id: &str) -> Result<Vec<LearningGoal>, StoreError> {
        let prefix = keys::user_prefix(user_id)?;
        let mut goals = Vec::new();
        for item in self.goals.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item?;
            goals.push(Self::deserialize::<LearningGoal>(&value)?);
        }
        goals.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(goals)
    }

    pub fn list_active_goals(&self, user_id: &str) -> Result<Vec<LearningGoal>, StoreError> {
        Ok(self
            .list_goals(user_id)?
            .into_iter()
            .filter(|g| g.status == GoalStatus::Active)
            .collect())
    }

    pub fn delete_goal(&self, user_id: &str, goal_id: &str) -> Result<bool, StoreError> {
        let key = keys::goal_key(user_id, goal_id)?;
        Ok(self.goals.remove(key.as_bytes())?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_machine_allows_only_documented_edges() {
        use GoalStatus::*;
        let all = [Draft, Active, Paused, Completed, Abandoned];
        let allowed = [
            (Draft, Active),
            (Active, Paused),
            (Active, Completed),
            (Active, Abandoned),
            (Paused, Active),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from:?} -> {to:?}"
                );
            }
        }
    }

    #[test]
    fn target_metrics_are_tagged_by_goal_type() {
        let metrics = TargetMetrics::VocabularyCount { target_words: 500 };
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["type"], "vocabulary_count");
        assert_eq!(json["targetWords"], 500);

        let parsed: TargetMetrics =
            serde_json::from_value(serde_json::json!({"type": "topic_mastery", "topic": "Grammar", "targetMastery": 80.0}))
                .unwrap();
        assert_eq!(parsed.goal_type(), GoalType::TopicMastery);
    }

    #[test]
    fn unknown_goal_type_is_rejected_by_schema() {
        let parsed = serde_json::from_value::<TargetMetrics>(
            serde_json::json!({"type": "reading_speed", "wpm": 300}),
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn initial_progress_matches_metric_variant() {
        let metrics = TargetMetrics::QuizScore {
            target_score: 90.0,
            topic: None,
        };
        assert_eq!(GoalProgress::initial(&metrics).goal_type(), GoalType::QuizScore);
    }
}
