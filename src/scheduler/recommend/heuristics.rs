use chrono::NaiveDate;

use crate::policy::RecommendationPolicy;
use crate::scheduler::signals::{self, TopicScore};
use crate::store::operations::documents::Document;
use crate::store::operations::flashcards::Flashcard;
use crate::store::operations::goals::LearningGoal;
use crate::store::operations::recommendations::{RecommendationPriority, RecommendationType};

/// An unpersisted suggestion. Scores are in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub recommendation_type: RecommendationType,
    pub subject: String,
    pub title: String,
    pub reason: String,
    pub priority: RecommendationPriority,
    pub relevance: f64,
    pub confidence: f64,
    pub impact: f64,
    pub target_ids: Vec<String>,
}

impl Candidate {
    fn new(
        recommendation_type: RecommendationType,
        subject: impl Into<String>,
        title: String,
        reason: String,
        priority: RecommendationPriority,
        relevance: f64,
        confidence: f64,
        impact: f64,
    ) -> Self {
        Self {
            recommendation_type,
            subject: subject.into(),
            title,
            reason,
            priority,
            relevance: relevance.clamp(0.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            impact: impact.clamp(0.0, 1.0),
            target_ids: Vec::new(),
        }
    }

    fn with_targets(mut self, ids: Vec<String>) -> Self {
        self.target_ids = ids;
        self
    }
}

/// One candidate per tag group of due cards.
pub fn due_flashcards(cards: &[Flashcard], policy: &RecommendationPolicy) -> Vec<Candidate> {
    signals::group_due_by_tag(cards)
        .into_iter()
        .map(|(tag, members)| {
            let count = members.len();
            let priority = if count >= policy.urgent_group_size {
                RecommendationPriority::Urgent
            } else {
                RecommendationPriority::High
            };
            Candidate::new(
                RecommendationType::DueFlashcards,
                tag.clone(),
                format!("Review {count} due {tag} cards"),
                format!("{count} {tag} cards have passed their review date"),
                priority,
                count as f64 / policy.relevance_divisor,
                0.9,
                0.5 + count as f64 / (policy.relevance_divisor * 2.0),
            )
            .with_targets(members.iter().map(|c| c.id.clone()).collect())
        })
        .collect()
}

/// Expects topics already filtered to the weak set.
pub fn weak_topic_focus(weak: &[TopicScore]) -> Vec<Candidate> {
    weak.iter()
        .map(|w| {
            Candidate::new(
                RecommendationType::WeakTopicFocus,
                w.topic.clone(),
                format!("Focus on {}", w.topic),
                format!(
                    "Average quiz score {:.0}% across {} recent attempts",
                    w.average_score, w.attempts
                ),
                RecommendationPriority::High,
                1.0 - w.average_score / 100.0,
                w.attempts as f64 / 5.0,
                0.8,
            )
        })
        .collect()
}

pub fn quiz_suggestion(recent_topics: &[String]) -> Vec<Candidate> {
    if recent_topics.is_empty() {
        return vec![Candidate::new(
            RecommendationType::QuizSuggestion,
            "general",
            "Take a practice quiz".to_string(),
            "A short quiz shows where you stand".to_string(),
            RecommendationPriority::Medium,
            0.4,
            0.5,
            0.5,
        )];
    }
    recent_topics
        .iter()
        .enumerate()
        .map(|(i, topic)| {
            Candidate::new(
                RecommendationType::QuizSuggestion,
                topic.clone(),
                format!("Quiz yourself on {topic}"),
                format!("You studied {topic} this week"),
                RecommendationPriority::Medium,
                0.7 - 0.1 * i as f64,
                0.6,
                0.6,
            )
        })
        .collect()
}

pub fn document_reread(documents: &[Document]) -> Vec<Candidate> {
    documents
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            Candidate::new(
                RecommendationType::DocumentReread,
                doc.id.clone(),
                format!("Re-read \"{}\"", doc.title),
                "Revisiting recent material helps it stick".to_string(),
                RecommendationPriority::Low,
                0.5 - 0.1 * i as f64,
                0.4,
                0.3,
            )
            .with_targets(vec![doc.id.clone()])
        })
        .collect()
}

pub fn goal_progress(goals: &[LearningGoal], today: NaiveDate) -> Vec<Candidate> {
    goals
        .iter()
        .map(|goal| {
            let overdue = today > goal.target_date;
            let reason = if overdue {
                format!(
                    "Target date passed at {:.0}% complete",
                    goal.completion_percentage
                )
            } else if goal.is_on_track {
                format!("{:.0}% complete and on track", goal.completion_percentage)
            } else {
                format!(
                    "{:.0}% complete, {} days behind",
                    goal.completion_percentage, goal.days_behind
                )
            };
            Candidate::new(
                RecommendationType::GoalProgress,
                goal.id.clone(),
                format!("Make progress on \"{}\"", goal.title),
                reason,
                if overdue {
                    RecommendationPriority::High
                } else {
                    RecommendationPriority::Medium
                },
                if goal.is_on_track { 0.5 } else { 0.8 },
                0.7,
                1.0 - goal.completion_percentage / 100.0,
            )
            .with_targets(vec![goal.id.clone()])
        })
        .collect()
}

pub fn reinforcement(latest_accuracy: Option<f64>, policy: &RecommendationPolicy) -> Vec<Candidate> {
    match latest_accuracy {
        Some(accuracy) if accuracy >= policy.reinforcement_accuracy => vec![Candidate::new(
            RecommendationType::Reinforcement,
            "streak",
            "Keep it up!".to_string(),
            format!("Recent accuracy is {accuracy:.0}%"),
            RecommendationPriority::Low,
            0.3,
            accuracy / 100.0,
            0.2,
        )],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::store::operations::goals::{GoalPriority, GoalProgress, GoalStatus, TargetMetrics};

    fn cards(n: usize, tag: &str) -> Vec<Flashcard> {
        (0..n)
            .map(|i| Flashcard {
                id: format!("{tag}-{i}"),
                user_id: "u1".to_string(),
                front: "f".to_string(),
                tags: vec![tag.to_string()],
                ease_factor: 2.5,
                repetitions: 0,
                interval_days: 0,
                next_review_date: Some(Utc::now() - Duration::hours(1)),
                last_reviewed_at: None,
                created_at: Utc::now(),
            })
            .collect()
    }

    #[test]
    fn large_due_group_is_urgent_and_relevance_is_capped() {
        let mut all = cards(25, "Grammar");
        all.extend(cards(4, "Verbs"));
        let out = due_flashcards(&all, &RecommendationPolicy::default());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].priority, RecommendationPriority::Urgent);
        assert_eq!(out[0].relevance, 1.0);
        assert_eq!(out[1].priority, RecommendationPriority::High);
        assert!((out[1].relevance - 0.2).abs() < 1e-9);
        assert_eq!(out[1].target_ids.len(), 4);
    }

    #[test]
    fn quiz_suggestion_falls_back_to_generic() {
        let generic = quiz_suggestion(&[]);
        assert_eq!(generic.len(), 1);
        assert_eq!(generic[0].subject, "general");

        let specific = quiz_suggestion(&["Verbs".to_string(), "Food".to_string()]);
        assert_eq!(specific.len(), 2);
        assert!(specific[0].relevance > specific[1].relevance);
    }

    #[test]
    fn overdue_goal_gets_high_priority() {
        let today = NaiveDate::from_ymd_opt(2026, 6, 10).unwrap();
        let metrics = TargetMetrics::TimeBased { target_minutes: 100 };
        let goal = LearningGoal {
            id: "g1".into(),
            user_id: "u1".into(),
            title: "Study 100 minutes".into(),
            description: None,
            goal_type: metrics.goal_type(),
            current_progress: GoalProgress::initial(&metrics),
            target_metrics: metrics,
            start_date: today - Duration::days(20),
            target_date: today - Duration::days(1),
            status: GoalStatus::Active,
            priority: GoalPriority::Medium,
            completion_percentage: 40.0,
            is_on_track: false,
            days_behind: 11,
            milestones: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        };
        let out = goal_progress(&[goal], today);
        assert_eq!(out[0].priority, RecommendationPriority::High);
        assert!((out[0].impact - 0.6).abs() < 1e-9);
    }

    #[test]
    fn reinforcement_needs_high_accuracy() {
        let policy = RecommendationPolicy::default();
        assert!(reinforcement(Some(84.9), &policy).is_empty());
        assert!(reinforcement(None, &policy).is_empty());
        let out = reinforcement(Some(92.0), &policy);
        assert_eq!(out[0].priority, RecommendationPriority::Low);
    }
}
