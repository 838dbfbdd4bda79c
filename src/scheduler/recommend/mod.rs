pub mod heuristics;

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use crate::policy::{RecommendationPolicy, RecommendationTtl, SchedulerPolicy};
use crate::scheduler::signals::{self, TopicScore};
use crate::store::operations::documents::Document;
use crate::store::operations::flashcards::Flashcard;
use crate::store::operations::goals::LearningGoal;
use crate::store::operations::recommendations::{Recommendation, RecommendationType};
use crate::store::{Store, StoreError};

use self::heuristics::Candidate;

/// Inputs for one generation cycle.
#[derive(Debug, Clone, Default)]
pub struct RecommendationSignals {
    pub due_cards: Vec<Flashcard>,
    pub weak_topics: Vec<TopicScore>,
    pub recent_topics: Vec<String>,
    pub documents: Vec<Document>,
    pub active_goals: Vec<LearningGoal>,
    /// Mean quiz score over the lookback window.
    pub latest_accuracy: Option<f64>,
}

impl RecommendationSignals {
    pub fn load(
        store: &Store,
        user_id: &str,
        now: DateTime<Utc>,
        policy: &SchedulerPolicy,
    ) -> Result<Self, StoreError> {
        let rec = &policy.recommendations;
        let due_cards = store.due_flashcards(user_id, now, rec.due_scan_cap)?;
        let attempts = signals::load_attempts(store, user_id, now, rec.weak_topic_lookback_days)?;
        let scores = signals::topic_scores(&attempts);
        let weak_topics = signals::weak_topics(
            &scores,
            rec.weak_topic_threshold,
            rec.weak_topic_min_attempts,
            usize::MAX,
        );
        let cards = store.list_flashcards(user_id)?;
        let recent_topics = signals::recent_topics(
            &attempts,
            &cards,
            now - Duration::days(rec.recent_topic_days),
            rec.recent_topic_cap,
        );
        let latest_accuracy = if attempts.is_empty() {
            None
        } else {
            Some(attempts.iter().map(|a| a.score_percentage).sum::<f64>() / attempts.len() as f64)
        };

        Ok(Self {
            due_cards,
            weak_topics,
            recent_topics,
            documents: store.recent_documents(user_id, rec.document_cap)?,
            active_goals: store.list_active_goals(user_id)?,
            latest_accuracy,
        })
    }
}

fn ttl_hours(kind: RecommendationType, ttl: &RecommendationTtl) -> i64 {
    match kind {
        RecommendationType::DueFlashcards => ttl.due_flashcards_hours,
        RecommendationType::WeakTopicFocus => ttl.weak_topic_hours,
        RecommendationType::QuizSuggestion => ttl.quiz_suggestion_hours,
        RecommendationType::DocumentReread => ttl.document_reread_hours,
        RecommendationType::GoalProgress => ttl.goal_progress_hours,
        RecommendationType::Reinforcement => ttl.reinforcement_hours,
    }
}

/// Run all six heuristics and merge their output.
pub fn candidates(
    signals: &RecommendationSignals,
    now: DateTime<Utc>,
    policy: &RecommendationPolicy,
) -> Vec<Candidate> {
    let mut all = Vec::new();
    all.extend(heuristics::due_flashcards(&signals.due_cards, policy));
    all.extend(heuristics::weak_topic_focus(&signals.weak_topics));
    all.extend(heuristics::quiz_suggestion(&signals.recent_topics));
    all.extend(heuristics::document_reread(&signals.documents));
    all.extend(heuristics::goal_progress(&signals.active_goals, now.date_naive()));
    all.extend(heuristics::reinforcement(signals.latest_accuracy, policy));
    all
}

fn dedup_key(kind: RecommendationType, subject: &str) -> (RecommendationType, String) {
    (kind, subject.to_lowercase())
}

/// Rank candidates, drop those already covered by an unexpired
/// recommendation (dismissed ones included), and keep at most `max`.
pub fn build_batch(
    user_id: &str,
    signals: &RecommendationSignals,
    existing: &[Recommendation],
    max: usize,
    now: DateTime<Utc>,
    policy: &RecommendationPolicy,
) -> Vec<Recommendation> {
    let mut seen: HashSet<(RecommendationType, String)> = existing
        .iter()
        .filter(|r| !r.is_expired(now))
        .map(|r| dedup_key(r.recommendation_type, &r.subject))
        .collect();

    let mut batch: Vec<Recommendation> = candidates(signals, now, policy)
        .into_iter()
        .map(|c| Recommendation {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            expires_at: now + Duration::hours(ttl_hours(c.recommendation_type, &policy.ttl)),
            recommendation_type: c.recommendation_type,
            subject: c.subject,
            title: c.title,
            reason: c.reason,
            priority: c.priority,
            relevance_score: c.relevance,
            confidence_score: c.confidence,
            expected_impact: c.impact,
            target_ids: c.target_ids,
            is_viewed: false,
            is_accepted: false,
            is_dismissed: false,
            viewed_at: None,
            acted_at: None,
            created_at: now,
        })
        .collect();
    batch.sort_by(Recommendation::display_order);
    batch.retain(|r| seen.insert(dedup_key(r.recommendation_type, &r.subject)));
    batch.truncate(max);
    batch
}

/// Expired keys to purge plus the new batch, computed without writing.
#[derive(Debug, Clone, Default)]
pub struct RecommendationRefresh {
    pub expired_keys: Vec<String>,
    pub new_recommendations: Vec<Recommendation>,
}

pub fn prepare_refresh(
    store: &Store,
    user_id: &str,
    max: usize,
    now: DateTime<Utc>,
    policy: &SchedulerPolicy,
) -> Result<RecommendationRefresh, StoreError> {
    let expired_keys = store.expired_recommendation_keys(user_id, now)?;
    let signals = RecommendationSignals::load(store, user_id, now, policy)?;
    let existing = store.list_recommendations(user_id)?;
    let new_recommendations =
        build_batch(user_id, &signals, &existing, max, now, &policy.recommendations);
    Ok(RecommendationRefresh {
        expired_keys,
        new_recommendations,
    })
}

/// Purge the user's expired recommendations, then persist a fresh batch.
/// Returns the number of newly stored recommendations.
pub fn generate_and_store(
    store: &Store,
    user_id: &str,
    max: usize,
    now: DateTime<Utc>,
    policy: &SchedulerPolicy,
) -> Result<usize, StoreError> {
    let purged = store.purge_expired_recommendations(user_id, now)?;
    let signals = RecommendationSignals::load(store, user_id, now, policy)?;
    let existing = store.list_recommendations(user_id)?;
    let batch = build_batch(user_id, &signals, &existing, max, now, &policy.recommendations);
    store.insert_recommendations(&batch)?;
    tracing::debug!(user_id, purged, created = batch.len(), "Recommendations regenerated");
    Ok(batch.len())
}
