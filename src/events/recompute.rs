use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

use crate::config::RecomputeConfig;
use crate::error::SchedulerError;
use crate::events::{EventPayload, LearningEvent};
use crate::policy::SchedulerPolicy;
use crate::scheduler::service::adjuster_history;
use crate::scheduler::{adjuster, goals, recommend, signals, SchedulerService};
use crate::store::operations::flashcards::Flashcard;
use crate::store::operations::goals::{LearningGoal, MetricFamily};
use crate::store::operations::profiles::LearningProfile;
use crate::store::operations::quiz_attempts::QuizAttempt;
use crate::store::operations::recompute::RecomputeCommit;
use crate::store::Store;

/// Exponential backoff for transient failures: `base * 2^(attempt-1)`,
/// capped at `max_delay`, then the event is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RecomputeConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_backoff(),
            max_delay: config.max_backoff(),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RecomputeConfig::default())
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    event_id: &str,
    mut op: F,
) -> Result<T, SchedulerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SchedulerError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    event_id,
                    attempt,
                    delay_secs = delay.as_secs_f64(),
                    error = %err,
                    "Recompute failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// What one processed event changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecomputeSummary {
    pub goals_updated: usize,
    pub recommendations_created: usize,
    pub recommendations_purged: usize,
    pub schedule_adjusted: bool,
}

/// Consumes learning events and applies their effects: replica upsert,
/// profile, goal progress, recommendations and the adjuster. Everything
/// but the replica upsert lands in one store transaction.
pub struct RecomputeWorker {
    service: Arc<SchedulerService>,
    retry: RetryPolicy,
    recommendation_cap: usize,
}

impl RecomputeWorker {
    pub fn new(service: Arc<SchedulerService>, config: &RecomputeConfig) -> Self {
        Self {
            service,
            retry: RetryPolicy::from_config(config),
            recommendation_cap: config.recommendation_cap.max(1),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Process events until the queue closes or shutdown is signalled.
    /// Each event runs in its own task; failures are logged and dropped.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<LearningEvent>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut in_flight = JoinSet::new();
        tracing::info!("Recompute worker started");

        loop {
            tokio::select! {
                maybe_event = events.recv() => {
                    let Some(event) = maybe_event else {
                        tracing::info!("Event queue closed");
                        break;
                    };
                    let worker = self.clone();
                    in_flight.spawn(async move {
                        worker.handle(event).await;
                    });
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Recompute task panicked");
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Recompute worker shutting down");
                    break;
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Recompute task panicked");
            }
        }
        tracing::info!("Recompute worker stopped");
    }

    async fn handle(&self, event: LearningEvent) {
        match self.process(&event).await {
            Ok(summary) => tracing::info!(
                event_id = %event.id,
                user_id = %event.user_id,
                kind = event.kind.as_str(),
                goals_updated = summary.goals_updated,
                recommendations_created = summary.recommendations_created,
                schedule_adjusted = summary.schedule_adjusted,
                "Learning event processed"
            ),
            Err(err) if err.is_retryable() => tracing::error!(
                event_id = %event.id,
                user_id = %event.user_id,
                error = %err,
                "Recompute retries exhausted, dropping event"
            ),
            Err(err) => tracing::error!(
                event_id = %event.id,
                user_id = %event.user_id,
                error = %err,
                "Recompute failed permanently, dropping event"
            ),
        }
    }

    /// Process one event with retries.
    pub async fn process(&self, event: &LearningEvent) -> Result<RecomputeSummary, SchedulerError> {
        let payload = event.decode()?;
        run_with_retry(&self.retry, &event.id, || self.process_once(event, &payload)).await
    }

    async fn process_once(
        &self,
        event: &LearningEvent,
        payload: &EventPayload,
    ) -> Result<RecomputeSummary, SchedulerError> {
        let policy = self.service.policy().await;
        let store = self.service.store();
        let now = Utc::now();

        match payload {
            EventPayload::FlashcardReviewed(p) => store.upsert_flashcard(&p.card)?,
            EventPayload::QuizCompleted(p) => store.record_quiz_attempt(&p.attempt)?,
        }

        let (commit, summary) =
            build_commit(store, event, payload, &policy, self.recommendation_cap, now)?;
        store.commit_recompute(&commit)?;
        Ok(summary)
    }
}

/// Compute every change an event causes without writing anything.
pub fn build_commit(
    store: &Store,
    event: &LearningEvent,
    payload: &EventPayload,
    policy: &SchedulerPolicy,
    recommendation_cap: usize,
    now: DateTime<Utc>,
) -> Result<(RecomputeCommit, RecomputeSummary), SchedulerError> {
    let user_id = event.user_id.as_str();
    let today = now.date_naive();
    let cards = store.list_flashcards(user_id)?;
    let attempts =
        signals::load_attempts(store, user_id, now, policy.recommendations.weak_topic_lookback_days)?;

    let mut profile = store.get_or_create_profile(user_id, policy.profile.default_daily_load)?;
    update_profile(&mut profile, payload, &cards, &attempts, now, policy);

    let mut updated_goals = Vec::new();
    for mut goal in store.list_active_goals(user_id)? {
        if let Some(progress) = next_progress(&goal, payload, &cards, policy) {
            goals::apply_progress(&mut goal, progress, today, now, &policy.goals)?;
            updated_goals.push(goal);
        }
    }

    let refresh = recommend::prepare_refresh(store, user_id, recommendation_cap, now, policy)?;

    let mut adjusted_schedule = None;
    if let Some(mut schedule) = store.get_active_schedule(user_id)? {
        let history = adjuster_history(store, &schedule, today, policy.adjuster.history_days)?;
        let outcome = adjuster::evaluate(&schedule, &history, today, &policy.adjuster);
        if adjuster::apply(&mut schedule, &outcome, now) {
            profile.recommended_daily_load = schedule.schedule_config.daily_minutes;
            tracing::info!(
                user_id,
                schedule_id = %schedule.id,
                from = outcome.previous_daily_minutes,
                to = outcome.new_daily_minutes,
                "Schedule adjusted by recompute"
            );
            adjusted_schedule = Some(schedule);
        }
    }

    let summary = RecomputeSummary {
        goals_updated: updated_goals.len(),
        recommendations_created: refresh.new_recommendations.len(),
        recommendations_purged: refresh.expired_keys.len(),
        schedule_adjusted: adjusted_schedule.is_some(),
    };
    let commit = RecomputeCommit {
        user_id: user_id.to_string(),
        goals: updated_goals,
        expired_recommendation_keys: refresh.expired_keys,
        new_recommendations: refresh.new_recommendations,
        schedule: adjusted_schedule,
        profile,
    };
    Ok((commit, summary))
}

fn next_progress(
    goal: &LearningGoal,
    payload: &EventPayload,
    cards: &[Flashcard],
    policy: &SchedulerPolicy,
) -> Option<crate::store::operations::goals::GoalProgress> {
    match (goal.goal_type.metric_family(), payload) {
        (MetricFamily::Flashcards, EventPayload::FlashcardReviewed(_)) => {
            goals::progress_from_flashcards(&goal.target_metrics, cards, &policy.goals)
        }
        (MetricFamily::Quizzes, EventPayload::QuizCompleted(q)) => goals::progress_from_quiz(
            &goal.target_metrics,
            &goal.current_progress,
            q.attempt.score_percentage,
            q.attempt.topic.as_deref(),
        ),
        (MetricFamily::StudyTime, p) => {
            goals::progress_from_study_time(&goal.current_progress, p.minutes_spent())
        }
        _ => None,
    }
}

/// Fold one event into the learner profile. `cards` and `attempts` must
/// already include the event's own record.
pub fn update_profile(
    profile: &mut LearningProfile,
    payload: &EventPayload,
    cards: &[Flashcard],
    attempts: &[QuizAttempt],
    now: DateTime<Utc>,
    policy: &SchedulerPolicy,
) {
    match payload {
        EventPayload::FlashcardReviewed(_) => profile.total_reviews += 1,
        EventPayload::QuizCompleted(_) => profile.total_quizzes += 1,
    }
    profile.record_activity(payload.activity_at(now).date_naive());

    if !attempts.is_empty() {
        profile.accuracy_rate =
            attempts.iter().map(|a| a.score_percentage).sum::<f64>() / attempts.len() as f64;
    }

    let reviewed: Vec<&Flashcard> = cards.iter().filter(|c| c.last_reviewed_at.is_some()).collect();
    if !reviewed.is_empty() {
        let retained = reviewed.iter().filter(|c| c.repetitions >= 1).count();
        profile.retention_rate = retained as f64 / reviewed.len() as f64 * 100.0;
    }

    let scores = signals::topic_scores(attempts);
    profile.weak_topics = signals::weak_topics(
        &scores,
        policy.plan.weak_topic_threshold,
        policy.plan.weak_topic_min_attempts,
        usize::MAX,
    )
    .into_iter()
    .map(|s| s.topic)
    .collect();
    profile.strong_topics = signals::strong_topics(&scores, policy.profile.strong_topic_threshold);

    let active_days: HashSet<NaiveDate> = reviewed
        .iter()
        .filter_map(|c| c.last_reviewed_at)
        .chain(attempts.iter().map(|a| a.completed_at))
        .map(|t| t.date_naive())
        .collect();
    let mastered = cards
        .iter()
        .filter(|c| c.is_mastered(policy.goals.mastery_min_repetitions, policy.goals.mastery_min_ease))
        .count();
    profile.learning_velocity = if active_days.is_empty() {
        0.0
    } else {
        mastered as f64 / active_days.len() as f64
    };
    profile.updated_at = now;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::events::{FlashcardReviewed, QuizCompleted};

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(60));
        assert_eq!(policy.delay_for(2), Duration::from_secs(120));
        assert_eq!(policy.delay_for(3), Duration::from_secs(240));
        assert_eq!(policy.delay_for(4), Duration::from_secs(300));
        assert_eq!(policy.delay_for(40), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = run_with_retry(&fast_retry(3), "e1", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(SchedulerError::Transient("sled busy".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = run_with_retry(&fast_retry(3), "e2", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(SchedulerError::permanent("bad payload")) }
        })
        .await;
        assert!(matches!(result, Err(SchedulerError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_budget_is_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = run_with_retry(&fast_retry(2), "e3", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(SchedulerError::Transient("down".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    fn card(id: &str, reps: u32, ease: f64, reviewed: Option<DateTime<Utc>>) -> Flashcard {
        Flashcard {
            id: id.into(),
            user_id: "u1".into(),
            front: id.into(),
            tags: vec![],
            ease_factor: ease,
            repetitions: reps,
            interval_days: 1,
            next_review_date: None,
            last_reviewed_at: reviewed,
            created_at: Utc::now(),
        }
    }

    fn attempt(topic: &str, score: f64, at: DateTime<Utc>) -> QuizAttempt {
        QuizAttempt {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: "u1".into(),
            quiz_id: "q".into(),
            topic: Some(topic.into()),
            score_percentage: score,
            time_spent_minutes: 10,
            completed_at: at,
        }
    }

    #[test]
    fn profile_tracks_rates_topics_and_velocity() {
        let now = Utc::now();
        let policy = SchedulerPolicy::default();
        let mut profile = LearningProfile::new("u1", 30, now);
        let cards = vec![
            card("a", 4, 2.5, Some(now)),
            card("b", 0, 2.3, Some(now - ChronoDuration::days(1))),
            card("c", 0, 2.5, None),
        ];
        let attempts = vec![attempt("Verbs", 50.0, now), attempt("Food", 90.0, now)];
        let payload = EventPayload::QuizCompleted(QuizCompleted {
            attempt: attempts[0].clone(),
        });

        update_profile(&mut profile, &payload, &cards, &attempts, now, &policy);

        assert_eq!(profile.total_quizzes, 1);
        assert_eq!(profile.current_streak_days, 1);
        assert!((profile.accuracy_rate - 70.0).abs() < 1e-9);
        assert!((profile.retention_rate - 50.0).abs() < 1e-9);
        assert_eq!(profile.weak_topics, vec!["Verbs".to_string()]);
        assert_eq!(profile.strong_topics, vec!["Food".to_string()]);
        // 1 mastered card over 2 active days
        assert!((profile.learning_velocity - 0.5).abs() < 1e-9);
    }

    #[test]
    fn review_event_counts_review_and_keeps_accuracy_without_quizzes() {
        let now = Utc::now();
        let policy = SchedulerPolicy::default();
        let mut profile = LearningProfile::new("u1", 30, now);
        profile.accuracy_rate = 77.0;
        let reviewed = card("a", 1, 2.5, Some(now));
        let payload = EventPayload::FlashcardReviewed(FlashcardReviewed {
            card: reviewed.clone(),
            minutes_spent: 1,
        });

        update_profile(&mut profile, &payload, &[reviewed], &[], now, &policy);
        assert_eq!(profile.total_reviews, 1);
        assert_eq!(profile.accuracy_rate, 77.0);
        assert_eq!(profile.retention_rate, 100.0);
    }
}
