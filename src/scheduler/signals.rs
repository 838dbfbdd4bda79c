//! Learning signals read from the collaborator replicas: due cards, quiz
//! topic averages, and recently studied topics.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::store::operations::flashcards::Flashcard;
use crate::store::operations::quiz_attempts::QuizAttempt;
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Default)]
pub struct DueItems {
    /// Earliest due first, capped at the candidate limit.
    pub cards: Vec<Flashcard>,
    /// Every due card, uncapped.
    pub total_due: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicScore {
    pub topic: String,
    pub average_score: f64,
    pub attempts: usize,
}

pub fn load_due_items(
    store: &Store,
    user_id: &str,
    now: DateTime<Utc>,
    cap: usize,
) -> Result<DueItems, StoreError> {
    Ok(DueItems {
        cards: store.due_flashcards(user_id, now, cap)?,
        total_due: store.count_due_flashcards(user_id, now)?,
    })
}

pub fn load_attempts(
    store: &Store,
    user_id: &str,
    now: DateTime<Utc>,
    lookback_days: i64,
) -> Result<Vec<QuizAttempt>, StoreError> {
    store.quiz_attempts_since(user_id, now - Duration::days(lookback_days))
}

/// Average score per topic; attempts without a topic are ignored.
/// Sorted by ascending average, then topic name.
pub fn topic_scores(attempts: &[QuizAttempt]) -> Vec<TopicScore> {
    let mut groups: HashMap<&str, (f64, usize)> = HashMap::new();
    for attempt in attempts {
        let Some(topic) = attempt.topic.as_deref() else {
            continue;
        };
        let entry = groups.entry(topic).or_insert((0.0, 0));
        entry.0 += attempt.score_percentage;
        entry.1 += 1;
    }

    let mut scores: Vec<TopicScore> = groups
        .into_iter()
        .map(|(topic, (sum, n))| TopicScore {
            topic: topic.to_string(),
            average_score: sum / n as f64,
            attempts: n,
        })
        .collect();
    scores.sort_by(|a, b| {
        a.average_score
            .total_cmp(&b.average_score)
            .then_with(|| a.topic.cmp(&b.topic))
    });
    scores
}

/// Lowest-scoring topics under `threshold` with enough attempts.
pub fn weak_topics(
    scores: &[TopicScore],
    threshold: f64,
    min_attempts: usize,
    cap: usize,
) -> Vec<TopicScore> {
    scores
        .iter()
        .filter(|s| s.average_score < threshold && s.attempts >= min_attempts)
        .take(cap)
        .cloned()
        .collect()
}

pub fn strong_topics(scores: &[TopicScore], threshold: f64) -> Vec<String> {
    scores
        .iter()
        .filter(|s| s.average_score >= threshold)
        .map(|s| s.topic.clone())
        .collect()
}

/// Topics touched since `since`, most recent first, deduplicated
/// case-insensitively. Quiz topics and reviewed card tags both count.
pub fn recent_topics(
    attempts: &[QuizAttempt],
    cards: &[Flashcard],
    since: DateTime<Utc>,
    cap: usize,
) -> Vec<String> {
    let mut touched: Vec<(DateTime<Utc>, &str)> = Vec::new();
    for attempt in attempts.iter().filter(|a| a.completed_at >= since) {
        if let Some(topic) = attempt.topic.as_deref() {
            touched.push((attempt.completed_at, topic));
        }
    }
    for card in cards {
        if let Some(reviewed) = card.last_reviewed_at.filter(|r| *r >= since) {
            for tag in &card.tags {
                touched.push((reviewed, tag.as_str()));
            }
        }
    }
    touched.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));

    let mut topics: Vec<String> = Vec::new();
    for (_, topic) in touched {
        if topics.iter().any(|t| t.eq_ignore_ascii_case(topic)) {
            continue;
        }
        topics.push(topic.to_string());
        if topics.len() >= cap {
            break;
        }
    }
    topics
}

/// Due cards grouped under every tag they carry (untagged cards under
/// "General"), largest group first. A card with two tags lands in both groups.
pub fn group_due_by_tag(cards: &[Flashcard]) -> Vec<(String, Vec<&Flashcard>)> {
    let mut groups: Vec<(String, Vec<&Flashcard>)> = Vec::new();
    for card in cards {
        let mut tags: Vec<&str> = card.tags.iter().map(String::as_str).collect();
        if tags.is_empty() {
            tags.push("General");
        }
        tags.sort_unstable();
        tags.dedup();
        for tag in tags {
            match groups.iter_mut().find(|(t, _)| t == tag) {
                Some((_, members)) => members.push(card),
                None => groups.push((tag.to_string(), vec![card])),
            }
        }
    }
    groups.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));
    groups
}

/// Most common tag across the given cards.
pub fn dominant_tag(cards: &[Flashcard]) -> Option<String> {
    group_due_by_tag(cards)
        .into_iter()
        .find(|(_, members)| members.iter().any(|c| !c.tags.is_empty()))
        .map(|(tag, _)| tag)
}
