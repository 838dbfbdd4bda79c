//! 学习事件：由复习/测验动作产生，异步驱动目标、推荐与计划的重算。

pub mod recompute;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::SchedulerError;
use crate::store::operations::flashcards::Flashcard;
use crate::store::operations::quiz_attempts::QuizAttempt;

pub use recompute::{RecomputeWorker, RetryPolicy};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LearningEventKind {
    FlashcardReviewed,
    QuizCompleted,
}

impl LearningEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FlashcardReviewed => "flashcard_reviewed",
            Self::QuizCompleted => "quiz_completed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningEvent {
    pub id: String,
    pub user_id: String,
    pub kind: LearningEventKind,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl LearningEvent {
    pub fn new(user_id: &str, kind: LearningEventKind, payload: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            kind,
            payload,
            occurred_at: Utc::now(),
        }
    }

    /// Decode the payload for this event's kind. A payload that does not
    /// match, or that belongs to another user, is a permanent failure.
    pub fn decode(&self) -> Result<EventPayload, SchedulerError> {
        let payload = match self.kind {
            LearningEventKind::FlashcardReviewed => EventPayload::FlashcardReviewed(
                serde_json::from_value(self.payload.clone()).map_err(|e| {
                    SchedulerError::permanent(format!("malformed flashcard_reviewed payload: {e}"))
                })?,
            ),
            LearningEventKind::QuizCompleted => EventPayload::QuizCompleted(
                serde_json::from_value(self.payload.clone()).map_err(|e| {
                    SchedulerError::permanent(format!("malformed quiz_completed payload: {e}"))
                })?,
            ),
        };
        if payload.owner() != self.user_id {
            return Err(SchedulerError::permanent(format!(
                "payload owner {} does not match event user {}",
                payload.owner(),
                self.user_id
            )));
        }
        Ok(payload)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlashcardReviewed {
    /// Card state after the review, as scheduled by the memory algorithm.
    pub card: Flashcard,
    #[serde(default)]
    pub minutes_spent: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizCompleted {
    pub attempt: QuizAttempt,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    FlashcardReviewed(FlashcardReviewed),
    QuizCompleted(QuizCompleted),
}

impl EventPayload {
    fn owner(&self) -> &str {
        match self {
            Self::FlashcardReviewed(p) => &p.card.user_id,
            Self::QuizCompleted(p) => &p.attempt.user_id,
        }
    }

    pub fn minutes_spent(&self) -> u32 {
        match self {
            Self::FlashcardReviewed(p) => p.minutes_spent,
            Self::QuizCompleted(p) => p.attempt.time_spent_minutes,
        }
    }

    pub fn activity_at(&self, fallback: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::FlashcardReviewed(p) => p.card.last_reviewed_at.unwrap_or(fallback),
            Self::QuizCompleted(p) => p.attempt.completed_at,
        }
    }
}

/// Producer side of the recompute queue. Enqueueing never blocks and never
/// fails the caller.
#[derive(Clone)]
pub struct EventQueue {
    sender: mpsc::Sender<LearningEvent>,
}

impl EventQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<LearningEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    pub fn enqueue(&self, user_id: &str, kind: LearningEventKind, payload: serde_json::Value) {
        self.publish(LearningEvent::new(user_id, kind, payload));
    }

    pub fn publish(&self, event: LearningEvent) {
        let event_id = event.id.clone();
        let kind = event.kind.as_str();
        match self.sender.try_send(event) {
            Ok(()) => tracing::debug!(event_id = %event_id, kind, "Learning event enqueued"),
            Err(mpsc::error::TrySendError::Full(ev)) => tracing::warn!(
                event_id = %event_id,
                user_id = %ev.user_id,
                kind,
                "Recompute queue full, dropping learning event"
            ),
            Err(mpsc::error::TrySendError::Closed(ev)) => tracing::error!(
                event_id = %event_id,
                user_id = %ev.user_id,
                kind,
                "Recompute queue closed, dropping learning event"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn card_json(user: &str) -> serde_json::Value {
        json!({
            "card": {
                "id": "c1",
                "userId": user,
                "front": "hola",
                "tags": ["Spanish"],
                "easeFactor": 2.6,
                "repetitions": 3,
                "intervalDays": 6,
                "nextReviewDate": "2026-06-20T00:00:00Z",
                "lastReviewedAt": "2026-06-14T09:00:00Z",
                "createdAt": "2026-06-01T00:00:00Z"
            },
            "minutesSpent": 2
        })
    }

    #[test]
    fn decodes_flashcard_payload() {
        let event = LearningEvent::new("u1", LearningEventKind::FlashcardReviewed, card_json("u1"));
        let payload = event.decode().unwrap();
        assert_eq!(payload.minutes_spent(), 2);
        match payload {
            EventPayload::FlashcardReviewed(p) => assert_eq!(p.card.repetitions, 3),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn malformed_or_foreign_payload_is_permanent() {
        let bad = LearningEvent::new("u1", LearningEventKind::QuizCompleted, json!({"score": 1}));
        let err = bad.decode().unwrap_err();
        assert!(matches!(err, SchedulerError::Permanent(_)));
        assert!(!err.is_retryable());

        let foreign = LearningEvent::new("u1", LearningEventKind::FlashcardReviewed, card_json("u2"));
        assert!(matches!(foreign.decode(), Err(SchedulerError::Permanent(_))));
    }

    #[tokio::test]
    async fn enqueue_never_fails_the_caller() {
        let (queue, mut rx) = EventQueue::new(1);
        queue.enqueue("u1", LearningEventKind::QuizCompleted, json!({}));
        // 队列已满：丢弃并记录日志
        queue.enqueue("u1", LearningEventKind::QuizCompleted, json!({}));
        assert!(rx.recv().await.is_some());

        drop(rx);
        queue.enqueue("u1", LearningEventKind::QuizCompleted, json!({}));
    }
}
