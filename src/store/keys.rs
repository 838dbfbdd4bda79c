use chrono::NaiveDate;

use crate::constants::DATE_KEY_FORMAT;
use crate::store::StoreError;

fn segment(value: &str, field: &str) -> Result<(), StoreError> {
    if value.is_empty() {
        return Err(StoreError::Validation(format!("{field} must not be empty")));
    }
    if value.contains(':') {
        return Err(StoreError::Validation(format!(
            "{field} must not contain ':'"
        )));
    }
    Ok(())
}

fn reverse_ts(timestamp_ms: i64) -> u64 {
    u64::MAX - timestamp_ms.max(0) as u64
}

pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_KEY_FORMAT).to_string()
}

pub fn user_prefix(user_id: &str) -> Result<String, StoreError> {
    segment(user_id, "user_id")?;
    Ok(format!("{}:", user_id))
}

pub fn profile_key(user_id: &str) -> Result<String, StoreError> {
    segment(user_id, "user_id")?;
    Ok(user_id.to_string())
}

pub fn goal_key(user_id: &str, goal_id: &str) -> Result<String, StoreError> {
    segment(user_id, "user_id")?;
    segment(goal_id, "goal_id")?;
    Ok(format!("{}:{}", user_id, goal_id))
}

pub fn schedule_key(user_id: &str, schedule_id: &str) -> Result<String, StoreError> {
    segment(user_id, "user_id")?;
    segment(schedule_id, "schedule_id")?;
    Ok(format!("{}:{}", user_id, schedule_id))
}

pub fn active_schedule_key(user_id: &str) -> Result<String, StoreError> {
    segment(user_id, "user_id")?;
    Ok(user_id.to_string())
}

/// `{user_id}:{YYYY-MM-DD}`, lexicographic order equals date order.
pub fn daily_plan_key(user_id: &str, date: NaiveDate) -> Result<String, StoreError> {
    segment(user_id, "user_id")?;
    Ok(format!("{}:{}", user_id, date_key(date)))
}

pub fn recommendation_key(user_id: &str, recommendation_id: &str) -> Result<String, StoreError> {
    segment(user_id, "user_id")?;
    segment(recommendation_id, "recommendation_id")?;
    Ok(format!("{}:{}", user_id, recommendation_id))
}

pub fn flashcard_key(user_id: &str, card_id: &str) -> Result<String, StoreError> {
    segment(user_id, "user_id")?;
    segment(card_id, "card_id")?;
    Ok(format!("{}:{}", user_id, card_id))
}

pub fn flashcard_due_index_key(
    user_id: &str,
    due_ts_ms: i64,
    card_id: &str,
) -> Result<String, StoreError> {
    segment(user_id, "user_id")?;
    segment(card_id, "card_id")?;
    Ok(format!(
        "{}:{:020}:{}",
        user_id,
        due_ts_ms.max(0) as u64,
        card_id
    ))
}

/// Parse `{user_id}:{due_ts:020}:{card_id}` into `(due_ts_ms, card_id)`.
pub fn parse_due_index_key(key: &[u8]) -> Option<(i64, String)> {
    let text = std::str::from_utf8(key).ok()?;
    let mut parts = text.splitn(3, ':');
    let _user = parts.next()?;
    let ts = parts.next()?.parse::<u64>().ok()?;
    let card_id = parts.next()?;
    Some((i64::try_from(ts).ok()?, card_id.to_string()))
}

pub fn quiz_attempt_key(
    user_id: &str,
    completed_at_ms: i64,
    attempt_id: &str,
) -> Result<String, StoreError> {
    segment(user_id, "user_id")?;
    segment(attempt_id, "attempt_id")?;
    Ok(format!(
        "{}:{:020}:{}",
        user_id,
        reverse_ts(completed_at_ms),
        attempt_id
    ))
}

pub fn document_key(
    user_id: &str,
    created_at_ms: i64,
    document_id: &str,
) -> Result<String, StoreError> {
    segment(user_id, "user_id")?;
    segment(document_id, "document_id")?;
    Ok(format!(
        "{}:{:020}:{}",
        user_id,
        reverse_ts(created_at_ms),
        document_id
    ))
}
