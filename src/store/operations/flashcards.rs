use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::ConflictableTransactionError;
use sled::Transactional;

use crate::store::keys;
use crate::store::{map_tx_error, tx_deserialize, Store, StoreError};

/// Replica of a flashcard owned by the spaced-repetition service. Only the
/// fields the scheduler reads are kept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Flashcard {
    pub id: String,
    pub user_id: String,
    pub front: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub ease_factor: f64,
    pub repetitions: u32,
    pub interval_days: u32,
    pub next_review_date: Option<DateTime<Utc>>,
    pub last_reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Flashcard {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_review_date.is_some_and(|due| due <= now)
    }

    pub fn is_mastered(&self, min_repetitions: u32, min_ease: f64) -> bool {
        self.repetitions >= min_repetitions && self.ease_factor >= min_ease
    }

    pub fn has_tag(&self, topic: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(topic))
    }
}

fn due_index_key_for_card(card: &Flashcard) -> Result<Option<String>, StoreError> {
    match card.next_review_date {
        Some(next_review_date) => Ok(Some(keys::flashcard_due_index_key(
            &card.user_id,
            next_review_date.timestamp_millis(),
            &card.id,
        )?)),
        None => Ok(None),
    }
}

impl Store {
    pub fn get_flashcard(&self, user_id: &str, card_id: &str) -> Result<Option<Flashcard>, StoreError> {
        let key = keys::flashcard_key(user_id, card_id)?;
        match self.flashcards.get(key.as_bytes())? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    /// Write the card and move its due-index entry in one transaction.
    pub fn upsert_flashcard(&self, card: &Flashcard) -> Result<(), StoreError> {
        let key = keys::flashcard_key(&card.user_id, &card.id)?;
        let value = Self::serialize(card)?;
        let next_due_index_key = due_index_key_for_card(card)?;

        (&self.flashcards, &self.flashcard_due_index)
            .transaction(|(tx_cards, tx_due_index)| {
                if let Some(old_raw) = tx_cards.get(key.as_bytes())? {
                    let old_card: Flashcard = tx_deserialize(&old_raw)?;
                    if let Some(old_key) =
                        due_index_key_for_card(&old_card).map_err(ConflictableTransactionError::Abort)?
                    {
                        tx_due_index.remove(old_key.as_bytes())?;
                    }
                }

                tx_cards.insert(key.as_bytes(), value.as_slice())?;

                if let Some(due_key) = &next_due_index_key {
                    tx_due_index.insert(due_key.as_bytes(), &[] as &[u8])?;
                }
                Ok(())
            })
            .map_err(map_tx_error)
    }

    pub fn delete_flashcard(&self, user_id: &str, card_id: &str) -> Result<bool, StoreError> {
        let key = keys::flashcard_key(user_id, card_id)?;

        (&self.flashcards, &self.flashcard_due_index)
            .transaction(|(tx_cards, tx_due_index)| {
                let Some(raw) = tx_cards.remove(key.as_bytes())? else {
                    return Ok(false);
                };
                let removed: Flashcard = tx_deserialize(&raw)?;
                if let Some(due_key) =
                    due_index_key_for_card(&removed).map_err(ConflictableTransactionError::Abort)?
                {
                    tx_due_index.remove(due_key.as_bytes())?;
                }
                Ok(true)
            })
            .map_err(map_tx_error)
    }

    pub fn list_flashcards(&self, user_id: &str) -> Result<Vec<Flashcard>, StoreError> {
        let prefix = keys::user_prefix(user_id)?;
        let mut cards = Vec::new();
        for item in self.flashcards.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item?;
            cards.push(Self::deserialize::<Flashcard>(&value)?);
        }
        Ok(cards)
    }

    /// Cards due at `now`, earliest first, at most `limit`.
    ///
    /// Index entries that no longer match the stored card (stale after a
    /// concurrent update) are skipped.
    pub fn due_flashcards(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Flashcard>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let prefix = keys::user_prefix(user_id)?;
        let now_ms = now.timestamp_millis().max(0);
        let mut due = Vec::with_capacity(limit);
        let mut seen = HashSet::new();

        for item in self.flashcard_due_index.scan_prefix(prefix.as_bytes()) {
            let (key, _) = item?;
            let Some((due_ts_ms, card_id)) = keys::parse_due_index_key(&key) else {
                continue;
            };
            if due_ts_ms > now_ms {
                break;
            }

            if let Some(card) = self.get_flashcard(user_id, &card_id)? {
                let card_due_ms = card
                    .next_review_date
                    .map(|d| d.timestamp_millis().max(0));
                if card_due_ms == Some(due_ts_ms) && seen.insert(card_id) {
                    due.push(card);
                    if due.len() >= limit {
                        break;
                    }
                }
            }
        }

        Ok(due)
    }

    /// Total number of due cards, without the candidate cap.
    pub fn count_due_flashcards(&self, user_id: &str, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let prefix = keys::user_prefix(user_id)?;
        let now_ms = now.timestamp_millis().max(0);
        let mut count = 0usize;
        for item in self.flashcard_due_index.scan_prefix(prefix.as_bytes()) {
            let (key, _) = item?;
            match keys::parse_due_index_key(&key) {
                Some((ts, _)) if ts <= now_ms => count += 1,
                Some(_) => break,
                None => continue,
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use tempfile::tempdir;

    use super::*;

    fn card(user: &str, id: &str, due_in_minutes: Option<i64>) -> Flashcard {
        let now = Utc::now();
        Flashcard {
            id: id.to_string(),
            user_id: user.to_string(),
            front: format!("front {id}"),
            tags: vec!["Grammar".to_string()],
            ease_factor: 2.5,
            repetitions: 1,
            interval_days: 1,
            next_review_date: due_in_minutes.map(|m| now + Duration::minutes(m)),
            last_reviewed_at: None,
            created_at: now,
        }
    }

    #[test]
    fn due_flashcards_are_earliest_first_and_limited() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("db").to_str().unwrap()).unwrap();
        store.upsert_flashcard(&card("u1", "c1", Some(-10))).unwrap();
        store.upsert_flashcard(&card("u1", "c2", Some(-60))).unwrap();
        store.upsert_flashcard(&card("u1", "c3", Some(60))).unwrap();
        store.upsert_flashcard(&card("u1", "c4", None)).unwrap();
        store.upsert_flashcard(&card("u2", "c5", Some(-5))).unwrap();

        let due = store.due_flashcards("u1", Utc::now(), 10).unwrap();
        let ids: Vec<_> = due.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c2", "c1"]);

        assert_eq!(store.due_flashcards("u1", Utc::now(), 1).unwrap().len(), 1);
        assert_eq!(store.count_due_flashcards("u1", Utc::now()).unwrap(), 2);
    }

    #[test]
    fn due_and_mastery_checks() {
        let now = Utc::now();
        assert!(card("u1", "c1", Some(-1)).is_due(now));
        assert!(!card("u1", "c2", Some(30)).is_due(now));
        assert!(!card("u1", "c3", None).is_due(now));

        let mut c = card("u1", "c4", None);
        assert!(!c.is_mastered(3, 2.5));
        c.repetitions = 3;
        assert!(c.is_mastered(3, 2.5));
    }

    #[test]
    fn rescheduled_card_leaves_due_set() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("db-move").to_str().unwrap()).unwrap();
        let mut c = card("u1", "c1", Some(-10));
        store.upsert_flashcard(&c).unwrap();
        assert_eq!(store.due_flashcards("u1", Utc::now(), 10).unwrap().len(), 1);

        c.next_review_date = Some(Utc::now() + Duration::days(3));
        store.upsert_flashcard(&c).unwrap();
        assert!(store.due_flashcards("u1", Utc::now(), 10).unwrap().is_empty());
        assert_eq!(store.flashcard_due_index.len(), 1);
    }

    #[test]
    fn deleted_card_disappears_from_index() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("db-del").to_str().unwrap()).unwrap();
        store.upsert_flashcard(&card("u1", "c1", Some(-10))).unwrap();
        assert!(store.delete_flashcard("u1", "c1").unwrap());
        assert!(!store.delete_flashcard("u1", "c1").unwrap());
        assert!(store.flashcard_due_index.is_empty());
    }
}
