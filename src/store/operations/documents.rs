use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::keys;
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl Store {
    pub fn upsert_document(&self, document: &Document) -> Result<(), StoreError> {
        let key = keys::document_key(
            &document.user_id,
            document.created_at.timestamp_millis(),
            &document.id,
        )?;
        self.documents
            .insert(key.as_bytes(), Self::serialize(document)?)?;
        Ok(())
    }

    /// Most recently created documents first.
    pub fn recent_documents(&self, user_id: &str, limit: usize) -> Result<Vec<Document>, StoreError> {
        let prefix = keys::user_prefix(user_id)?;
        let mut documents = Vec::with_capacity(limit);
        for item in self.documents.scan_prefix(prefix.as_bytes()).take(limit) {
            let (_, value) = item?;
            documents.push(Self::deserialize::<Document>(&value)?);
        }
        Ok(documents)
    }
}
