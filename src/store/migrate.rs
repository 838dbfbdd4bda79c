//! Forward-only schema steps. The applied version lives in the `meta` tree.

use crate::store::operations::flashcards::Flashcard;
use crate::store::operations::schedules::StudySchedule;
use crate::store::{keys, Store, StoreError};

const SCHEMA_VERSION_KEY: &[u8] = b"schema:version";

struct Migration {
    name: &'static str,
    apply: fn(&Store) -> Result<(), StoreError>,
}

/// Position in this list is the version (1-based). Append only.
const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "initial_trees",
        apply: initial_trees,
    },
    Migration {
        name: "rebuild_flashcard_due_index",
        apply: rebuild_flashcard_due_index,
    },
    Migration {
        name: "rebuild_active_schedule_index",
        apply: rebuild_active_schedule_index,
    },
];

pub fn latest_version() -> u32 {
    MIGRATIONS.len() as u32
}

/// Apply every step newer than the stored version.
///
/// 每一步都必须可重复执行：步骤完成后、写版本号前崩溃，重启会再跑一次。
pub fn run(store: &Store) -> Result<(), StoreError> {
    let applied = schema_version(store)?;
    if applied > latest_version() {
        return Err(StoreError::Migration {
            version: applied,
            message: format!(
                "database is at schema {applied}, this build only knows {}",
                latest_version()
            ),
        });
    }

    for (version, step) in (1u32..).zip(MIGRATIONS.iter()).skip(applied as usize) {
        tracing::info!(version, name = step.name, "Applying migration");
        (step.apply)(store).map_err(|e| StoreError::Migration {
            version,
            message: format!("{}: {e}", step.name),
        })?;
        record_version(store, version)?;
    }
    if applied < latest_version() {
        tracing::info!(from = applied, to = latest_version(), "Schema up to date");
    }
    Ok(())
}

pub fn schema_version(store: &Store) -> Result<u32, StoreError> {
    let Some(raw) = store.meta.get(SCHEMA_VERSION_KEY)? else {
        return Ok(0);
    };
    let bytes: [u8; 4] = raw
        .as_ref()
        .try_into()
        .map_err(|_| StoreError::Migration {
            version: 0,
            message: "schema version marker is not 4 bytes".to_string(),
        })?;
    Ok(u32::from_be_bytes(bytes))
}

fn record_version(store: &Store, version: u32) -> Result<(), StoreError> {
    let current = schema_version(store)?;
    if version < current {
        return Err(StoreError::Migration {
            version,
            message: format!("schema version would go backwards ({current} -> {version})"),
        });
    }
    store
        .meta
        .insert(SCHEMA_VERSION_KEY, &version.to_be_bytes()[..])?;
    Ok(())
}

fn initial_trees(_store: &Store) -> Result<(), StoreError> {
    Ok(())
}

fn rebuild_flashcard_due_index(store: &Store) -> Result<(), StoreError> {
    let mut batch = sled::Batch::default();
    for item in store.flashcards.iter() {
        let (_, value) = item?;
        let card: Flashcard = Store::deserialize(&value)?;
        let Some(due) = card.next_review_date else {
            continue;
        };
        let key = keys::flashcard_due_index_key(&card.user_id, due.timestamp_millis(), &card.id)?;
        batch.insert(key.as_bytes(), &[] as &[u8]);
    }
    store.flashcard_due_index.apply_batch(batch)?;
    Ok(())
}

fn rebuild_active_schedule_index(store: &Store) -> Result<(), StoreError> {
    for item in store.schedules.iter() {
        let (_, value) = item?;
        let schedule: StudySchedule = Store::deserialize(&value)?;
        if schedule.is_active {
            let key = keys::active_schedule_key(&schedule.user_id)?;
            store
                .active_schedules
                .insert(key.as_bytes(), schedule.id.as_bytes())?;
        }
    }
    Ok(())
}
