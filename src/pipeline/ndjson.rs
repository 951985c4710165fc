//! Newline-delimited JSON rendering and raw batch persistence
//!
//! One JSON object per line, lines joined by a single `\n`, no enclosing
//! array and no trailing newline. Batches land under
//! `raw/coins_<unix-seconds>.json`; a second batch in the same second gets
//! `raw/coins_<unix-seconds>_1.json`, then `_2`, and so on.

use super::object_store::{ObjectLocation, ObjectStore, StoreError};
use super::types::AssetSnapshotRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

pub const RAW_CONTENT_TYPE: &str = "text/plain";

/// Suffixes tried before giving up on a free key
const MAX_KEY_ATTEMPTS: u32 = 100;

#[derive(Debug)]
pub enum PersistError {
    Serialization(serde_json::Error),
    Store(StoreError),
    KeysExhausted(String),
}

impl From<serde_json::Error> for PersistError {
    fn from(err: serde_json::Error) -> Self {
        PersistError::Serialization(err)
    }
}

impl From<StoreError> for PersistError {
    fn from(err: StoreError) -> Self {
        PersistError::Store(err)
    }
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistError::Serialization(e) => write!(f, "Serialization error: {}", e),
            PersistError::Store(e) => write!(f, "Storage error: {}", e),
            PersistError::KeysExhausted(base) => {
                write!(f, "No free object key after {} attempts for {}", MAX_KEY_ATTEMPTS, base)
            }
        }
    }
}

impl std::error::Error for PersistError {}

/// Render records as newline-delimited JSON
pub fn render_ndjson<T: Serialize>(records: &[T]) -> Result<String, serde_json::Error> {
    let lines = records
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(lines.join("\n"))
}

/// Object key for a batch captured at `captured_at`; `attempt` > 0 adds a suffix
pub fn batch_key(captured_at: DateTime<Utc>, attempt: u32) -> String {
    let secs = captured_at.timestamp();
    if attempt == 0 {
        format!("raw/coins_{}.json", secs)
    } else {
        format!("raw/coins_{}_{}.json", secs, attempt)
    }
}

/// Serialize `records` and write them as one immutable raw batch
///
/// Returns the location of the new object. Never overwrites an earlier batch.
pub async fn persist_batch(
    store: &dyn ObjectStore,
    records: &[AssetSnapshotRecord],
    captured_at: DateTime<Utc>,
) -> Result<ObjectLocation, PersistError> {
    let document = render_ndjson(records)?;

    for attempt in 0..MAX_KEY_ATTEMPTS {
        let key = batch_key(captured_at, attempt);

        match store.put(&key, document.as_bytes(), RAW_CONTENT_TYPE).await {
            Ok(location) => {
                log::info!(
                    "💾 Raw batch saved: {} ({} records, {} bytes)",
                    location,
                    records.len(),
                    document.len()
                );
                return Ok(location);
            }
            Err(StoreError::AlreadyExists(_)) => {
                log::debug!("Key {} taken, trying next suffix", key);
            }
            Err(e) => return Err(PersistError::Store(e)),
        }
    }

    Err(PersistError::KeysExhausted(batch_key(captured_at, 0)))
}
