// src/algorithms/metadata.rs

//! Per-subject bookkeeping kept next to the limiter state, plus the sweep that
//! removes entries for subjects that have gone quiet.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ensure_key, Result};
use crate::storage::StorageBackend;

/// Key prefix for metadata entries
pub const METADATA_PREFIX: &str = "rate_meta:";

/// Entries untouched for this long are removed by a sweep
pub const DEFAULT_METADATA_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 3600);

/// Last activity seen for one subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitMetadata {
    pub last_endpoint: String,
    /// Milliseconds since the Unix epoch
    pub updated_at: i64,
}

/// Records that `subject` hit `endpoint` at `now_millis`
pub async fn record_metadata<S: StorageBackend>(
    storage: &S,
    subject: &str,
    endpoint: &str,
    now_millis: i64,
) -> Result<()> {
    ensure_key(subject)?;
    let entry = RateLimitMetadata {
        last_endpoint: endpoint.to_string(),
        updated_at: now_millis,
    };
    let payload = serde_json::to_vec(&entry)?;
    storage
        .set(&format!("{}{}", METADATA_PREFIX, subject), &payload, None)
        .await
}

/// Deletes metadata entries older than `max_age`, and entries that cannot be
/// parsed. Returns how many were deleted.
pub async fn sweep_stale_metadata<S: StorageBackend>(
    storage: &S,
    max_age: Duration,
    now_millis: i64,
) -> Result<u64> {
    let cutoff = now_millis - max_age.as_millis() as i64;
    let keys = storage.scan_prefix(METADATA_PREFIX).await?;
    let scanned = keys.len();

    let mut stale = Vec::new();
    for key in keys {
        let Some(raw) = storage.get(&key).await? else {
            continue;
        };
        match serde_json::from_slice::<RateLimitMetadata>(&raw) {
            Ok(entry) if entry.updated_at < cutoff => stale.push(key),
            Ok(_) => {}
            Err(err) => {
                warn!(key = %key, error = %err, "Unreadable rate-limit metadata, removing");
                stale.push(key);
            }
        }
    }

    if stale.is_empty() {
        debug!(scanned, "Metadata sweep found nothing to remove");
        return Ok(0);
    }

    let removed = storage.delete_many(&stale).await?;
    info!(scanned, removed, "Swept stale rate-limit metadata");
    Ok(removed)
}
