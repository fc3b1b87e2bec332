//! Startup expiry of persisted user data.
//!
//! Link feedback and the instruction-template override are dropped once the
//! retention window has passed since the last clear. Runs before the
//! feedback store loads.

use chrono::{DateTime, Duration, Utc};

use crate::core::storage::{keys, KeyValueStore};

const MAX_RETENTION_HOURS: u64 = 24 * 365 * 100;

/// Clear stale feedback and template override.
///
/// Returns `true` when data was cleared. A missing or unparseable stamp counts
/// as stale. `retention_hours == 0` disables expiry. Storage faults are logged
/// and never propagated.
pub async fn expire_stale_data(
    store: &dyn KeyValueStore,
    retention_hours: u64,
    now: DateTime<Utc>,
) -> bool {
    if retention_hours == 0 {
        return false;
    }

    let last_clear = match store.get(keys::LAST_DATA_CLEAR).await {
        Ok(Some(raw)) => DateTime::parse_from_rfc3339(raw.trim())
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| log::warn!("Ignoring unparseable retention stamp {raw:?}: {e}"))
            .ok(),
        Ok(None) => None,
        Err(e) => {
            log::warn!("Could not read retention stamp: {e}");
            None
        }
    };

    // Clamp to a century; chrono panics on out-of-range durations
    let window = Duration::hours(retention_hours.min(MAX_RETENTION_HOURS) as i64);
    let stale = match last_clear {
        Some(at) => now.signed_duration_since(at) > window,
        None => true,
    };
    if !stale {
        return false;
    }

    for key in [keys::CUSTOM_SYSTEM_PROMPT, keys::LINK_FEEDBACK] {
        if let Err(e) = store.remove(key).await {
            log::warn!("Could not expire {key}: {e}");
        }
    }
    if let Err(e) = store.set(keys::LAST_DATA_CLEAR, &now.to_rfc3339()).await {
        log::warn!("Could not write retention stamp: {e}");
    }

    log::info!("Expired stored feedback and template override (older than {retention_hours}h)");
    true
}
