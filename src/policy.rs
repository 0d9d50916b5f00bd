//! Sync necessity policy
//!
//! Decides whether a golden copy should be refreshed. The decision itself is a
//! pure function of what the ledger says; gathering those inputs is the
//! caller's job (see `GoldenCopyManager::needs_sync`).

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Default minimum time between syncs.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(24 * 60 * 60);

/// Reason given when no golden copy exists yet.
pub const INITIAL_SYNC: &str = "initial sync";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncDecision {
    pub needs_sync: bool,
    pub reason: String,
}

impl SyncDecision {
    fn needed(reason: impl Into<String>) -> Self {
        Self {
            needs_sync: true,
            reason: reason.into(),
        }
    }

    fn not_needed(reason: impl Into<String>) -> Self {
        Self {
            needs_sync: false,
            reason: reason.into(),
        }
    }
}

/// Evaluate the policy.
///
/// * `exists` - whether the golden database exists
/// * `last_sync` - timestamp of the newest ledger row, if any
#[must_use]
pub fn evaluate(
    exists: bool,
    last_sync: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> SyncDecision {
    if !exists {
        return SyncDecision::needed(INITIAL_SYNC);
    }
    let Some(last_sync) = last_sync else {
        return SyncDecision::needed("golden copy exists but has no sync metadata");
    };

    // A clock that went backwards counts as "just synced".
    let elapsed = (now - last_sync).to_std().unwrap_or(Duration::ZERO);

    if elapsed >= cooldown {
        SyncDecision::needed(format!(
            "last sync was {} ago (cooldown {})",
            format_duration(elapsed),
            format_duration(cooldown)
        ))
    } else {
        SyncDecision::not_needed(format!(
            "last sync was {} ago, within cooldown of {}",
            format_duration(elapsed),
            format_duration(cooldown)
        ))
    }
}

/// Human-readable duration: `3d 4h`, `2h 5m`, `12m`, `40s`.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (days, hours, minutes) = (secs / 86_400, (secs % 86_400) / 3_600, (secs % 3_600) / 60);
    match (days, hours, minutes) {
        (0, 0, 0) => format!("{}s", secs),
        (0, 0, m) => format!("{}m", m),
        (0, h, m) => format!("{}h {}m", h, m),
        (d, h, _) => format!("{}d {}h", d, h),
    }
}
