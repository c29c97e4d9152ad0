use std::path::PathBuf;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Second-granularity format shared by event ids and evidence file names.
pub const TOKEN_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Immutable record of one detection-flagged upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionEvent {
    /// Timestamp token, suffixed with `_<n>` when the second was already taken.
    pub id: String,
    pub detected_at: DateTime<Utc>,
    /// Evidence JPEG, fully written before the event was published.
    pub frame_path: PathBuf,
}

/// Read-only aggregate over the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionSummary {
    pub total_events: usize,
    pub last_detection: Option<DateTime<Utc>>,
}

impl DetectionSummary {
    pub fn from_events(events: &[DetectionEvent]) -> Self {
        Self {
            total_events: events.len(),
            last_detection: events.last().map(|event| event.detected_at),
        }
    }
}

pub fn timestamp_token(at: DateTime<Utc>) -> String {
    at.format(TOKEN_FORMAT).to_string()
}

/// Appends the collision counter to a base token; counter 0 is the bare token.
pub fn disambiguate(base: &str, counter: u32) -> String {
    if counter == 0 {
        base.to_string()
    } else {
        format!("{base}_{counter}")
    }
}

/// Splits an event id back into its second and collision counter.
pub fn parse_token(id: &str) -> Option<(DateTime<Utc>, u32)> {
    // "YYYYMMDD_HHMMSS" is 15 bytes
    let base = id.get(..15)?;
    let rest = id.get(15..)?;
    let counter = match rest {
        "" => 0,
        suffix => suffix.strip_prefix('_')?.parse().ok()?,
    };
    let naive = NaiveDateTime::parse_from_str(base, TOKEN_FORMAT).ok()?;
    Some((naive.and_utc(), counter))
}
