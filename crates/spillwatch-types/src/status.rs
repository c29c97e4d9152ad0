use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time view composed from the frame store and the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub stream_active: bool,
    pub last_frame_time: Option<DateTime<Utc>>,
    pub frame_age_seconds: Option<f64>,
    pub server_time: DateTime<Utc>,
    pub detection_active: bool,
    pub total_events: usize,
}

/// Fractional seconds since the Unix epoch.
pub fn epoch_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}
