use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The single most recent camera capture. Replaced wholesale on every
/// accepted upload, never mutated in place.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    /// Position of this frame in the store's upload order, starting at 1.
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Encoded JPEG payload exactly as uploaded.
    pub data: Bytes,
    pub captured_at: DateTime<Utc>,
    /// Detector flag sent with this upload.
    pub detected: bool,
}

impl FrameRecord {
    /// Seconds elapsed between capture and `now`. Clock skew never yields a
    /// negative age.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = now - self.captured_at;
        match elapsed.num_microseconds() {
            Some(us) => (us as f64 / 1_000_000.0).max(0.0),
            None => elapsed.num_seconds().max(0) as f64,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Whether viewers are being fed frames.
///
/// `Idle` is the boot state: the first accepted upload promotes it to
/// `Active`. Once an operator stops the stream it stays `Stopped` until an
/// explicit start, even while uploads keep arriving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    #[default]
    Idle,
    Active,
    Stopped,
}

impl StreamState {
    pub fn is_active(self) -> bool {
        matches!(self, StreamState::Active)
    }
}
