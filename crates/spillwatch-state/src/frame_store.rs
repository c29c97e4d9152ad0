use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use spillwatch_types::frame::{FrameRecord, StreamState};
use tracing::debug;

#[derive(Debug, Default)]
struct Slot {
    frame: Option<Arc<FrameRecord>>,
    sequence: u64,
}

/// Single-slot holder for the latest frame plus the stream state.
///
/// Writers swap an `Arc` under the write lock; readers clone it under the
/// read lock, so a reader sees either the previous record or the new one.
/// Sequence numbers are assigned under the same lock and therefore grow in
/// visibility order. The detector flag travels inside the record, so it
/// always describes the frame that is current.
#[derive(Debug, Default)]
pub struct FrameStore {
    current: RwLock<Slot>,
    state: RwLock<StreamState>,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the current frame and returns the record now visible to readers.
    pub fn set_frame(
        &self,
        data: Bytes,
        width: u32,
        height: u32,
        captured_at: DateTime<Utc>,
        detected: bool,
    ) -> Arc<FrameRecord> {
        let (record, previous) = {
            let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
            slot.sequence += 1;
            let record = Arc::new(FrameRecord {
                sequence: slot.sequence,
                width,
                height,
                data,
                captured_at,
                detected,
            });
            (Arc::clone(&record), slot.frame.replace(record))
        };
        debug!(
            sequence = record.sequence,
            bytes = record.len(),
            detected,
            replaced = previous.map(|frame| frame.sequence),
            "frame stored"
        );
        record
    }

    pub fn frame(&self) -> Option<Arc<FrameRecord>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .frame
            .clone()
    }

    pub fn has_frame(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .frame
            .is_some()
    }

    /// Age of the current frame relative to `now`, if any frame exists.
    pub fn age_seconds(&self, now: DateTime<Utc>) -> Option<f64> {
        self.frame().map(|frame| frame.age_seconds(now))
    }

    pub fn set_active(&self, active: bool) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = if active {
            StreamState::Active
        } else {
            StreamState::Stopped
        };
    }

    /// Moves a never-started stream to `Active`. An explicit stop is kept.
    /// Returns whether the stream is active afterwards.
    pub fn activate_if_idle(&self) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *state == StreamState::Idle {
            *state = StreamState::Active;
        }
        state.is_active()
    }

    pub fn is_active(&self) -> bool {
        self.stream_state().is_active()
    }

    pub fn stream_state(&self) -> StreamState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Detector flag of the current frame; `false` before the first upload.
    pub fn detection_active(&self) -> bool {
        self.frame().is_some_and(|frame| frame.detected)
    }
}
