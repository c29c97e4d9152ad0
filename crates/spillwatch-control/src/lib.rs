//! Producer-facing control surface: authentication, frame intake, stream
//! toggling and the read-only status/history views.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::{GenericImageView, ImageFormat};
use spillwatch_state::{DetectionLedger, FrameStore};
use spillwatch_types::{
    config::AuthConfig,
    events::{DetectionEvent, DetectionSummary},
    frame::FrameRecord,
    status::StatusReport,
    Result, SpillwatchError,
};
use tracing::{debug, info, warn};

/// Result of an accepted upload.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub frame: Arc<FrameRecord>,
    pub event: Option<DetectionEvent>,
}

pub struct ControlSurface {
    store: Arc<FrameStore>,
    ledger: Arc<DetectionLedger>,
    auth: AuthConfig,
}

impl ControlSurface {
    pub fn new(store: Arc<FrameStore>, ledger: Arc<DetectionLedger>, auth: AuthConfig) -> Self {
        Self { store, ledger, auth }
    }

    pub fn store(&self) -> &Arc<FrameStore> {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<DetectionLedger> {
        &self.ledger
    }

    /// Plain comparison against the shared secret. A missing secret never
    /// matches.
    pub fn authenticate(&self, supplied: Option<&str>) -> bool {
        matches!(supplied, Some(secret) if secret == self.auth.camera_password)
    }

    fn require(&self, supplied: Option<&str>, action: &str) -> Result<()> {
        if self.authenticate(supplied) {
            Ok(())
        } else {
            warn!(action, secret_present = supplied.is_some(), "unauthorized request");
            Err(SpillwatchError::Unauthorized)
        }
    }

    /// Validates and stores an uploaded JPEG. Flagged uploads additionally
    /// get recorded in the detection ledger.
    ///
    /// Rejected uploads (bad secret, undecodable payload) leave every piece
    /// of state untouched.
    ///
    /// Once the payload validates, the frame becomes current and an idle
    /// stream is activated before the ledger is written. A ledger failure
    /// (`Persistence`, `DuplicateTimestamp`) is returned to the caller but
    /// does not roll that back. The frame stays current with its detection
    /// flag; only the event is missing from history.
    pub async fn upload_frame(
        &self,
        data: Bytes,
        detected: bool,
        auth: Option<&str>,
    ) -> Result<UploadOutcome> {
        self.require(auth, "upload_frame")?;
        let (width, height) = decode_dimensions(data.clone()).await?;
        let captured_at = Utc::now();

        let frame = self.store.set_frame(data, width, height, captured_at, detected);
        if !self.store.activate_if_idle() {
            debug!(sequence = frame.sequence, "frame stored while stream is stopped");
        }

        let event = if detected {
            Some(self.ledger.record(&frame.data, captured_at).await?)
        } else {
            None
        };
        Ok(UploadOutcome { frame, event })
    }

    pub fn start_stream(&self, secret: Option<&str>) -> Result<()> {
        self.require(secret, "start_stream")?;
        self.store.set_active(true);
        info!("stream started");
        Ok(())
    }

    pub fn stop_stream(&self, secret: Option<&str>) -> Result<()> {
        self.require(secret, "stop_stream")?;
        self.store.set_active(false);
        info!("stream stopped");
        Ok(())
    }

    /// Latest stored frame, or `StreamUnavailable` before the first upload.
    pub fn latest_frame(&self) -> Result<Arc<FrameRecord>> {
        self.store
            .frame()
            .ok_or_else(|| SpillwatchError::StreamUnavailable("no frame available".into()))
    }

    pub fn status(&self) -> StatusReport {
        self.status_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> StatusReport {
        let frame = self.store.frame();
        StatusReport {
            stream_active: self.store.is_active(),
            last_frame_time: frame.as_ref().map(|frame| frame.captured_at),
            frame_age_seconds: frame.as_ref().map(|frame| frame.age_seconds(now)),
            server_time: now,
            detection_active: self.store.detection_active(),
            total_events: self.ledger.len(),
        }
    }

    pub fn events(&self) -> Vec<DetectionEvent> {
        self.ledger.all_events()
    }

    pub fn summary(&self) -> DetectionSummary {
        self.ledger.summary()
    }
}

/// Fully decodes `data` as a JPEG off the async runtime and returns its size.
pub async fn decode_dimensions(data: Bytes) -> Result<(u32, u32)> {
    if data.is_empty() {
        return Err(invalid_image("empty payload"));
    }
    tokio::task::spawn_blocking(move || {
        image::load_from_memory_with_format(&data, ImageFormat::Jpeg)
            .map(|decoded| decoded.dimensions())
            .map_err(|err| invalid_image(err.to_string()))
    })
    .await
    .map_err(|err| SpillwatchError::Other(anyhow::anyhow!("decoder task failed: {err}")))?
}

pub fn invalid_image(message: impl Into<String>) -> SpillwatchError {
    SpillwatchError::InvalidImage(message.into())
}
