//! Multipart live feed: turns the frame store into one paced stream per viewer.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_stream::stream;
use bytes::{BufMut, Bytes, BytesMut};
use futures::{stream::BoxStream, StreamExt};
use spillwatch_state::FrameStore;
use spillwatch_types::{config::StreamConfig, frame::FrameRecord, Result, SpillwatchError};
use tokio::{
    sync::watch,
    time::{sleep, Instant},
};
use tracing::{debug, info};

/// Multipart boundary token separating consecutive frames.
pub const BOUNDARY: &str = "frame";

/// `Content-Type` header value for a stream produced by [`FrameBroadcaster`].
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Frames one JPEG as a multipart part, boundary line included.
pub fn multipart_chunk(frame: &FrameRecord) -> Bytes {
    let header = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        frame.len()
    );
    let mut chunk = BytesMut::with_capacity(header.len() + frame.len() + 2);
    chunk.put_slice(header.as_bytes());
    chunk.put_slice(&frame.data);
    chunk.put_slice(b"\r\n");
    chunk.freeze()
}

struct Inner {
    store: Arc<FrameStore>,
    config: StreamConfig,
    shutdown_tx: watch::Sender<bool>,
    viewers: AtomicUsize,
}

/// Hands out independent viewer streams over a shared [`FrameStore`].
///
/// Each stream re-reads the store on every tick and never holds a lock while
/// sleeping. A stream ends when its consumer drops it (viewer disconnect) or
/// when [`FrameBroadcaster::shutdown`] is called.
#[derive(Clone)]
pub struct FrameBroadcaster {
    inner: Arc<Inner>,
}

impl FrameBroadcaster {
    pub fn new(store: Arc<FrameStore>, config: StreamConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                shutdown_tx,
                viewers: AtomicUsize::new(0),
            }),
        }
    }

    /// Number of viewer streams currently alive.
    pub fn viewers(&self) -> usize {
        self.inner.viewers.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.inner.shutdown_tx.borrow()
    }

    /// Ends every open viewer stream and refuses new ones.
    pub fn shutdown(&self) {
        self.inner.shutdown_tx.send_replace(true);
        info!(viewers = self.viewers(), "stream broadcaster shutting down");
    }

    /// Waits up to the grace period for a frame on an active stream, then
    /// returns the viewer stream. Fails with `StreamUnavailable` when no
    /// frame ever arrived or the stream is stopped.
    pub async fn open(&self) -> Result<BoxStream<'static, Bytes>> {
        let store = &self.inner.store;
        let deadline = Instant::now() + self.inner.config.grace_period();
        loop {
            if self.is_shutting_down() {
                return Err(SpillwatchError::StreamUnavailable(
                    "server is shutting down".into(),
                ));
            }
            if store.has_frame() && store.is_active() {
                return Ok(self.subscribe());
            }
            let now = Instant::now();
            if now >= deadline {
                let reason = if store.has_frame() {
                    "stream is not active"
                } else {
                    "no frame has been received"
                };
                return Err(SpillwatchError::StreamUnavailable(reason.into()));
            }
            sleep(self.inner.config.poll_interval().min(deadline - now)).await;
        }
    }

    /// Unconditional viewer stream. While no frame exists or the stream is
    /// inactive it keeps polling without yielding.
    pub fn subscribe(&self) -> BoxStream<'static, Bytes> {
        let store = Arc::clone(&self.inner.store);
        let frame_interval = self.inner.config.frame_interval();
        let poll_interval = self.inner.config.poll_interval();
        let mut shutdown = self.inner.shutdown_tx.subscribe();
        let guard = ViewerGuard::register(Arc::clone(&self.inner));

        stream! {
            let _guard = guard;
            loop {
                if *shutdown.borrow() {
                    break;
                }
                let delay = match store.frame() {
                    Some(frame) if store.is_active() => {
                        yield multipart_chunk(&frame);
                        frame_interval
                    }
                    _ => poll_interval,
                };
                tokio::select! {
                    _ = sleep(delay) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }
        .boxed()
    }
}

struct ViewerGuard {
    inner: Arc<Inner>,
}

impl ViewerGuard {
    fn register(inner: Arc<Inner>) -> Self {
        let viewers = inner.viewers.fetch_add(1, Ordering::SeqCst) + 1;
        info!(viewers, "viewer connected");
        Self { inner }
    }
}

impl Drop for ViewerGuard {
    fn drop(&mut self) {
        let viewers = self.inner.viewers.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!(viewers, "viewer stream closed");
    }
}
