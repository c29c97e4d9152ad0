use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use spillwatch_types::{
    events::{disambiguate, parse_token, timestamp_token, DetectionEvent, DetectionSummary},
    Result, SpillwatchError,
};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::evidence::EvidenceStore;

/// Upper bound on suffixes tried within one second before giving up.
pub const MAX_DISAMBIGUATION: u32 = 10_000;

#[derive(Debug, Default)]
struct WriterState {
    last_detected_at: Option<DateTime<Utc>>,
    last_base: String,
    next_counter: u32,
}

/// Append-only history of detection events backed by an [`EvidenceStore`].
///
/// `record` calls are serialised by the writer mutex, which also covers the
/// evidence write. Readers only touch the history lock, held for a clone or
/// a push, so they never wait on disk I/O.
pub struct DetectionLedger {
    evidence: Arc<dyn EvidenceStore>,
    writer: Mutex<WriterState>,
    history: RwLock<Vec<DetectionEvent>>,
}

impl DetectionLedger {
    pub fn new(evidence: Arc<dyn EvidenceStore>) -> Self {
        Self {
            evidence,
            writer: Mutex::new(WriterState::default()),
            history: RwLock::new(Vec::new()),
        }
    }

    /// Builds a ledger whose history is rehydrated from existing evidence.
    /// Entries whose names are not timestamp tokens are skipped.
    pub async fn restore(evidence: Arc<dyn EvidenceStore>) -> Result<Self> {
        let mut parsed: Vec<(DateTime<Utc>, u32, String)> = Vec::new();
        for stem in evidence.list().await? {
            match parse_token(&stem) {
                Some((at, counter)) => parsed.push((at, counter, stem)),
                None => warn!(stem = %stem, "ignoring evidence file without timestamp name"),
            }
        }
        parsed.sort();

        let mut writer = WriterState::default();
        let events: Vec<DetectionEvent> = parsed
            .into_iter()
            .map(|(detected_at, counter, id)| {
                writer.last_detected_at = Some(detected_at);
                writer.last_base = timestamp_token(detected_at);
                // a suffix at u32::MAX leaves no room; record() then refuses that second
                writer.next_counter = counter.saturating_add(1);
                DetectionEvent {
                    frame_path: evidence.path_for(&id),
                    id,
                    detected_at,
                }
            })
            .collect();

        if !events.is_empty() {
            info!(events = events.len(), "restored detection history");
        }
        Ok(Self {
            evidence,
            writer: Mutex::new(writer),
            history: RwLock::new(events),
        })
    }

    /// Persists `frame` as evidence and appends a new event.
    ///
    /// All or nothing: when the evidence write fails the history is left
    /// untouched and the error is returned. Timestamps earlier than the last
    /// recorded event are clamped so history stays ordered.
    pub async fn record(&self, frame: &[u8], timestamp: DateTime<Utc>) -> Result<DetectionEvent> {
        let mut writer = self.writer.lock().await;

        let detected_at = match writer.last_detected_at {
            Some(last) if timestamp < last => last,
            _ => timestamp,
        };
        let base = timestamp_token(detected_at);
        let mut counter = if writer.last_base == base {
            writer.next_counter
        } else {
            0
        };

        let (id, frame_path) = loop {
            if counter >= MAX_DISAMBIGUATION {
                return Err(SpillwatchError::DuplicateTimestamp(base));
            }
            let id = disambiguate(&base, counter);
            match self.evidence.persist(&id, frame).await {
                Ok(path) => break (id, path),
                Err(SpillwatchError::DuplicateTimestamp(_)) => counter += 1,
                Err(err) => {
                    warn!(id = %id, error = %err, "detection evidence not persisted");
                    return Err(err);
                }
            }
        };

        let event = DetectionEvent {
            id,
            detected_at,
            frame_path,
        };
        self.history
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());

        writer.last_detected_at = Some(detected_at);
        writer.last_base = base;
        writer.next_counter = counter + 1;

        info!(
            id = %event.id,
            path = %event.frame_path.display(),
            "oil spill detection recorded"
        );
        Ok(event)
    }

    /// Snapshot of the history in insertion order.
    pub fn all_events(&self) -> Vec<DetectionEvent> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self) -> DetectionSummary {
        let history = self.history.read().unwrap_or_else(PoisonError::into_inner);
        DetectionSummary::from_events(&history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::FsEvidenceStore;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::{
        collections::HashSet,
        path::PathBuf,
        sync::atomic::{AtomicBool, AtomicU32, Ordering},
    };

    fn fs_ledger(dir: &std::path::Path) -> DetectionLedger {
        DetectionLedger::new(Arc::new(FsEvidenceStore::new(dir)))
    }

    fn at(secs: u32, millis: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, secs).unwrap() + Duration::milliseconds(millis as i64)
    }

    #[tokio::test]
    async fn record_persists_frame_and_appends() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = fs_ledger(dir.path());
        let event = ledger.record(b"jpeg-bytes", at(5, 0)).await.expect("record");

        assert_eq!(event.id, "20240501_120005");
        assert_eq!(std::fs::read(&event.frame_path).expect("evidence"), b"jpeg-bytes");
        assert_eq!(ledger.all_events(), vec![event.clone()]);
        let summary = ledger.summary();
        assert_eq!(summary.total_events, 1);
        assert_eq!(summary.last_detection, Some(event.detected_at));
    }

    #[tokio::test]
    async fn same_second_events_are_disambiguated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = fs_ledger(dir.path());
        let first = ledger.record(b"a", at(1, 100)).await.expect("first");
        let second = ledger.record(b"b", at(1, 400)).await.expect("second");
        let third = ledger.record(b"c", at(1, 900)).await.expect("third");

        assert_eq!(first.id, "20240501_120001");
        assert_eq!(second.id, "20240501_120001_1");
        assert_eq!(third.id, "20240501_120001_2");
        assert_eq!(std::fs::read(&first.frame_path).expect("first file"), b"a");
        assert_eq!(std::fs::read(&second.frame_path).expect("second file"), b"b");
        assert_eq!(std::fs::read(&third.frame_path).expect("third file"), b"c");
    }

    #[tokio::test]
    async fn preexisting_files_are_never_overwritten() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("20240501_120002.jpg"), b"old").expect("seed");
        let ledger = fs_ledger(dir.path());
        let event = ledger.record(b"new", at(2, 0)).await.expect("record");
        assert_eq!(event.id, "20240501_120002_1");
        assert_eq!(
            std::fs::read(dir.path().join("20240501_120002.jpg")).expect("old file"),
            b"old"
        );
    }

    #[tokio::test]
    async fn out_of_order_timestamps_are_clamped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = fs_ledger(dir.path());
        ledger.record(b"late", at(10, 0)).await.expect("late");
        let early = ledger.record(b"early", at(3, 0)).await.expect("early");
        assert_eq!(early.detected_at, at(10, 0));
        assert_eq!(early.id, "20240501_120010_1");
    }

    struct FailingStore {
        fail: AtomicBool,
        inner: FsEvidenceStore,
    }

    #[async_trait]
    impl EvidenceStore for FailingStore {
        async fn persist(&self, stem: &str, data: &[u8]) -> Result<PathBuf> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(crate::evidence::persistence_error("disk full"));
            }
            self.inner.persist(stem, data).await
        }

        async fn list(&self) -> Result<Vec<String>> {
            self.inner.list().await
        }

        fn path_for(&self, stem: &str) -> PathBuf {
            self.inner.path_for(stem)
        }
    }

    #[tokio::test]
    async fn failed_write_leaves_history_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(FailingStore {
            fail: AtomicBool::new(true),
            inner: FsEvidenceStore::new(dir.path()),
        });
        let ledger = DetectionLedger::new(store.clone());

        let err = ledger.record(b"x", at(7, 0)).await.expect_err("write fails");
        assert!(matches!(err, SpillwatchError::Persistence(_)));
        assert!(ledger.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).expect("dir").count(), 0);

        store.fail.store(false, Ordering::SeqCst);
        let event = ledger.record(b"x", at(7, 0)).await.expect("retry succeeds");
        assert_eq!(event.id, "20240501_120007");
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn restore_rehydrates_history_in_token_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in [
            "20240501_120001_1.jpg",
            "20240501_120000.jpg",
            "20240501_120001.jpg",
            "snapshot.jpg",
        ] {
            std::fs::write(dir.path().join(name), name.as_bytes()).expect("seed");
        }
        let ledger = DetectionLedger::restore(Arc::new(FsEvidenceStore::new(dir.path())))
            .await
            .expect("restore");
        let ids: Vec<String> = ledger.all_events().into_iter().map(|e| e.id).collect();
        assert_eq!(
            ids,
            vec!["20240501_120000", "20240501_120001", "20240501_120001_1"]
        );

        let next = ledger.record(b"next", at(1, 500)).await.expect("record");
        assert_eq!(next.id, "20240501_120001_2");
    }

    #[tokio::test]
    async fn restore_accepts_largest_suffix() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("20240501_120000_4294967295.jpg"), b"edge").expect("seed");
        let ledger = DetectionLedger::restore(Arc::new(FsEvidenceStore::new(dir.path())))
            .await
            .expect("restore");
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.all_events()[0].id, "20240501_120000_4294967295");

        let err = ledger
            .record(b"same second", at(0, 500))
            .await
            .expect_err("no suffix left");
        assert!(matches!(err, SpillwatchError::DuplicateTimestamp(_)));
        assert_eq!(ledger.len(), 1);

        let next = ledger.record(b"later", at(1, 0)).await.expect("next second");
        assert_eq!(next.id, "20240501_120001");
    }

    /// Reports every stem as already taken.
    #[derive(Default)]
    struct SaturatedStore {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl EvidenceStore for SaturatedStore {
        async fn persist(&self, stem: &str, _data: &[u8]) -> Result<PathBuf> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(SpillwatchError::DuplicateTimestamp(stem.to_string()))
        }

        async fn list(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        fn path_for(&self, stem: &str) -> PathBuf {
            PathBuf::from(stem)
        }
    }

    #[tokio::test]
    async fn suffix_exhaustion_fails_without_appending() {
        let store = Arc::new(SaturatedStore::default());
        let ledger = DetectionLedger::new(store.clone());

        let err = ledger.record(b"x", at(9, 0)).await.expect_err("every suffix taken");
        match err {
            SpillwatchError::DuplicateTimestamp(base) => assert_eq!(base, "20240501_120009"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.attempts.load(Ordering::SeqCst), MAX_DISAMBIGUATION);
        assert!(ledger.is_empty());
        assert_eq!(ledger.summary().total_events, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_records_are_all_kept() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = Arc::new(fs_ledger(dir.path()));
        let base = at(20, 0);

        let tasks: Vec<_> = (0..50u8)
            .map(|n| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move {
                    let timestamp = base + Duration::milliseconds(n as i64 * 40);
                    ledger.record(&[n; 64], timestamp).await
                })
            })
            .collect();
        for task in tasks {
            task.await.expect("join").expect("record");
        }

        let events = ledger.all_events();
        assert_eq!(events.len(), 50);
        let ids: HashSet<&str> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids.len(), 50);
        assert!(events
            .windows(2)
            .all(|pair| pair[0].detected_at <= pair[1].detected_at));

        let mut payloads = HashSet::new();
        for event in &events {
            let bytes = std::fs::read(&event.frame_path).expect("evidence exists");
            assert_eq!(bytes.len(), 64);
            assert!(bytes.iter().all(|b| *b == bytes[0]));
            payloads.insert(bytes[0]);
        }
        assert_eq!(payloads.len(), 50);
        assert_eq!(std::fs::read_dir(dir.path()).expect("dir").count(), 50);
    }
}
