//! Shared test doubles for the ingest pipeline: a manually-advanced clock
//! and an uploader that records its calls instead of talking to storage.

use crate::ingest::clock::Clock;
use crate::upload::ObjectUploader;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Clock that only moves when a test calls `advance`. Monotonic and UTC
/// time move together so rotated segments also get distinct filenames.
pub struct ManualClock {
    base: Instant,
    base_utc: DateTime<Utc>,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { base: Instant::now(), base_utc: Utc::now(), offset: Mutex::new(Duration::ZERO) })
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }

    fn utc(&self) -> DateTime<Utc> {
        self.base_utc + ChronoDuration::from_std(*self.offset.lock().unwrap()).unwrap()
    }
}

/// Uploader double capturing every `(path, key)` handoff synchronously.
#[derive(Default)]
pub struct RecordingUploader {
    calls: Mutex<Vec<(PathBuf, String)>>,
}

impl RecordingUploader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<(PathBuf, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.calls().into_iter().map(|(_, key)| key).collect()
    }
}

impl ObjectUploader for RecordingUploader {
    fn upload(&self, path: PathBuf, key: String) {
        self.calls.lock().unwrap().push((path, key));
    }
}
