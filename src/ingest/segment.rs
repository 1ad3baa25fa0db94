//! # Segment Rotation
//!
//! Owns the on-disk files of one ingest session. A segment is a pair of
//! files covering a bounded wall-clock window: the raw framed byte stream
//! (`.bin`, always) and the decoded PCM sidecar (`.wav`, only when the
//! handshake permits decoding).
//!
//! ## Policy:
//! - **Paths**: `{data_dir}/[{hwid}/]stream_{id}_[{hwid}_]{yyyyMMdd_HHmmss}`
//!   with a UTC timestamp; the directory tree is created once per session.
//! - **Open**: create-new semantics; a name collision is a fatal session
//!   error rather than silent truncation of an existing capture.
//! - **Rotation**: sampled on every accepted frame; when the current
//!   segment is older than the configured window (or absent) the old pair
//!   is closed first, handed to the uploader, and only then is the next
//!   pair opened.
//! - **Teardown**: `finish` closes and uploads whatever is open. Upload
//!   dispatch is detached, so it also completes for sessions that died
//!   mid-connection.

use crate::config::StorageConfig;
use crate::ingest::clock::Clock;
use crate::ingest::wav::WavSegmentWriter;
use crate::upload::{object_key, ObjectUploader};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// PCM format of the WAV sidecar, fixed by the handshake.
#[derive(Debug, Clone, Copy)]
pub struct WavFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

struct OpenSegment {
    opened_at: Instant,
    raw_file: File,
    raw_path: PathBuf,
    wav: Option<(WavSegmentWriter, PathBuf)>,
}

/// Rotating writer for one session's segment files.
pub struct SegmentRotator {
    clock: Arc<dyn Clock>,
    uploader: Arc<dyn ObjectUploader>,
    storage: StorageConfig,
    dir: PathBuf,
    hwid: Option<String>,
    stream_id: u32,
    segment_len: Duration,
    wav_format: Option<WavFormat>,
    current: Option<OpenSegment>,
}

impl SegmentRotator {
    /// Create the session's directory tree and an idle rotator. The first
    /// accepted frame opens the first segment.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: Arc<dyn Clock>,
        uploader: Arc<dyn ObjectUploader>,
        storage: StorageConfig,
        data_dir: &str,
        hwid: Option<String>,
        stream_id: u32,
        segment_len: Duration,
        wav_format: Option<WavFormat>,
    ) -> io::Result<Self> {
        let mut dir = PathBuf::from(data_dir);
        if let Some(hwid) = &hwid {
            dir.push(hwid);
        }
        fs::create_dir_all(&dir)?;

        Ok(Self {
            clock,
            uploader,
            storage,
            dir,
            hwid,
            stream_id,
            segment_len,
            wav_format,
            current: None,
        })
    }

    /// Whether a segment is currently open.
    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    /// Path of the current raw file, if a segment is open.
    pub fn current_raw_path(&self) -> Option<&PathBuf> {
        self.current.as_ref().map(|seg| &seg.raw_path)
    }

    /// Sample the clock and rotate if the current segment expired (or none
    /// is open yet). Called once per accepted frame, before writing it.
    pub fn ensure_segment(&mut self) -> io::Result<()> {
        let now = self.clock.now();
        let expired = match &self.current {
            Some(seg) => now.duration_since(seg.opened_at) >= self.segment_len,
            None => true,
        };
        if expired {
            self.close_current();
            self.open_segment(now)?;
        }
        Ok(())
    }

    /// Append the full wire frame to the raw file and flush it.
    pub fn write_raw(&mut self, frame: &[u8]) -> io::Result<()> {
        let seg = self.current.as_mut().expect("write_raw without an open segment");
        seg.raw_file.write_all(frame)?;
        seg.raw_file.flush()
    }

    /// Append decoded PCM to the WAV sidecar, if this session has one.
    /// Returns the number of bytes written.
    pub fn write_pcm(&mut self, pcm: &[u8]) -> io::Result<usize> {
        let seg = self.current.as_mut().expect("write_pcm without an open segment");
        match seg.wav.as_mut() {
            Some((writer, _)) => {
                writer.write(pcm)?;
                Ok(pcm.len())
            }
            None => Ok(0),
        }
    }

    /// Close and upload the current segment, if any. Idempotent; used both
    /// by rotation and by session teardown.
    pub fn finish(&mut self) {
        self.close_current();
    }

    fn open_segment(&mut self, now: Instant) -> io::Result<()> {
        let stamp = self.clock.utc().format("%Y%m%d_%H%M%S");
        let base = match &self.hwid {
            Some(hwid) => format!("stream_{}_{}_{}", self.stream_id, hwid, stamp),
            None => format!("stream_{}_{}", self.stream_id, stamp),
        };

        let raw_path = self.dir.join(format!("{}.bin", base));
        let raw_file = OpenOptions::new().write(true).create_new(true).open(&raw_path)?;

        let wav = match self.wav_format {
            Some(format) => {
                let wav_path = self.dir.join(format!("{}.wav", base));
                let writer = WavSegmentWriter::create(&wav_path, format.sample_rate, format.channels)?;
                Some((writer, wav_path))
            }
            None => None,
        };

        debug!("opened segment {}", raw_path.display());
        self.current = Some(OpenSegment { opened_at: now, raw_file, raw_path, wav });
        Ok(())
    }

    fn close_current(&mut self) {
        let Some(seg) = self.current.take() else {
            return;
        };

        // close must complete before the paths leave this function
        let mut raw_file = seg.raw_file;
        if let Err(err) = raw_file.flush() {
            warn!("final flush of {} failed: {}", seg.raw_path.display(), err);
        }
        drop(raw_file);

        let wav_path = seg.wav.map(|(writer, path)| {
            match writer.finalize() {
                Ok(bytes) => info!("closed {} with {} PCM bytes", path.display(), bytes),
                Err(err) => warn!("finalizing {} failed: {}", path.display(), err),
            }
            path
        });

        if self.storage.enabled && self.storage.upload_bin {
            self.hand_off(&seg.raw_path);
        }
        if let Some(wav_path) = wav_path {
            if self.storage.enabled && self.storage.upload_wav {
                self.hand_off(&wav_path);
            }
        }
    }

    fn hand_off(&self, path: &PathBuf) {
        let filename = match path.file_name().and_then(|name| name.to_str()) {
            Some(name) => name,
            None => return,
        };
        let key = object_key(&self.storage.prefix, self.hwid.as_deref(), filename);
        self.uploader.upload(path.clone(), key);
    }
}
