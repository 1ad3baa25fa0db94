//! # Ingest Session State Machine
//!
//! Drives one device connection from handshake to teardown. The transport
//! layer feeds complete binary messages in arrival order and maps the
//! errors this module returns onto WebSocket close codes; everything else —
//! parsing, validation, decoding, segment writing, upload handoff — happens
//! here and in the components this module owns.
//!
//! ## Session Lifecycle:
//! 1. **AwaitingHandshake**: the first binary message must parse as the
//!    32-byte handshake; it fixes the stream parameters for the connection.
//! 2. **Streaming**: every further binary message must be a valid audio
//!    frame consistent with the handshake. Valid frames are persisted raw
//!    and, when the codec allows it, decoded into the WAV sidecar.
//! 3. **Closed**: entered exactly once via `finish`, which closes the open
//!    segment, hands it to the uploader and logs the session summary. It
//!    runs on every termination path, normal or not.
//!
//! Sequence gaps are observational: a gap logs a warning with the expected
//! and received numbers, then tracking continues from the received one. A
//! failed ADPCM decode skips the PCM sidecar for that frame only.

use crate::config::StorageConfig;
use crate::ingest::adpcm;
use crate::ingest::clock::Clock;
use crate::ingest::frame::{AudioFrame, FrameError, Handshake};
use crate::ingest::segment::{SegmentRotator, WavFormat};
use crate::upload::ObjectUploader;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Everything a session needs from the outside, passed by value at
/// construction so the state machine has no hidden collaborators.
pub struct SessionDeps {
    pub clock: Arc<dyn Clock>,
    pub uploader: Arc<dyn ObjectUploader>,
    pub storage: StorageConfig,
    pub data_dir: String,
    pub segment_len: Duration,
}

/// Session-fatal failures. Protocol violations carry the close reason in
/// their `Display` text; I/O failures end the session as internal errors.
#[derive(Debug)]
pub enum SessionError {
    Protocol(FrameError),
    Io(io::Error),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Protocol(err) => err.fmt(f),
            SessionError::Io(err) => write!(f, "file I/O error: {}", err),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<FrameError> for SessionError {
    fn from(err: FrameError) -> Self {
        SessionError::Protocol(err)
    }
}

impl From<io::Error> for SessionError {
    fn from(err: io::Error) -> Self {
        SessionError::Io(err)
    }
}

/// Strip a hardware id taken from the URL path down to filesystem- and
/// object-key-safe characters: `[A-Za-z0-9_-]` pass through, `:` and `.`
/// become `_`, everything else is dropped. An empty result means no tag.
pub fn sanitize_hwid(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter_map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '_' | '-' => Some(c),
            ':' | '.' => Some('_'),
            _ => None,
        })
        .collect();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

enum State {
    AwaitingHandshake,
    Streaming(Streaming),
    Closed,
}

struct Streaming {
    handshake: Handshake,
    wav_enabled: bool,
    next_seq: Option<u32>,
    rotator: SegmentRotator,
}

/// Per-connection ingest state machine.
pub struct IngestSession {
    deps: SessionDeps,
    hwid: Option<String>,
    state: State,
    total_frames: u64,
    total_bytes: u64,
    total_pcm_bytes: u64,
    summary_logged: bool,
}

impl IngestSession {
    pub fn new(deps: SessionDeps, raw_hwid: Option<&str>) -> Self {
        Self {
            deps,
            hwid: raw_hwid.and_then(sanitize_hwid),
            state: State::AwaitingHandshake,
            total_frames: 0,
            total_bytes: 0,
            total_pcm_bytes: 0,
            summary_logged: false,
        }
    }

    pub fn hwid(&self) -> Option<&str> {
        self.hwid.as_deref()
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Sequence number the next frame is expected to carry; `None` until the
    /// first frame is accepted.
    pub fn next_seq(&self) -> Option<u32> {
        match &self.state {
            State::Streaming(streaming) => streaming.next_seq,
            _ => None,
        }
    }

    /// Process one complete binary message. An `Err` is session-fatal: the
    /// caller closes the connection and then runs `finish`.
    pub fn on_binary(&mut self, data: &[u8]) -> Result<(), SessionError> {
        match &self.state {
            State::AwaitingHandshake => self.on_handshake(data),
            State::Streaming(_) => self.on_frame(data),
            State::Closed => Ok(()),
        }
    }

    fn on_handshake(&mut self, data: &[u8]) -> Result<(), SessionError> {
        let handshake = Handshake::parse(data)?;
        let wav_enabled = handshake.wav_enabled();

        info!(
            "handshake: stream_id={} hwid={} sample_rate={} channels={} codec={} frame_samples={} wav={}",
            handshake.stream_id,
            self.hwid.as_deref().unwrap_or("-"),
            handshake.sample_rate,
            handshake.channels,
            handshake.codec,
            handshake.frame_samples,
            wav_enabled,
        );

        let wav_format = wav_enabled.then_some(WavFormat {
            sample_rate: handshake.sample_rate,
            channels: handshake.channels,
        });

        let rotator = SegmentRotator::new(
            Arc::clone(&self.deps.clock),
            Arc::clone(&self.deps.uploader),
            self.deps.storage.clone(),
            &self.deps.data_dir,
            self.hwid.clone(),
            handshake.stream_id,
            self.deps.segment_len,
            wav_format,
        )?;

        self.state = State::Streaming(Streaming { handshake, wav_enabled, next_seq: None, rotator });
        Ok(())
    }

    fn on_frame(&mut self, data: &[u8]) -> Result<(), SessionError> {
        let State::Streaming(streaming) = &mut self.state else {
            unreachable!("on_frame outside Streaming");
        };

        let frame = AudioFrame::parse(data)?;
        streaming.handshake.validate_frame(&frame)?;

        if let Some(expected) = streaming.next_seq {
            if frame.seq != expected {
                warn!(
                    "sequence gap on stream {}: expected {}, got {}",
                    streaming.handshake.stream_id, expected, frame.seq
                );
            }
        }
        streaming.next_seq = Some(frame.seq.wrapping_add(1));

        self.total_frames += 1;
        self.total_bytes += data.len() as u64;

        streaming.rotator.ensure_segment()?;
        streaming.rotator.write_raw(data)?;

        if streaming.wav_enabled {
            if streaming.handshake.is_pcm() {
                self.total_pcm_bytes += streaming.rotator.write_pcm(frame.payload)? as u64;
            } else {
                match adpcm::decode_block(frame.payload) {
                    Ok(pcm) => {
                        self.total_pcm_bytes += streaming.rotator.write_pcm(&pcm)? as u64;
                    }
                    Err(err) => {
                        warn!(
                            "ADPCM decode failed on stream {} seq {}: {}",
                            streaming.handshake.stream_id, frame.seq, err
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Close the open segment, trigger its upload and log the summary line.
    /// Idempotent; runs on every termination path.
    pub fn finish(&mut self) {
        let state = std::mem::replace(&mut self.state, State::Closed);

        let stream_id = match state {
            State::Streaming(mut streaming) => {
                streaming.rotator.finish();
                Some(streaming.handshake.stream_id)
            }
            _ => None,
        };

        if !self.summary_logged {
            self.summary_logged = true;
            info!(
                "session closed: stream_id={} hwid={} frames={} bytes={} pcm_bytes={}",
                stream_id.map_or_else(|| "-".to_string(), |id| id.to_string()),
                self.hwid.as_deref().unwrap_or("-"),
                self.total_frames,
                self.total_bytes,
                self.total_pcm_bytes,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::ingest::frame::{ADPCM_FRAME_MAGIC, HANDSHAKE_MAGIC, PCM_FRAME_MAGIC};
    use crate::ingest::testutil::{ManualClock, RecordingUploader};
    use std::path::Path;

    fn handshake_msg(codec: u16) -> Vec<u8> {
        let mut buf = vec![0u8; 32];
        buf[0..4].copy_from_slice(&HANDSHAKE_MAGIC.to_le_bytes());
        buf[4..6].copy_from_slice(&1u16.to_le_bytes());
        buf[6..8].copy_from_slice(&32u16.to_le_bytes());
        buf[8..12].copy_from_slice(&0x2Au32.to_le_bytes());
        buf[12..16].copy_from_slice(&16000u32.to_le_bytes());
        buf[16..18].copy_from_slice(&1u16.to_le_bytes());
        buf[18..20].copy_from_slice(&codec.to_le_bytes());
        buf[20..22].copy_from_slice(&160u16.to_le_bytes());
        buf[24..32].copy_from_slice(&1_700_000_000_000u64.to_le_bytes());
        buf
    }

    fn frame_msg(magic: u32, seq: u32, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(12 + payload.len());
        buf.extend_from_slice(&magic.to_le_bytes());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&seq.to_le_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    struct Harness {
        _dir: tempfile::TempDir,
        data_dir: std::path::PathBuf,
        clock: Arc<ManualClock>,
        uploader: Arc<RecordingUploader>,
        session: IngestSession,
    }

    fn harness(hwid: Option<&str>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data").join("received");
        let clock = ManualClock::new();
        let uploader = RecordingUploader::new();

        let mut storage = AppConfig::default().storage;
        storage.enabled = true;
        storage.bucket = "test-bucket".to_string();

        let session = IngestSession::new(
            SessionDeps {
                clock: clock.clone(),
                uploader: uploader.clone(),
                storage,
                data_dir: data_dir.to_str().unwrap().to_string(),
                segment_len: Duration::from_secs(10),
            },
            hwid,
        );

        Harness { _dir: dir, data_dir, clock, uploader, session }
    }

    fn files_with_extension(dir: &Path, ext: &str) -> Vec<std::path::PathBuf> {
        let mut files: Vec<_> = match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .map(|e| e.unwrap().path())
                .filter(|p| p.extension().is_some_and(|e| e == ext))
                .collect(),
            Err(_) => Vec::new(),
        };
        files.sort();
        files
    }

    #[test]
    fn pcm_happy_path_produces_bin_and_wav() {
        let mut h = harness(None);

        h.session.on_binary(&handshake_msg(0)).unwrap();
        h.session.on_binary(&frame_msg(PCM_FRAME_MAGIC, 7, &[0u8; 320])).unwrap();
        h.session.finish();

        let bins = files_with_extension(&h.data_dir, "bin");
        assert_eq!(bins.len(), 1);
        assert_eq!(std::fs::metadata(&bins[0]).unwrap().len(), 332);

        let wavs = files_with_extension(&h.data_dir, "wav");
        assert_eq!(wavs.len(), 1);
        let wav = std::fs::read(&wavs[0]).unwrap();
        assert_eq!(u32::from_le_bytes(wav[40..44].try_into().unwrap()), 320);
        assert!(wav[44..].iter().all(|&b| b == 0));

        assert_eq!(h.uploader.calls().len(), 2);
        assert_eq!(h.session.total_frames(), 1);
        assert_eq!(h.session.total_bytes(), 332);
    }

    #[test]
    fn adpcm_happy_path_decodes_into_wav() {
        let mut h = harness(None);

        let mut payload = vec![0u8; 4];
        payload.extend_from_slice(&[0u8; 80]);
        h.session.on_binary(&handshake_msg(1)).unwrap();
        h.session.on_binary(&frame_msg(ADPCM_FRAME_MAGIC, 0, &payload)).unwrap();
        h.session.finish();

        let bins = files_with_extension(&h.data_dir, "bin");
        assert_eq!(std::fs::metadata(&bins[0]).unwrap().len(), 96);

        let wavs = files_with_extension(&h.data_dir, "wav");
        let wav = std::fs::read(&wavs[0]).unwrap();
        assert_eq!(u32::from_le_bytes(wav[40..44].try_into().unwrap()), 320);
        assert!(wav[44..].iter().all(|&b| b == 0));
    }

    #[test]
    fn bad_handshake_is_fatal_and_creates_nothing() {
        let mut h = harness(None);

        let err = h.session.on_binary(&[0u8; 32]).unwrap_err();
        assert_eq!(err.to_string(), "invalid handshake");
        h.session.finish();

        assert!(!h.data_dir.exists());
        assert!(h.uploader.calls().is_empty());
    }

    #[test]
    fn codec_mismatch_before_first_frame_uploads_nothing() {
        let mut h = harness(None);

        h.session.on_binary(&handshake_msg(0)).unwrap();
        let mismatched = frame_msg(ADPCM_FRAME_MAGIC, 0, &[0u8; 84]);
        let err = h.session.on_binary(&mismatched).unwrap_err();
        assert_eq!(err.to_string(), "frame codec mismatch");
        h.session.finish();

        // the error came before any accepted frame, so no segment was opened
        assert!(files_with_extension(&h.data_dir, "bin").is_empty());
        assert!(h.uploader.calls().is_empty());
    }

    #[test]
    fn sequence_gap_is_observed_not_fatal() {
        let mut h = harness(None);

        h.session.on_binary(&handshake_msg(0)).unwrap();
        h.session.on_binary(&frame_msg(PCM_FRAME_MAGIC, 100, &[0u8; 320])).unwrap();
        h.session.on_binary(&frame_msg(PCM_FRAME_MAGIC, 102, &[0u8; 320])).unwrap();

        assert_eq!(h.session.next_seq(), Some(103));
        assert_eq!(h.session.total_frames(), 2);

        h.session.finish();
        let bins = files_with_extension(&h.data_dir, "bin");
        assert_eq!(std::fs::metadata(&bins[0]).unwrap().len(), 2 * 332);
    }

    #[test]
    fn sequence_tracking_wraps_at_u32_max() {
        let mut h = harness(None);

        h.session.on_binary(&handshake_msg(0)).unwrap();
        h.session.on_binary(&frame_msg(PCM_FRAME_MAGIC, u32::MAX, &[0u8; 320])).unwrap();
        assert_eq!(h.session.next_seq(), Some(0));
        h.session.on_binary(&frame_msg(PCM_FRAME_MAGIC, 0, &[0u8; 320])).unwrap();
        assert_eq!(h.session.next_seq(), Some(1));
        h.session.finish();
    }

    #[test]
    fn rotation_slices_a_paced_stream_into_three_segments() {
        let mut h = harness(None);

        h.session.on_binary(&handshake_msg(0)).unwrap();
        for seq in 0u32..25 {
            h.session.on_binary(&frame_msg(PCM_FRAME_MAGIC, seq, &[0u8; 320])).unwrap();
            h.clock.advance(Duration::from_secs(1));
        }
        h.session.finish();

        let bins = files_with_extension(&h.data_dir, "bin");
        let wavs = files_with_extension(&h.data_dir, "wav");
        assert_eq!(bins.len(), 3);
        assert_eq!(wavs.len(), 3);

        // 10 + 10 + 5 frames
        let sizes: Vec<u64> =
            bins.iter().map(|p| std::fs::metadata(p).unwrap().len()).collect();
        assert_eq!(sizes, vec![10 * 332, 10 * 332, 5 * 332]);

        // every produced file uploaded exactly once, rotation order, bin
        // before wav within a pair
        let keys = h.uploader.keys();
        assert_eq!(keys.len(), 6);
        for pair in keys.chunks(2) {
            assert!(pair[0].ends_with(".bin"));
            assert!(pair[1].ends_with(".wav"));
            assert_eq!(pair[0].trim_end_matches(".bin"), pair[1].trim_end_matches(".wav"));
        }
        let mut unique = keys.clone();
        unique.dedup();
        assert_eq!(unique.len(), 6);
    }

    #[test]
    fn adpcm_decode_failure_keeps_session_and_raw_stream() {
        let mut h = harness(None);

        h.session.on_binary(&handshake_msg(1)).unwrap();

        // step index 90 is out of range: decode fails, raw is still written
        let mut bad = vec![0u8, 0, 90, 0];
        bad.extend_from_slice(&[0u8; 80]);
        h.session.on_binary(&frame_msg(ADPCM_FRAME_MAGIC, 0, &bad)).unwrap();

        let mut good = vec![0u8; 4];
        good.extend_from_slice(&[0u8; 80]);
        h.session.on_binary(&frame_msg(ADPCM_FRAME_MAGIC, 1, &good)).unwrap();
        h.session.finish();

        let bins = files_with_extension(&h.data_dir, "bin");
        assert_eq!(std::fs::metadata(&bins[0]).unwrap().len(), 2 * 96);

        // only the good frame reached the sidecar
        let wavs = files_with_extension(&h.data_dir, "wav");
        let wav = std::fs::read(&wavs[0]).unwrap();
        assert_eq!(u32::from_le_bytes(wav[40..44].try_into().unwrap()), 320);
    }

    #[test]
    fn stereo_adpcm_gets_no_wav_sidecar() {
        let mut h = harness(None);

        let mut hs = handshake_msg(1);
        hs[16..18].copy_from_slice(&2u16.to_le_bytes());
        h.session.on_binary(&hs).unwrap();

        let mut payload = vec![0u8; 4];
        payload.extend_from_slice(&[0u8; 160]);
        h.session.on_binary(&frame_msg(ADPCM_FRAME_MAGIC, 0, &payload)).unwrap();
        h.session.finish();

        assert_eq!(files_with_extension(&h.data_dir, "bin").len(), 1);
        assert!(files_with_extension(&h.data_dir, "wav").is_empty());

        // only the .bin is handed off
        let keys = h.uploader.keys();
        assert_eq!(keys.len(), 1);
        assert!(keys[0].ends_with(".bin"));
    }

    #[test]
    fn hwid_places_files_in_a_subdirectory() {
        let mut h = harness(Some("dev:01.local"));
        assert_eq!(h.session.hwid(), Some("dev_01_local"));

        h.session.on_binary(&handshake_msg(0)).unwrap();
        h.session.on_binary(&frame_msg(PCM_FRAME_MAGIC, 0, &[0u8; 320])).unwrap();
        h.session.finish();

        let subdir = h.data_dir.join("dev_01_local");
        assert_eq!(files_with_extension(&subdir, "bin").len(), 1);

        let keys = h.uploader.keys();
        assert!(keys[0].starts_with("received/dev_01_local/"), "key {}", keys[0]);
    }

    #[test]
    fn closed_session_ignores_further_messages() {
        let mut h = harness(None);

        h.session.on_binary(&handshake_msg(0)).unwrap();
        h.session.finish();
        assert!(h.session.on_binary(&frame_msg(PCM_FRAME_MAGIC, 0, &[0u8; 320])).is_ok());
        assert_eq!(h.session.total_frames(), 0);

        // finish is idempotent: no second round of uploads
        h.session.finish();
        assert!(h.uploader.calls().is_empty());
    }

    #[test]
    fn sanitize_hwid_rules() {
        assert_eq!(sanitize_hwid("abc-DEF_09"), Some("abc-DEF_09".to_string()));
        assert_eq!(sanitize_hwid("aa:bb.cc"), Some("aa_bb_cc".to_string()));
        assert_eq!(sanitize_hwid("we ird/../name!"), Some("weird__name".to_string()));
        assert_eq!(sanitize_hwid("!!!"), None);
        assert_eq!(sanitize_hwid(""), None);
    }
}
