//! # Wire Format Parsing and Validation
//!
//! Parses the two binary layouts a device sends after connecting: the 32-byte
//! stream handshake and the 12-byte-header audio frames that follow it. All
//! multi-byte fields are little-endian.
//!
//! ## Handshake (32 bytes):
//! ```text
//! offset  size  field
//!   0      4    magic          "ADPC" (0x41445043)
//!   4      2    version        must be 1
//!   6      2    header_len     must be 32
//!   8      4    stream_id
//!  12      4    sample_rate    Hz
//!  16      2    channels
//!  18      2    codec          0 = PCM S16LE, 1 = IMA ADPCM
//!  20      2    frame_samples  samples per channel per frame
//!  22      2    reserved       not validated
//!  24      8    timestamp_ms   device wall clock
//! ```
//!
//! ## Frame (12-byte header + payload):
//! ```text
//!   0      4    magic          "PCMF" (0x464D4350) or "ADPF" (0x41445046)
//!   4      4    length         payload bytes (wire length - 12)
//!   8      4    seq
//!  12      ...  payload
//! ```
//!
//! The frame magic must agree with the handshake codec, and the payload size
//! must match what the handshake promised; both checks live here so the
//! session state machine only sees frames that are internally consistent.

use byteorder::{LittleEndian, ReadBytesExt};
use std::fmt;
use std::io::Cursor;

/// Handshake magic "ADPC" (little-endian on the wire).
pub const HANDSHAKE_MAGIC: u32 = 0x4144_5043;

/// Frame magic for raw PCM S16LE payloads ("PCMF").
pub const PCM_FRAME_MAGIC: u32 = 0x464D_4350;

/// Frame magic for IMA ADPCM payloads ("ADPF").
pub const ADPCM_FRAME_MAGIC: u32 = 0x4144_5046;

/// Fixed handshake length; also the value of its `header_len` field.
pub const HANDSHAKE_LEN: usize = 32;

/// Bytes of frame header preceding the payload.
pub const FRAME_HEADER_LEN: usize = 12;

/// Codec id carried in the handshake for raw 16-bit PCM.
pub const CODEC_PCM_S16LE: u16 = 0;

/// Codec id carried in the handshake for IMA ADPCM.
pub const CODEC_IMA_ADPCM: u16 = 1;

/// Slack allowed above the nominal ADPCM block size, absorbing encoder
/// padding. Kept as a bound, not required to be tight.
const ADPCM_SIZE_SLACK: usize = 16;

/// Protocol-level validation failures.
///
/// The `Display` text of each variant is the reason phrase sent in the
/// WebSocket close frame, so it must stay short and stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// First message was not a well-formed handshake.
    InvalidHandshake,
    /// A binary message after the handshake was not a well-formed frame.
    InvalidFrame,
    /// Frame magic disagrees with the handshake codec.
    CodecMismatch,
    /// Payload length is outside the bounds the handshake allows.
    PayloadSize,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::InvalidHandshake => write!(f, "invalid handshake"),
            FrameError::InvalidFrame => write!(f, "invalid audio frame"),
            FrameError::CodecMismatch => write!(f, "frame codec mismatch"),
            FrameError::PayloadSize => write!(f, "frame payload size invalid"),
        }
    }
}

impl std::error::Error for FrameError {}

/// Immutable stream parameters, parsed once from the first binary message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub stream_id: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub codec: u16,
    pub frame_samples: u16,
    pub timestamp_ms: u64,
}

impl Handshake {
    /// Parse and validate a handshake message.
    ///
    /// Requires the full 32-byte layout with the expected magic, version 1
    /// and `header_len` 32. The codec field is *not* restricted here: unknown
    /// codec ids parse fine, they just disable WAV output and can never match
    /// a frame magic later.
    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < HANDSHAKE_LEN {
            return Err(FrameError::InvalidHandshake);
        }

        let mut cursor = Cursor::new(data);
        let magic = cursor.read_u32::<LittleEndian>().map_err(|_| FrameError::InvalidHandshake)?;
        if magic != HANDSHAKE_MAGIC {
            return Err(FrameError::InvalidHandshake);
        }

        let version = cursor.read_u16::<LittleEndian>().map_err(|_| FrameError::InvalidHandshake)?;
        let header_len = cursor.read_u16::<LittleEndian>().map_err(|_| FrameError::InvalidHandshake)?;
        if version != 1 || header_len != HANDSHAKE_LEN as u16 {
            return Err(FrameError::InvalidHandshake);
        }

        let stream_id = cursor.read_u32::<LittleEndian>().map_err(|_| FrameError::InvalidHandshake)?;
        let sample_rate = cursor.read_u32::<LittleEndian>().map_err(|_| FrameError::InvalidHandshake)?;
        let channels = cursor.read_u16::<LittleEndian>().map_err(|_| FrameError::InvalidHandshake)?;
        let codec = cursor.read_u16::<LittleEndian>().map_err(|_| FrameError::InvalidHandshake)?;
        let frame_samples = cursor.read_u16::<LittleEndian>().map_err(|_| FrameError::InvalidHandshake)?;
        // bytes [22..24) are reserved padding, skipped without inspection
        let _reserved = cursor.read_u16::<LittleEndian>().map_err(|_| FrameError::InvalidHandshake)?;
        let timestamp_ms = cursor.read_u64::<LittleEndian>().map_err(|_| FrameError::InvalidHandshake)?;

        Ok(Self { stream_id, sample_rate, channels, codec, frame_samples, timestamp_ms })
    }

    pub fn is_pcm(&self) -> bool {
        self.codec == CODEC_PCM_S16LE
    }

    pub fn is_adpcm(&self) -> bool {
        self.codec == CODEC_IMA_ADPCM
    }

    /// Whether this stream gets a parallel WAV file. Multi-channel ADPCM is
    /// not decodable here, and unknown codecs have no PCM representation.
    pub fn wav_enabled(&self) -> bool {
        self.is_pcm() || (self.is_adpcm() && self.channels == 1)
    }

    /// Exact payload size a PCM frame must carry.
    pub fn pcm_payload_len(&self) -> usize {
        self.frame_samples as usize * self.channels as usize * 2
    }

    /// Upper payload bound for an ADPCM frame: 4-byte block header plus one
    /// nibble per sample plus padding slack.
    pub fn adpcm_payload_max(&self) -> usize {
        4 + self.frame_samples as usize * self.channels as usize / 2 + ADPCM_SIZE_SLACK
    }

    /// Cross-check a parsed frame against this handshake: the magic must pair
    /// with the codec, and the payload size must be in bounds.
    pub fn validate_frame(&self, frame: &AudioFrame<'_>) -> Result<(), FrameError> {
        let magic_matches = match frame.magic {
            PCM_FRAME_MAGIC => self.is_pcm(),
            ADPCM_FRAME_MAGIC => self.is_adpcm(),
            _ => false,
        };
        if !magic_matches {
            return Err(FrameError::CodecMismatch);
        }

        if frame.magic == PCM_FRAME_MAGIC {
            if frame.payload.len() != self.pcm_payload_len() {
                return Err(FrameError::PayloadSize);
            }
        } else {
            let len = frame.payload.len();
            if len < 4 || len > self.adpcm_payload_max() {
                return Err(FrameError::PayloadSize);
            }
        }

        Ok(())
    }
}

/// One parsed audio frame; borrows its payload from the inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFrame<'a> {
    pub magic: u32,
    pub seq: u32,
    pub payload: &'a [u8],
}

impl<'a> AudioFrame<'a> {
    /// Parse a frame message: known magic, declared length matching the
    /// actual payload, sequence number, payload tail.
    pub fn parse(data: &'a [u8]) -> Result<Self, FrameError> {
        if data.len() < FRAME_HEADER_LEN {
            return Err(FrameError::InvalidFrame);
        }

        let mut cursor = Cursor::new(data);
        let magic = cursor.read_u32::<LittleEndian>().map_err(|_| FrameError::InvalidFrame)?;
        if magic != PCM_FRAME_MAGIC && magic != ADPCM_FRAME_MAGIC {
            return Err(FrameError::InvalidFrame);
        }

        let length = cursor.read_u32::<LittleEndian>().map_err(|_| FrameError::InvalidFrame)?;
        let seq = cursor.read_u32::<LittleEndian>().map_err(|_| FrameError::InvalidFrame)?;

        let payload = &data[FRAME_HEADER_LEN..];
        if length as usize != payload.len() {
            return Err(FrameError::InvalidFrame);
        }

        Ok(Self { magic, seq, payload })
    }
}
