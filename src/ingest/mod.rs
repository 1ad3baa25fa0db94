//! # Audio Ingest Pipeline
//!
//! Everything between a complete inbound binary message and the bytes on
//! disk lives here, independent of the transport:
//!
//! - **frame**: handshake and frame wire formats, cross-validation
//! - **adpcm**: IMA ADPCM block decoding to 16-bit PCM
//! - **wav**: incremental WAV file writing with deferred size fields
//! - **segment**: time-sliced file rotation and upload handoff
//! - **session**: the per-connection state machine tying it together
//! - **assembler**: fragmented-message reassembly for the transport layer
//! - **clock**: injectable wall-clock for testable rotation
//!
//! The WebSocket actor in `crate::websocket` owns a `session::IngestSession`
//! and feeds it reassembled messages; nothing in this module knows about
//! HTTP or WebSocket types.

pub mod adpcm;
pub mod assembler;
pub mod clock;
pub mod frame;
pub mod segment;
pub mod session;
pub mod wav;

#[cfg(test)]
pub mod testutil;
