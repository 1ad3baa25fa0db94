//! # Fragmented Message Reassembly
//!
//! The transport may split one logical message across several continuation
//! fragments. This accumulator turns a `begin / push / finish` fragment
//! stream back into single `(kind, payload)` messages, independent of any
//! transport type, so the protocol logic above it only ever sees whole
//! messages and the reassembly rules stay trivially testable.

use bytes::{Bytes, BytesMut};
use std::fmt;

/// Initial capacity of the receive buffer; payloads may grow past this
/// through accumulation.
const RECEIVE_BUFFER_LEN: usize = 64 * 1024;

/// Logical message kind carried by a fragment stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Binary,
}

/// Fragment sequencing violations. Any of these closes the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyError {
    /// A first-fragment arrived while another message was still open.
    StartMidMessage,
    /// A continuation or final fragment arrived with no message open.
    ContinuationWithoutStart,
}

impl fmt::Display for AssemblyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssemblyError::StartMidMessage => {
                write!(f, "new fragmented message started before the previous one finished")
            }
            AssemblyError::ContinuationWithoutStart => {
                write!(f, "continuation fragment without a started message")
            }
        }
    }
}

impl std::error::Error for AssemblyError {}

/// Accumulates fragments of at most one in-flight logical message.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    in_progress: Option<(MessageKind, BytesMut)>,
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fragmented message of the given kind.
    pub fn begin(&mut self, kind: MessageKind, chunk: &[u8]) -> Result<(), AssemblyError> {
        if self.in_progress.is_some() {
            return Err(AssemblyError::StartMidMessage);
        }
        let mut buf = BytesMut::with_capacity(RECEIVE_BUFFER_LEN.max(chunk.len()));
        buf.extend_from_slice(chunk);
        self.in_progress = Some((kind, buf));
        Ok(())
    }

    /// Append an intermediate fragment.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), AssemblyError> {
        match self.in_progress.as_mut() {
            Some((_, buf)) => {
                buf.extend_from_slice(chunk);
                Ok(())
            }
            None => Err(AssemblyError::ContinuationWithoutStart),
        }
    }

    /// Append the final fragment and yield the complete logical message.
    pub fn finish(&mut self, chunk: &[u8]) -> Result<(MessageKind, Bytes), AssemblyError> {
        match self.in_progress.take() {
            Some((kind, mut buf)) => {
                buf.extend_from_slice(chunk);
                Ok((kind, buf.freeze()))
            }
            None => Err(AssemblyError::ContinuationWithoutStart),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_scripted_fragments() {
        let mut assembler = MessageAssembler::new();
        assembler.begin(MessageKind::Binary, b"foo").unwrap();
        assembler.push(b"bar").unwrap();
        assembler.push(b"").unwrap();
        let (kind, payload) = assembler.finish(b"baz").unwrap();
        assert_eq!(kind, MessageKind::Binary);
        assert_eq!(payload.as_ref(), b"foobarbaz");
    }

    #[test]
    fn two_fragment_message() {
        let mut assembler = MessageAssembler::new();
        assembler.begin(MessageKind::Text, b"he").unwrap();
        let (kind, payload) = assembler.finish(b"llo").unwrap();
        assert_eq!(kind, MessageKind::Text);
        assert_eq!(payload.as_ref(), b"hello");
    }

    #[test]
    fn assembler_is_reusable_after_finish() {
        let mut assembler = MessageAssembler::new();
        assembler.begin(MessageKind::Binary, b"a").unwrap();
        assembler.finish(b"b").unwrap();

        assembler.begin(MessageKind::Binary, b"c").unwrap();
        let (_, payload) = assembler.finish(b"d").unwrap();
        assert_eq!(payload.as_ref(), b"cd");
    }

    #[test]
    fn rejects_interleaved_starts() {
        let mut assembler = MessageAssembler::new();
        assembler.begin(MessageKind::Binary, b"a").unwrap();
        assert_eq!(
            assembler.begin(MessageKind::Binary, b"b"),
            Err(AssemblyError::StartMidMessage)
        );
    }

    #[test]
    fn rejects_orphan_continuations() {
        let mut assembler = MessageAssembler::new();
        assert_eq!(assembler.push(b"a"), Err(AssemblyError::ContinuationWithoutStart));
        assert!(assembler.finish(b"a").is_err());
    }

    #[test]
    fn accumulates_past_initial_capacity() {
        let mut assembler = MessageAssembler::new();
        assembler.begin(MessageKind::Binary, &[0u8; 60 * 1024]).unwrap();
        assembler.push(&[1u8; 60 * 1024]).unwrap();
        let (_, payload) = assembler.finish(&[2u8; 1024]).unwrap();
        assert_eq!(payload.len(), 121 * 1024);
    }
}
