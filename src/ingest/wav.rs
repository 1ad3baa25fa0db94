//! # Incremental WAV Writer
//!
//! Writes a canonical 44-byte PCM WAV header followed by a raw sample
//! stream. The RIFF and `data` chunk sizes are unknown while the segment is
//! live, so the header is written with zero placeholders on open and patched
//! in place when the segment closes.
//!
//! ```text
//! [0-3]   "RIFF"      [4-7]   chunk size = 36 + data bytes
//! [8-11]  "WAVE"      [12-15] "fmt "
//! [16-19] 16          [20-21] 1 (PCM)
//! [22-23] channels    [24-27] sample rate
//! [28-31] byte rate   [32-33] block align
//! [34-35] bits = 16   [36-39] "data"
//! [40-43] data bytes
//! ```

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

/// Size of the RIFF/WAVE/fmt/data preamble.
pub const WAV_HEADER_LEN: usize = 44;

const BITS_PER_SAMPLE: u16 = 16;
const RIFF_SIZE_OFFSET: u64 = 4;
const DATA_SIZE_OFFSET: u64 = 40;

/// Incrementally written 16-bit PCM WAV file.
///
/// `finalize` must run on every exit path, including after a failed write;
/// the segment rotator owns that guarantee.
pub struct WavSegmentWriter {
    file: File,
    data_bytes: u64,
}

impl WavSegmentWriter {
    /// Create the file (create-new semantics, collisions are errors) and
    /// write the header with placeholder sizes.
    pub fn create(path: &Path, sample_rate: u32, channels: u16) -> io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;

        let byte_rate = sample_rate * channels as u32 * (BITS_PER_SAMPLE / 8) as u32;
        let block_align = channels * (BITS_PER_SAMPLE / 8);

        let mut header = [0u8; WAV_HEADER_LEN];
        header[0..4].copy_from_slice(b"RIFF");
        // [4..8) chunk size placeholder, patched on finalize
        header[8..12].copy_from_slice(b"WAVE");
        header[12..16].copy_from_slice(b"fmt ");
        header[16..20].copy_from_slice(&16u32.to_le_bytes());
        header[20..22].copy_from_slice(&1u16.to_le_bytes());
        header[22..24].copy_from_slice(&channels.to_le_bytes());
        header[24..28].copy_from_slice(&sample_rate.to_le_bytes());
        header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
        header[32..34].copy_from_slice(&block_align.to_le_bytes());
        header[34..36].copy_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
        header[36..40].copy_from_slice(b"data");
        // [40..44) data size placeholder, patched on finalize

        file.write_all(&header)?;

        Ok(Self { file, data_bytes: 0 })
    }

    /// Append PCM bytes after the header.
    pub fn write(&mut self, pcm: &[u8]) -> io::Result<()> {
        self.file.write_all(pcm)?;
        self.data_bytes += pcm.len() as u64;
        Ok(())
    }

    /// Patch the RIFF and data sizes, flush, and release the handle.
    pub fn finalize(mut self) -> io::Result<u64> {
        let data_bytes = self.data_bytes as u32;

        self.file.seek(SeekFrom::Start(RIFF_SIZE_OFFSET))?;
        self.file.write_all(&(36 + data_bytes).to_le_bytes())?;
        self.file.seek(SeekFrom::Start(DATA_SIZE_OFFSET))?;
        self.file.write_all(&data_bytes.to_le_bytes())?;
        self.file.flush()?;

        Ok(self.data_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_u32(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn read_u16(bytes: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap())
    }

    #[test]
    fn header_has_placeholder_sizes_until_finalized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("open.wav");

        let mut writer = WavSegmentWriter::create(&path, 16000, 1).unwrap();
        writer.write(&[0u8; 64]).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(read_u32(&bytes, 4), 0);
        assert_eq!(read_u32(&bytes, 40), 0);
    }

    #[test]
    fn finalize_patches_riff_and_data_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sizes.wav");

        let mut writer = WavSegmentWriter::create(&path, 16000, 1).unwrap();
        writer.write(&[0u8; 320]).unwrap();
        assert_eq!(writer.finalize().unwrap(), 320);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), WAV_HEADER_LEN + 320);
        assert_eq!(read_u32(&bytes, 4), 36 + 320);
        assert_eq!(read_u32(&bytes, 40), 320);
    }

    #[test]
    fn fmt_chunk_describes_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fmt.wav");

        let writer = WavSegmentWriter::create(&path, 16000, 2).unwrap();
        writer.finalize().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(&bytes[12..16], b"fmt ");
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(read_u32(&bytes, 16), 16);
        assert_eq!(read_u16(&bytes, 20), 1);
        assert_eq!(read_u16(&bytes, 22), 2);
        assert_eq!(read_u32(&bytes, 24), 16000);
        assert_eq!(read_u32(&bytes, 28), 64000);
        assert_eq!(read_u16(&bytes, 32), 4);
        assert_eq!(read_u16(&bytes, 34), 16);
    }

    #[test]
    fn empty_segment_finalizes_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wav");

        let writer = WavSegmentWriter::create(&path, 8000, 1).unwrap();
        assert_eq!(writer.finalize().unwrap(), 0);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), WAV_HEADER_LEN);
        assert_eq!(read_u32(&bytes, 4), 36);
        assert_eq!(read_u32(&bytes, 40), 0);
    }

    #[test]
    fn create_refuses_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dup.wav");

        let writer = WavSegmentWriter::create(&path, 16000, 1).unwrap();
        writer.finalize().unwrap();
        assert!(WavSegmentWriter::create(&path, 16000, 1).is_err());
    }
}
