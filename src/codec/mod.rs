//! Streaming DEFLATE/GZIP codec.
//!
//! Both directions operate on caller-supplied bounded source and
//! destination windows through an explicit pump protocol: every call
//! consumes what it can, produces what fits, and reports one of
//! [`Status::More`] (feed more input), [`Status::Flush`] (drain the
//! destination) or [`Status::Done`] (stream ended cleanly). Corrupt input
//! is an error and the decoder stays in the error state afterwards.
//!
//! The compressor emits fixed-Huffman blocks only; the decompressor
//! accepts every valid RFC 1951 stream. In flushable mode the compressor
//! inserts empty stored-block markers so a receiver can decode everything
//! written up to each flush point, which is what interactive protocols
//! need.

mod deflate;
mod gzip;
mod inflate;

pub use deflate::Compressor;
pub use gzip::{GzipCompressor, GzipDecompressor};
pub use inflate::Decompressor;

use crate::error::{Result, RuntimeError};

/// Outcome of one pump call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// All input consumed and the stream is not finished: append input
    /// and call again.
    More,
    /// The destination filled up (or internal output is pending): drain
    /// it and call again.
    Flush,
    /// The stream ended cleanly.
    Done,
}

/// Byte counts of one pump call.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    /// Pump outcome.
    pub status: Status,
    /// Bytes read from the source window.
    pub consumed: usize,
    /// Bytes written to the destination window.
    pub produced: usize,
}

const ONE_SHOT_CHUNK: usize = 4096;

fn pump_to_end(
    mut step: impl FnMut(&[u8], &mut [u8], bool) -> Result<Progress>,
    data: &[u8],
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut chunk = [0u8; ONE_SHOT_CHUNK];
    let mut pos = 0;
    loop {
        let progress = step(&data[pos..], &mut chunk, true)?;
        pos += progress.consumed;
        out.extend_from_slice(&chunk[..progress.produced]);
        match progress.status {
            Status::Done => return Ok(out),
            Status::Flush => {}
            Status::More => {
                if pos >= data.len() {
                    return Err(RuntimeError::BadFormat("truncated compressed stream"));
                }
            }
        }
    }
}

/// One-shot raw DEFLATE compression of a memory buffer.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut c = Compressor::new(false);
    pump_to_end(|src, dst, fin| c.compress(src, dst, false, fin), data)
}

/// One-shot raw DEFLATE decompression of a memory buffer.
pub fn uncompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut d = Decompressor::new();
    pump_to_end(|src, dst, _| d.uncompress(src, dst), data)
}

/// One-shot GZIP compression of a memory buffer.
pub fn gzip_compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut c = GzipCompressor::new();
    pump_to_end(|src, dst, fin| c.compress(src, dst, false, fin), data)
}

/// One-shot GZIP decompression of a memory buffer.
pub fn gzip_uncompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut d = GzipDecompressor::new();
    pump_to_end(|src, dst, _| d.uncompress(src, dst), data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_simple() {
        let data = b"The quick brown fox jumps over the lazy dog";
        let packed = compress(data).unwrap();
        assert_eq!(uncompress(&packed).unwrap(), data);
    }

    #[test]
    fn roundtrip_empty() {
        let packed = compress(b"").unwrap();
        assert!(!packed.is_empty());
        assert_eq!(uncompress(&packed).unwrap(), b"");
    }

    #[test]
    fn roundtrip_repetitive() {
        let mut data = Vec::new();
        for i in 0..2000u32 {
            data.extend_from_slice(b"abcabcabd");
            data.push((i % 251) as u8);
        }
        let packed = compress(&data).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(uncompress(&packed).unwrap(), data);
    }

    #[test]
    fn roundtrip_long_random() {
        fastrand::seed(7);
        let data: Vec<u8> = (0..100_000).map(|_| fastrand::u8(..)).collect();
        let packed = compress(&data).unwrap();
        assert_eq!(uncompress(&packed).unwrap(), data);
    }

    #[test]
    fn gzip_header_and_trailer_wire_format() {
        let data = b"The quick brown fox jumps over the lazy dog";
        let packed = gzip_compress(data).unwrap();
        assert_eq!(
            &packed[..10],
            &[0x1F, 0x8B, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03]
        );
        let isize_bytes = &packed[packed.len() - 4..];
        assert_eq!(isize_bytes, &(data.len() as u32).to_le_bytes());
        assert_eq!(gzip_uncompress(&packed).unwrap(), data);
    }

    #[test]
    fn truncated_input_is_an_error() {
        let data = b"some compressible data some compressible data";
        let packed = compress(data).unwrap();
        assert!(uncompress(&packed[..packed.len() - 1]).is_err());
    }
}
