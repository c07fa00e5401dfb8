//! GZIP framing (RFC 1952) over the streaming DEFLATE codec.
//!
//! Production emits the fixed header `1F 8B 08 00 00 00 00 00 00 03`
//! (CM=8, no flags, no mtime, OS=Unix) and the CRC-32/ISIZE trailer.
//! Consumption honours the FTEXT/FHCRC/FEXTRA/FNAME/FCOMMENT flags and
//! verifies both trailer fields.

use super::deflate::Compressor;
use super::inflate::Decompressor;
use super::{Progress, Status};
use crate::error::{Result, RuntimeError};

const HEADER: [u8; 10] = [0x1F, 0x8B, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03];

const FLG_FHCRC: u8 = 0x02;
const FLG_FEXTRA: u8 = 0x04;
const FLG_FNAME: u8 = 0x08;
const FLG_FCOMMENT: u8 = 0x10;

/// Streaming GZIP compressor.
pub struct GzipCompressor {
    inner: Compressor,
    crc: crc32fast::Hasher,
    isize: u32,
    pending: Vec<u8>,
    pending_pos: usize,
    header_sent: bool,
    finished: bool,
}

impl GzipCompressor {
    /// Creates a compressor (non-flushable body).
    #[must_use]
    pub fn new() -> Self {
        Self::with_flushable(false)
    }

    /// Creates a compressor whose DEFLATE body honours flush requests.
    #[must_use]
    pub fn with_flushable(flushable: bool) -> Self {
        Self {
            inner: Compressor::new(flushable),
            crc: crc32fast::Hasher::new(),
            isize: 0,
            pending: Vec::new(),
            pending_pos: 0,
            header_sent: false,
            finished: false,
        }
    }

    fn drain_pending(&mut self, dst: &mut [u8], dpos: &mut usize) {
        while self.pending_pos < self.pending.len() && *dpos < dst.len() {
            dst[*dpos] = self.pending[self.pending_pos];
            *dpos += 1;
            self.pending_pos += 1;
        }
        if self.pending_pos == self.pending.len() {
            self.pending.clear();
            self.pending_pos = 0;
        }
    }

    /// Pumps the compressor once; same protocol as
    /// [`Compressor::compress`].
    pub fn compress(
        &mut self,
        src: &[u8],
        dst: &mut [u8],
        flush: bool,
        final_: bool,
    ) -> Result<Progress> {
        let mut dpos = 0usize;

        if !self.header_sent {
            self.pending.extend_from_slice(&HEADER);
            self.header_sent = true;
        }
        self.drain_pending(dst, &mut dpos);
        if !self.pending.is_empty() {
            return Ok(Progress {
                status: Status::Flush,
                consumed: 0,
                produced: dpos,
            });
        }

        if self.finished {
            return Ok(Progress {
                status: Status::Done,
                consumed: 0,
                produced: dpos,
            });
        }

        let p = self.inner.compress(src, &mut dst[dpos..], flush, final_)?;
        self.crc.update(&src[..p.consumed]);
        self.isize = self.isize.wrapping_add(p.consumed as u32);
        dpos += p.produced;

        let status = if matches!(p.status, Status::Done) {
            let crc = std::mem::take(&mut self.crc).finalize();
            self.pending.extend_from_slice(&crc.to_le_bytes());
            self.pending.extend_from_slice(&self.isize.to_le_bytes());
            self.finished = true;
            self.drain_pending(dst, &mut dpos);
            if self.pending.is_empty() {
                Status::Done
            } else {
                Status::Flush
            }
        } else {
            p.status
        };

        Ok(Progress {
            status,
            consumed: p.consumed,
            produced: dpos,
        })
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Header,
    ExtraLen,
    ExtraData,
    Name,
    Comment,
    HeaderCrc,
    Body,
    Trailer,
    Finish,
}

/// Streaming GZIP decompressor.
pub struct GzipDecompressor {
    state: DecodeState,
    error: bool,
    inner: Decompressor,
    crc: crc32fast::Hasher,
    isize: u32,
    /// Accumulates the fixed header and the trailer across calls.
    scratch: Vec<u8>,
    flags: u8,
    extra_remaining: usize,
    /// Bytes the inner decoder over-read past the DEFLATE stream end.
    leftover: Vec<u8>,
}

impl GzipDecompressor {
    /// Creates a decompressor positioned at the GZIP magic.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: DecodeState::Header,
            error: false,
            inner: Decompressor::new(),
            crc: crc32fast::Hasher::new(),
            isize: 0,
            scratch: Vec::new(),
            flags: 0,
            extra_remaining: 0,
            leftover: Vec::new(),
        }
    }

    /// Pumps the decompressor once; same protocol as
    /// [`Decompressor::uncompress`].
    pub fn uncompress(&mut self, src: &[u8], dst: &mut [u8]) -> Result<Progress> {
        if self.error {
            return Err(RuntimeError::BadFormat("decoder is in the error state"));
        }
        match self.step(src, dst) {
            Ok(p) => Ok(p),
            Err(e) => {
                self.error = true;
                Err(e)
            }
        }
    }

    fn next_byte(&mut self, src: &[u8], spos: &mut usize) -> Option<u8> {
        if let Some(&b) = self.leftover.first() {
            self.leftover.remove(0);
            return Some(b);
        }
        if *spos < src.len() {
            let b = src[*spos];
            *spos += 1;
            return Some(b);
        }
        None
    }

    fn step(&mut self, src: &[u8], dst: &mut [u8]) -> Result<Progress> {
        let mut spos = 0usize;
        let mut dpos = 0usize;

        macro_rules! ret {
            ($status:expr) => {
                return Ok(Progress {
                    status: $status,
                    consumed: spos,
                    produced: dpos,
                })
            };
        }

        loop {
            match self.state {
                DecodeState::Finish => ret!(Status::Done),

                DecodeState::Header => {
                    while self.scratch.len() < HEADER.len() {
                        match self.next_byte(src, &mut spos) {
                            Some(b) => self.scratch.push(b),
                            None => ret!(Status::More),
                        }
                    }
                    if self.scratch[0] != 0x1F || self.scratch[1] != 0x8B {
                        return Err(RuntimeError::BadFormat("bad gzip magic"));
                    }
                    if self.scratch[2] != 8 {
                        return Err(RuntimeError::BadFormat("unknown gzip compression method"));
                    }
                    self.flags = self.scratch[3];
                    self.scratch.clear();
                    self.state = DecodeState::ExtraLen;
                }

                DecodeState::ExtraLen => {
                    if self.flags & FLG_FEXTRA == 0 {
                        self.state = DecodeState::Name;
                        continue;
                    }
                    while self.scratch.len() < 2 {
                        match self.next_byte(src, &mut spos) {
                            Some(b) => self.scratch.push(b),
                            None => ret!(Status::More),
                        }
                    }
                    self.extra_remaining =
                        usize::from(u16::from_le_bytes([self.scratch[0], self.scratch[1]]));
                    self.scratch.clear();
                    self.state = DecodeState::ExtraData;
                }

                DecodeState::ExtraData => {
                    while self.extra_remaining > 0 {
                        match self.next_byte(src, &mut spos) {
                            Some(_) => self.extra_remaining -= 1,
                            None => ret!(Status::More),
                        }
                    }
                    self.state = DecodeState::Name;
                }

                DecodeState::Name => {
                    if self.flags & FLG_FNAME != 0 {
                        loop {
                            match self.next_byte(src, &mut spos) {
                                Some(0) => break,
                                Some(_) => {}
                                None => ret!(Status::More),
                            }
                        }
                    }
                    self.state = DecodeState::Comment;
                }

                DecodeState::Comment => {
                    if self.flags & FLG_FCOMMENT != 0 {
                        loop {
                            match self.next_byte(src, &mut spos) {
                                Some(0) => break,
                                Some(_) => {}
                                None => ret!(Status::More),
                            }
                        }
                    }
                    self.state = DecodeState::HeaderCrc;
                }

                DecodeState::HeaderCrc => {
                    if self.flags & FLG_FHCRC != 0 {
                        while self.scratch.len() < 2 {
                            match self.next_byte(src, &mut spos) {
                                Some(b) => self.scratch.push(b),
                                None => ret!(Status::More),
                            }
                        }
                        self.scratch.clear();
                    }
                    self.state = DecodeState::Body;
                }

                DecodeState::Body => {
                    let p = self.inner.uncompress(&src[spos..], &mut dst[dpos..])?;
                    self.crc.update(&dst[dpos..dpos + p.produced]);
                    self.isize = self.isize.wrapping_add(p.produced as u32);
                    spos += p.consumed;
                    dpos += p.produced;
                    match p.status {
                        Status::Done => {
                            self.leftover = self.inner.take_leftover();
                            self.state = DecodeState::Trailer;
                        }
                        status => ret!(status),
                    }
                }

                DecodeState::Trailer => {
                    while self.scratch.len() < 8 {
                        match self.next_byte(src, &mut spos) {
                            Some(b) => self.scratch.push(b),
                            None => ret!(Status::More),
                        }
                    }
                    let want_crc = u32::from_le_bytes([
                        self.scratch[0],
                        self.scratch[1],
                        self.scratch[2],
                        self.scratch[3],
                    ]);
                    let want_isize = u32::from_le_bytes([
                        self.scratch[4],
                        self.scratch[5],
                        self.scratch[6],
                        self.scratch[7],
                    ]);
                    let got_crc = std::mem::take(&mut self.crc).finalize();
                    if got_crc != want_crc {
                        return Err(RuntimeError::BadFormat("gzip CRC mismatch"));
                    }
                    if self.isize != want_isize {
                        return Err(RuntimeError::BadFormat("gzip length mismatch"));
                    }
                    self.scratch.clear();
                    self.state = DecodeState::Finish;
                }
            }
        }
    }
}

impl Default for GzipDecompressor {
    fn default() -> Self {
        Self::new()
    }
}
