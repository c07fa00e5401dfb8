//! Digest and random primitives exposed to scripts.
//!
//! Digests come in two shapes: one-shot helpers over a byte slice, and
//! incremental contexts that scripts drive through refcounted heap
//! handles (create, update in chunks, finish). CRC-32 is the same
//! polynomial the GZIP trailer uses.

use crate::error::{Result, RuntimeError};
use crate::heap::{Heap, Value};
use sha1::{Digest as _, Sha1};
use sha2::{Digest as _, Sha256, Sha512};

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestKind {
    /// SHA-1 (20-byte digest).
    Sha1,
    /// SHA-256 (32-byte digest).
    Sha256,
    /// SHA-512 (64-byte digest).
    Sha512,
}

enum DigestInner {
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
}

/// An incremental digest computation.
pub struct Digest {
    inner: DigestInner,
}

impl Digest {
    /// Starts a digest of the given kind.
    #[must_use]
    pub fn new(kind: DigestKind) -> Self {
        let inner = match kind {
            DigestKind::Sha1 => DigestInner::Sha1(Sha1::new()),
            DigestKind::Sha256 => DigestInner::Sha256(Sha256::new()),
            DigestKind::Sha512 => DigestInner::Sha512(Sha512::new()),
        };
        Self { inner }
    }

    /// Feeds a chunk.
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.inner {
            DigestInner::Sha1(h) => h.update(data),
            DigestInner::Sha256(h) => h.update(data),
            DigestInner::Sha512(h) => h.update(data),
        }
    }

    /// Consumes the context and returns the digest bytes.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        match self.inner {
            DigestInner::Sha1(h) => h.finalize().to_vec(),
            DigestInner::Sha256(h) => h.finalize().to_vec(),
            DigestInner::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

/// One-shot SHA-1.
#[must_use]
pub fn sha1(data: &[u8]) -> Vec<u8> {
    let mut d = Digest::new(DigestKind::Sha1);
    d.update(data);
    d.finish()
}

/// One-shot SHA-256.
#[must_use]
pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut d = Digest::new(DigestKind::Sha256);
    d.update(data);
    d.finish()
}

/// One-shot SHA-512.
#[must_use]
pub fn sha512(data: &[u8]) -> Vec<u8> {
    let mut d = Digest::new(DigestKind::Sha512);
    d.update(data);
    d.finish()
}

/// CRC-32 (RFC 1952 polynomial) of a byte slice.
#[must_use]
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Fills `buf` with OS-provided random bytes.
pub fn fill_random(buf: &mut [u8]) -> Result<()> {
    getrandom::fill(buf).map_err(|_| RuntimeError::NotSupported("secure random source"))
}

/// Uniform random integer in `min..=max`, rejection-sampled so the range
/// carries no modulo bias.
pub fn secure_random(min: i32, max: i32) -> Result<i32> {
    if min > max {
        return Err(RuntimeError::invalid_argument("invalid random range"));
    }
    let span = (i64::from(max) - i64::from(min) + 1) as u64;
    if span == 1 {
        return Ok(min);
    }
    let limit = u64::MAX - u64::MAX % span;
    loop {
        let mut bytes = [0u8; 8];
        fill_random(&mut bytes)?;
        let draw = u64::from_le_bytes(bytes);
        if draw < limit {
            return Ok((i64::from(min) + (draw % span) as i64) as i32);
        }
    }
}

struct DigestState {
    digest: Option<Digest>,
}

/// Heap-handle surface for incremental digests.
pub struct CryptoHandles {
    digest_tag: u32,
}

impl CryptoHandles {
    /// Reserves the digest handle type; call once per heap.
    pub fn install(heap: &mut Heap) -> Self {
        Self {
            digest_tag: heap.register_handle_types(1),
        }
    }

    /// Creates a digest handle.
    pub fn digest_create(&self, heap: &mut Heap, kind: DigestKind) -> Value {
        heap.create_handle(
            self.digest_tag,
            DigestState {
                digest: Some(Digest::new(kind)),
            },
        )
    }

    /// Feeds a byte-array value into a digest handle.
    pub fn digest_update(&self, heap: &mut Heap, handle: Value, data: Value) -> Result<()> {
        let bytes = heap.get_byte_vec(data)?;
        let state = heap.get_handle_mut::<DigestState>(handle, self.digest_tag)?;
        let digest = state
            .digest
            .as_mut()
            .ok_or_else(|| RuntimeError::invalid_access("digest already finished"))?;
        digest.update(&bytes);
        Ok(())
    }

    /// Finishes a digest handle and returns the digest as a byte array.
    /// The handle is closed afterwards.
    pub fn digest_finish(&self, heap: &mut Heap, handle: Value) -> Result<Value> {
        let state = heap.get_handle_mut::<DigestState>(handle, self.digest_tag)?;
        let digest = state
            .digest
            .take()
            .ok_or_else(|| RuntimeError::invalid_access("digest already finished"))?;
        let out = digest.finish();
        heap.close_handle(handle)?;
        Ok(heap.create_byte_array(&out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn sha256_fips_vector() {
        assert_eq!(
            hex(&sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn sha1_fips_vector() {
        assert_eq!(hex(&sha1(b"abc")), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn crc32_check_value() {
        // the classic CRC-32 check string
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn incremental_matches_one_shot() {
        let mut d = Digest::new(DigestKind::Sha256);
        d.update(b"hello ");
        d.update(b"world");
        assert_eq!(d.finish(), sha256(b"hello world"));
    }

    #[test]
    fn secure_random_respects_bounds() {
        for _ in 0..100 {
            let n = secure_random(-3, 7).unwrap();
            assert!((-3..=7).contains(&n));
        }
        assert_eq!(secure_random(5, 5).unwrap(), 5);
        assert!(secure_random(3, 2).is_err());
    }

    #[test]
    fn digest_handles_roundtrip() {
        let mut heap = Heap::new();
        let handles = CryptoHandles::install(&mut heap);
        let h = handles.digest_create(&mut heap, DigestKind::Sha1);
        let chunk = heap.create_byte_array(b"abc");
        handles.digest_update(&mut heap, h, chunk).unwrap();
        let out = handles.digest_finish(&mut heap, h).unwrap();
        assert_eq!(heap.get_byte_vec(out).unwrap(), sha1(b"abc"));

        // finished handles refuse further use
        assert!(handles.digest_update(&mut heap, h, chunk).is_err());
    }
}
