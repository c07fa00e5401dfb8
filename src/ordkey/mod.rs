//! Order-preserving binary serialization of script values.
//!
//! A serialized value is a self-describing sequence of tagged atoms whose
//! comparator ordering ([`compare`]) equals the natural ordering of the
//! original values: integers < floats < arrays < strings < hashes, arrays
//! shorter-is-less on a common prefix, strings by content then length.
//! Two semantically equal values always serialize to identical bytes
//! (hash entries are sorted by key at serialization time, NaN floats are
//! canonicalized), which is what makes the encoding usable as a database
//! key and as the global store's key/value representation.
//!
//! Atom layout: the low nibble of the leading byte is the type tag, the
//! high nibble a length class for container tags. Length classes 0..=12
//! inline the length; 13, 14 and 15 append one, two or four extra
//! little-endian length bytes. All payloads are little-endian.

mod cmp;
mod ser;

pub use cmp::compare;
pub use ser::{deserialize, serialize};

/// Zero integer, no payload.
pub(crate) const TAG_ZERO: u8 = 0;
/// Integer 1..=255, one payload byte.
pub(crate) const TAG_BYTE_INT: u8 = 1;
/// Integer 256..=65535, two payload bytes.
pub(crate) const TAG_SHORT_INT: u8 = 2;
/// Any other 32-bit integer, four payload bytes (signed).
pub(crate) const TAG_INT: u8 = 3;
/// Non-zero float, four payload bytes (IEEE 754 bits, canonical NaN).
pub(crate) const TAG_FLOAT: u8 = 4;
/// Float zero (either sign), no payload.
pub(crate) const TAG_FLOAT_ZERO: u8 = 5;
/// Generic array: length prefix plus element atoms.
pub(crate) const TAG_ARRAY: u8 = 8;
/// Packed array of integers 0..=255.
pub(crate) const TAG_BYTE_ARRAY: u8 = 9;
/// Packed array of integers 0..=65535.
pub(crate) const TAG_SHORT_ARRAY: u8 = 10;
/// Packed array of 32-bit integers.
pub(crate) const TAG_INT_ARRAY: u8 = 11;
/// String with code points 0..=255.
pub(crate) const TAG_BYTE_STRING: u8 = 12;
/// String with code points 0..=65535.
pub(crate) const TAG_SHORT_STRING: u8 = 13;
/// String with arbitrary code points.
pub(crate) const TAG_INT_STRING: u8 = 14;
/// Hash: length prefix (entry count) plus sorted key/value atom pairs.
pub(crate) const TAG_HASH: u8 = 15;

/// Canonical NaN bit pattern emitted for every NaN input.
pub(crate) const CANONICAL_NAN: u32 = 0x7FC0_0000;

/// Maximum nesting depth accepted by the serializer and deserializer.
/// Cyclic structures run into this limit.
pub(crate) const MAX_DEPTH: u32 = 50;

/// The serialization of the integer zero: the missing-value convention of
/// the global store.
#[must_use]
pub fn serialized_zero() -> Vec<u8> {
    vec![TAG_ZERO]
}
