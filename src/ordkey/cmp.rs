//! Byte-walking comparator over serialized atoms.
//!
//! Decodes one atom from each side and compares by an explicit rank:
//! integers < floats < arrays < strings < hashes. Mixed packed widths
//! (byte-array against int-array and so on) widen on the fly; a generic
//! array element is decoded recursively. Malformed input is an error,
//! never a bogus ordering.

use super::{
    MAX_DEPTH, TAG_ARRAY, TAG_BYTE_ARRAY, TAG_BYTE_INT, TAG_BYTE_STRING, TAG_FLOAT,
    TAG_FLOAT_ZERO, TAG_HASH, TAG_INT, TAG_INT_ARRAY, TAG_INT_STRING, TAG_SHORT_ARRAY,
    TAG_SHORT_INT, TAG_SHORT_STRING, TAG_ZERO,
};
use crate::error::{Result, RuntimeError};
use std::cmp::Ordering;

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn byte(&mut self) -> Result<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or(RuntimeError::BadFormat("truncated atom"))?;
        self.pos += 1;
        Ok(b)
    }

    fn bytes(&mut self, n: usize) -> Result<&[u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.buf.len())
            .ok_or(RuntimeError::BadFormat("truncated atom"))?;
        let s = &self.buf[self.pos..end];
        self.pos = end;
        Ok(s)
    }

    fn length(&mut self, class: u8) -> Result<usize> {
        Ok(match class {
            0..=12 => usize::from(class),
            13 => usize::from(self.byte()?),
            14 => {
                let b = self.bytes(2)?;
                usize::from(u16::from_le_bytes([b[0], b[1]]))
            }
            _ => {
                let b = self.bytes(4)?;
                u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize
            }
        })
    }
}

/// Rank classes in ascending semantic order.
fn rank(tag: u8) -> Result<u8> {
    Ok(match tag {
        TAG_ZERO | TAG_BYTE_INT | TAG_SHORT_INT | TAG_INT => 0,
        TAG_FLOAT | TAG_FLOAT_ZERO => 1,
        TAG_ARRAY | TAG_BYTE_ARRAY | TAG_SHORT_ARRAY | TAG_INT_ARRAY => 2,
        TAG_BYTE_STRING | TAG_SHORT_STRING | TAG_INT_STRING => 3,
        TAG_HASH => 4,
        _ => return Err(RuntimeError::BadFormat("unknown atom tag")),
    })
}

/// Compares two serialized values; the sign equals the semantic ordering
/// of the original values.
pub fn compare(a: &[u8], b: &[u8]) -> Result<Ordering> {
    let mut ra = Reader { buf: a, pos: 0 };
    let mut rb = Reader { buf: b, pos: 0 };
    let ord = compare_atom(&mut ra, &mut rb, 0)?;
    if ord == Ordering::Equal && (ra.pos != a.len() || rb.pos != b.len()) {
        return Err(RuntimeError::BadFormat("trailing bytes after atom"));
    }
    Ok(ord)
}

/// Integer payload of a numeric atom whose head byte was already consumed.
fn int_value(r: &mut Reader<'_>, tag: u8) -> Result<i64> {
    Ok(match tag {
        TAG_ZERO => 0,
        TAG_BYTE_INT => i64::from(r.byte()?),
        TAG_SHORT_INT => {
            let b = r.bytes(2)?;
            i64::from(u16::from_le_bytes([b[0], b[1]]))
        }
        _ => {
            let b = r.bytes(4)?;
            i64::from(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        }
    })
}

fn float_value(r: &mut Reader<'_>, tag: u8) -> Result<f32> {
    if tag == TAG_FLOAT_ZERO {
        return Ok(0.0);
    }
    let b = r.bytes(4)?;
    Ok(f32::from_bits(u32::from_le_bytes([b[0], b[1], b[2], b[3]])))
}

/// Total order on floats: NaN compares equal to NaN and above everything
/// else (inputs are canonicalized at serialization time).
fn cmp_floats(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

fn packed_width(tag: u8) -> Option<u8> {
    match tag {
        TAG_BYTE_ARRAY | TAG_BYTE_STRING => Some(1),
        TAG_SHORT_ARRAY | TAG_SHORT_STRING => Some(2),
        TAG_INT_ARRAY | TAG_INT_STRING => Some(4),
        _ => None,
    }
}

fn packed_elem(r: &mut Reader<'_>, width: u8) -> Result<i64> {
    Ok(match width {
        1 => i64::from(r.byte()?),
        2 => {
            let b = r.bytes(2)?;
            i64::from(u16::from_le_bytes([b[0], b[1]]))
        }
        _ => {
            let b = r.bytes(4)?;
            i64::from(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        }
    })
}

/// Compares an already-decoded integer element against the next atom of a
/// generic array.
fn cmp_int_vs_atom(n: i64, r: &mut Reader<'_>, _depth: u32) -> Result<Ordering> {
    let head = r.byte()?;
    let tag = head & 0x0F;
    if rank(tag)? == 0 {
        let other = int_value(r, tag)?;
        Ok(n.cmp(&other))
    } else {
        // integers sort below every other class
        Ok(Ordering::Less)
    }
}

fn compare_atom(ra: &mut Reader<'_>, rb: &mut Reader<'_>, depth: u32) -> Result<Ordering> {
    if depth > MAX_DEPTH {
        return Err(RuntimeError::RecursionLimit);
    }
    let head_a = ra.byte()?;
    let head_b = rb.byte()?;
    let (tag_a, class_a) = (head_a & 0x0F, head_a >> 4);
    let (tag_b, class_b) = (head_b & 0x0F, head_b >> 4);
    let (rank_a, rank_b) = (rank(tag_a)?, rank(tag_b)?);
    if rank_a != rank_b {
        return Ok(rank_a.cmp(&rank_b));
    }

    match rank_a {
        0 => Ok(int_value(ra, tag_a)?.cmp(&int_value(rb, tag_b)?)),
        1 => Ok(cmp_floats(float_value(ra, tag_a)?, float_value(rb, tag_b)?)),
        2 => {
            let la = ra.length(class_a)?;
            let lb = rb.length(class_b)?;
            let wa = packed_width(tag_a);
            let wb = packed_width(tag_b);
            for _ in 0..la.min(lb) {
                let ord = match (wa, wb) {
                    (Some(wa), Some(wb)) => packed_elem(ra, wa)?.cmp(&packed_elem(rb, wb)?),
                    (Some(wa), None) => {
                        let n = packed_elem(ra, wa)?;
                        cmp_int_vs_atom(n, rb, depth)?
                    }
                    (None, Some(wb)) => {
                        let n = packed_elem(rb, wb)?;
                        cmp_int_vs_atom(n, ra, depth)?.reverse()
                    }
                    (None, None) => compare_atom(ra, rb, depth + 1)?,
                };
                if ord != Ordering::Equal {
                    return Ok(ord);
                }
            }
            Ok(la.cmp(&lb))
        }
        3 => {
            let la = ra.length(class_a)?;
            let lb = rb.length(class_b)?;
            let wa = packed_width(tag_a).unwrap_or(4);
            let wb = packed_width(tag_b).unwrap_or(4);
            for _ in 0..la.min(lb) {
                let ord = packed_elem(ra, wa)?.cmp(&packed_elem(rb, wb)?);
                if ord != Ordering::Equal {
                    return Ok(ord);
                }
            }
            Ok(la.cmp(&lb))
        }
        _ => {
            let la = ra.length(class_a)?;
            let lb = rb.length(class_b)?;
            for _ in 0..la.min(lb) {
                let key_ord = compare_atom(ra, rb, depth + 1)?;
                if key_ord != Ordering::Equal {
                    return Ok(key_ord);
                }
                let val_ord = compare_atom(ra, rb, depth + 1)?;
                if val_ord != Ordering::Equal {
                    return Ok(val_ord);
                }
            }
            Ok(la.cmp(&lb))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{Heap, Value};
    use crate::ordkey::serialize;

    fn ser(heap: &mut Heap, v: Value) -> Vec<u8> {
        serialize(heap, v).unwrap()
    }

    #[test]
    fn mixed_width_arrays_widen() {
        let mut heap = Heap::new();
        // [1, 2] packs as bytes, [1, 70000] needs int elements
        let small = heap.create_array(0);
        heap.append_elem(small, Value::Int(1)).unwrap();
        heap.append_elem(small, Value::Int(2)).unwrap();
        let wide = heap.create_array(0);
        heap.append_elem(wide, Value::Int(1)).unwrap();
        heap.append_elem(wide, Value::Int(70_000)).unwrap();

        let ss = ser(&mut heap, small);
        let sw = ser(&mut heap, wide);
        assert_eq!(compare(&ss, &sw).unwrap(), Ordering::Less);
        assert_eq!(compare(&sw, &ss).unwrap(), Ordering::Greater);
    }

    #[test]
    fn packed_vs_generic_elements_compare_numerically() {
        let mut heap = Heap::new();
        // [3] packed against [3, []] generic shares the prefix
        let packed = heap.create_array(0);
        heap.append_elem(packed, Value::Int(3)).unwrap();

        let generic = heap.create_array(0);
        heap.append_elem(generic, Value::Int(3)).unwrap();
        let inner = heap.create_array(0);
        heap.append_elem(generic, inner).unwrap();

        let sp = ser(&mut heap, packed);
        let sg = ser(&mut heap, generic);
        assert_eq!(compare(&sp, &sg).unwrap(), Ordering::Less);
    }

    #[test]
    fn negative_ints_sort_below_small_bytes() {
        let mut heap = Heap::new();
        let neg = ser(&mut heap, Value::Int(-3));
        let pos = ser(&mut heap, Value::Int(200));
        assert_eq!(compare(&neg, &pos).unwrap(), Ordering::Less);
    }

    #[test]
    fn floats_sort_above_ints_and_order_internally() {
        let mut heap = Heap::new();
        let i = ser(&mut heap, Value::Int(1_000_000));
        let f = ser(&mut heap, Value::Float(0.5));
        assert_eq!(compare(&i, &f).unwrap(), Ordering::Less);

        let f2 = ser(&mut heap, Value::Float(2.5));
        assert_eq!(compare(&f, &f2).unwrap(), Ordering::Less);

        let nan = ser(&mut heap, Value::Float(f32::NAN));
        assert_eq!(compare(&f2, &nan).unwrap(), Ordering::Less);
    }
}
