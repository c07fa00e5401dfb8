//! Serializer and deserializer for the ordered atom format.

use super::{
    CANONICAL_NAN, MAX_DEPTH, TAG_ARRAY, TAG_BYTE_ARRAY, TAG_BYTE_INT, TAG_BYTE_STRING, TAG_FLOAT,
    TAG_FLOAT_ZERO, TAG_HASH, TAG_INT, TAG_INT_ARRAY, TAG_INT_STRING, TAG_SHORT_ARRAY,
    TAG_SHORT_INT, TAG_SHORT_STRING, TAG_ZERO,
};
use crate::error::{Result, RuntimeError};
use crate::heap::{Heap, Value};

/// Serializes a value into its canonical ordered byte form.
pub fn serialize(heap: &mut Heap, value: Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_atom(heap, value, &mut out, 0)?;
    Ok(out)
}

fn put_tagged_len(out: &mut Vec<u8>, tag: u8, len: usize) {
    if len <= 12 {
        out.push(((len as u8) << 4) | tag);
    } else if len <= 0xFF {
        out.push((13 << 4) | tag);
        out.push(len as u8);
    } else if len <= 0xFFFF {
        out.push((14 << 4) | tag);
        out.extend_from_slice(&(len as u16).to_le_bytes());
    } else {
        out.push((15 << 4) | tag);
        out.extend_from_slice(&(len as u32).to_le_bytes());
    }
}

fn write_int(out: &mut Vec<u8>, n: i32) {
    if n == 0 {
        out.push(TAG_ZERO);
    } else if (1..=0xFF).contains(&n) {
        out.push(TAG_BYTE_INT);
        out.push(n as u8);
    } else if (0x100..=0xFFFF).contains(&n) {
        out.push(TAG_SHORT_INT);
        out.extend_from_slice(&(n as u16).to_le_bytes());
    } else {
        out.push(TAG_INT);
        out.extend_from_slice(&n.to_le_bytes());
    }
}

fn write_float(out: &mut Vec<u8>, f: f32) {
    if f == 0.0 {
        // both zero signs collapse so equal values share one encoding
        out.push(TAG_FLOAT_ZERO);
    } else {
        let bits = if f.is_nan() { CANONICAL_NAN } else { f.to_bits() };
        out.push(TAG_FLOAT);
        out.extend_from_slice(&bits.to_le_bytes());
    }
}

/// Width class of a slice of integer elements: 1, 2 or 4 bytes, or `None`
/// when some element is not an integer.
fn int_width(heap: &Heap, values_src: Value, len: usize) -> Result<Option<u8>> {
    let mut width = 1u8;
    for i in 0..len {
        match heap.get_elem(values_src, i)? {
            Value::Int(n) => {
                if !(0..=0xFF).contains(&n) {
                    if (0..=0xFFFF).contains(&n) {
                        width = width.max(2);
                    } else {
                        width = 4;
                    }
                }
            }
            _ => return Ok(None),
        }
    }
    Ok(Some(width))
}

fn write_atom(heap: &mut Heap, value: Value, out: &mut Vec<u8>, depth: u32) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(RuntimeError::RecursionLimit);
    }
    match value {
        Value::Int(n) => write_int(out, n),
        Value::Float(f) => write_float(out, f),
        Value::Array(_) => {
            let len = heap.array_len(value)?;
            let is_string = heap.is_string(value)?;
            let width = int_width(heap, value, len)?;
            match (is_string, width) {
                (true, Some(w)) => {
                    let tag = match w {
                        1 => TAG_BYTE_STRING,
                        2 => TAG_SHORT_STRING,
                        _ => TAG_INT_STRING,
                    };
                    put_tagged_len(out, tag, len);
                    write_packed(heap, value, len, w, out)?;
                }
                (true, None) => {
                    return Err(RuntimeError::BadFormat("string element is not a character"));
                }
                (false, Some(w)) => {
                    let tag = match w {
                        1 => TAG_BYTE_ARRAY,
                        2 => TAG_SHORT_ARRAY,
                        _ => TAG_INT_ARRAY,
                    };
                    put_tagged_len(out, tag, len);
                    write_packed(heap, value, len, w, out)?;
                }
                (false, None) => {
                    put_tagged_len(out, TAG_ARRAY, len);
                    for i in 0..len {
                        let elem = heap.get_elem(value, i)?;
                        write_atom(heap, elem, out, depth + 1)?;
                    }
                }
            }
        }
        Value::Hash(_) => {
            let len = heap.hash_len(value)?;
            let mut entries: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(len);
            for i in 0..len {
                let (k, v) = heap.hash_entry(value, i)?;
                let mut kb = Vec::new();
                write_atom(heap, k, &mut kb, depth + 1)?;
                let mut vb = Vec::new();
                write_atom(heap, v, &mut vb, depth + 1)?;
                entries.push((kb, vb));
            }
            // canonical form sorts entries by key so equal hashes encode
            // identically regardless of insertion order
            let mut failed = None;
            entries.sort_by(|a, b| match super::compare(&a.0, &b.0) {
                Ok(ord) => ord,
                Err(_) => {
                    failed = Some(());
                    std::cmp::Ordering::Equal
                }
            });
            if failed.is_some() {
                return Err(RuntimeError::BadFormat("unorderable hash key"));
            }
            put_tagged_len(out, TAG_HASH, len);
            for (kb, vb) in entries {
                out.extend_from_slice(&kb);
                out.extend_from_slice(&vb);
            }
        }
        Value::Handle(_) => return Err(RuntimeError::UnserializableRef),
    }
    Ok(())
}

fn write_packed(heap: &Heap, value: Value, len: usize, width: u8, out: &mut Vec<u8>) -> Result<()> {
    for i in 0..len {
        let Value::Int(n) = heap.get_elem(value, i)? else {
            return Err(RuntimeError::BadFormat("packed element is not an integer"));
        };
        match width {
            1 => out.push(n as u8),
            2 => out.extend_from_slice(&(n as u16).to_le_bytes()),
            _ => out.extend_from_slice(&n.to_le_bytes()),
        }
    }
    Ok(())
}

// ----- deserialization ------------------------------------------------------

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn byte(&mut self) -> Result<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or(RuntimeError::BadFormat("truncated atom"))?;
        self.pos += 1;
        Ok(b)
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
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

/// Reconstructs a value from its serialized form.
pub fn deserialize(heap: &mut Heap, bytes: &[u8]) -> Result<Value> {
    let mut r = Reader { buf: bytes, pos: 0 };
    let value = read_atom(heap, &mut r, 0)?;
    if r.pos != bytes.len() {
        return Err(RuntimeError::BadFormat("trailing bytes after atom"));
    }
    Ok(value)
}

fn read_atom(heap: &mut Heap, r: &mut Reader<'_>, depth: u32) -> Result<Value> {
    if depth > MAX_DEPTH {
        return Err(RuntimeError::RecursionLimit);
    }
    let head = r.byte()?;
    let tag = head & 0x0F;
    let class = head >> 4;
    match tag {
        TAG_ZERO => Ok(Value::Int(0)),
        TAG_BYTE_INT => Ok(Value::Int(i32::from(r.byte()?))),
        TAG_SHORT_INT => {
            let b = r.bytes(2)?;
            Ok(Value::Int(i32::from(u16::from_le_bytes([b[0], b[1]]))))
        }
        TAG_INT => {
            let b = r.bytes(4)?;
            Ok(Value::Int(i32::from_le_bytes([b[0], b[1], b[2], b[3]])))
        }
        TAG_FLOAT => {
            let b = r.bytes(4)?;
            Ok(Value::Float(f32::from_bits(u32::from_le_bytes([
                b[0], b[1], b[2], b[3],
            ]))))
        }
        TAG_FLOAT_ZERO => Ok(Value::Float(0.0)),
        TAG_ARRAY => {
            let len = r.length(class)?;
            let arr = heap.create_array(0);
            for _ in 0..len {
                let elem = read_atom(heap, r, depth + 1)?;
                heap.append_elem(arr, elem)?;
            }
            Ok(arr)
        }
        TAG_BYTE_ARRAY | TAG_SHORT_ARRAY | TAG_INT_ARRAY => {
            let len = r.length(class)?;
            let arr = heap.create_array(0);
            read_packed(heap, r, arr, len, tag - TAG_BYTE_ARRAY)?;
            Ok(arr)
        }
        TAG_BYTE_STRING | TAG_SHORT_STRING | TAG_INT_STRING => {
            let len = r.length(class)?;
            let s = heap.create_string("");
            read_packed(heap, r, s, len, tag - TAG_BYTE_STRING)?;
            Ok(s)
        }
        TAG_HASH => {
            let len = r.length(class)?;
            let h = heap.create_hash();
            for _ in 0..len {
                let k = read_atom(heap, r, depth + 1)?;
                let v = read_atom(heap, r, depth + 1)?;
                heap.hash_set(h, k, v)?;
            }
            Ok(h)
        }
        _ => Err(RuntimeError::BadFormat("unknown atom tag")),
    }
}

fn read_packed(
    heap: &mut Heap,
    r: &mut Reader<'_>,
    target: Value,
    len: usize,
    width_class: u8,
) -> Result<()> {
    for _ in 0..len {
        let n = match width_class {
            0 => i32::from(r.byte()?),
            1 => {
                let b = r.bytes(2)?;
                i32::from(u16::from_le_bytes([b[0], b[1]]))
            }
            _ => {
                let b = r.bytes(4)?;
                i32::from_le_bytes([b[0], b[1], b[2], b[3]])
            }
        };
        heap.append_elem(target, Value::Int(n))?;
    }
    Ok(())
}
