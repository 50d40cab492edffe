//! Data section encoding and decoding
//!
//! Implements the MaxMind DB data type specification: a self-describing,
//! recursive binary encoding where each value starts with a control byte
//! holding a 3-bit type tag and a 5-bit size marker.
//!
//! # Supported Types
//!
//! - **Pointer**: reference to another data item (resolved during decode)
//! - **String**: UTF-8 text data
//! - **Double**: 64-bit floating point (IEEE 754)
//! - **Bytes**: raw byte arrays
//! - **Uint16/Uint32/Uint64/Uint128**: variable-width big-endian integers
//! - **Int32**: signed 32-bit integers
//! - **Map**: key-value pairs (string keys)
//! - **Array**: ordered lists of values
//! - **Bool**: boolean values
//! - **Float**: 32-bit floating point (IEEE 754)
//!
//! Extended types (tag >= 8) use control byte tag 0 and carry the actual
//! type in the following byte as `type - 7`.
//!
//! See: https://maxmind.github.io/MaxMind-DB/

use crate::error::{GeoIpError, Result};
use std::collections::HashMap;

/// Cap on combined container nesting and pointer-chain length.
///
/// Real databases nest a handful of levels; anything approaching this
/// bound is a crafted or corrupt input. The cap guarantees decode
/// termination even for self-referential pointers.
const MAX_DECODE_DEPTH: usize = 128;

/// A decoded data section value
///
/// Pointers never surface here; the decoder follows them and returns
/// the pointed-to value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// UTF-8 string
    String(String),
    /// IEEE 754 double precision float
    Double(f64),
    /// Raw byte array
    Bytes(Vec<u8>),
    /// Unsigned 16-bit integer
    Uint16(u16),
    /// Unsigned 32-bit integer
    Uint32(u32),
    /// Key-value map (string keys only per the format spec)
    Map(HashMap<String, Value>),
    /// Signed 32-bit integer
    Int32(i32),
    /// Unsigned 64-bit integer
    Uint64(u64),
    /// Unsigned 128-bit integer
    Uint128(u128),
    /// Array of values
    Array(Vec<Value>),
    /// Boolean value
    Bool(bool),
    /// IEEE 754 single precision float
    Float(f32),
}

impl Value {
    /// Get a map entry by key, if this value is a map
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// Get this value as a string slice, if it is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Get this value as an unsigned integer, widening as needed
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Value::Uint16(n) => Some(*n as u64),
            Value::Uint32(n) => Some(*n as u64),
            Value::Uint64(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a double, accepting either float width
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            Value::Float(f) => Some(*f as f64),
            _ => None,
        }
    }
}

/// Data section decoder
///
/// Decodes values from an encoded data section slice. All offsets are
/// relative to the start of the slice; pointer targets outside the slice
/// are rejected.
pub struct Decoder<'a> {
    buffer: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Create a decoder over a data section
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer }
    }

    /// Decode the value at the given offset
    pub fn decode(&self, offset: u32) -> Result<Value> {
        let mut cursor = offset as usize;
        if cursor >= self.buffer.len() {
            return Err(GeoIpError::Corrupt(format!(
                "Decode offset {} exceeds data section size {}",
                cursor,
                self.buffer.len()
            )));
        }
        self.decode_at(&mut cursor, 0)
    }

    fn decode_at(&self, cursor: &mut usize, depth: usize) -> Result<Value> {
        if depth >= MAX_DECODE_DEPTH {
            return Err(GeoIpError::Corrupt(
                "Decode depth cap exceeded (cyclic pointer or pathological nesting)".to_string(),
            ));
        }

        let ctrl = self.read_byte(cursor)?;
        let mut type_tag = (ctrl >> 5) as u16;

        if type_tag == 0 {
            // Extended type: actual type is in the next byte, offset by 7
            let ext = self.read_byte(cursor)?;
            if ext == 0 || ext > 8 {
                return Err(GeoIpError::Corrupt(format!(
                    "Unknown extended type byte {}",
                    ext
                )));
            }
            type_tag = ext as u16 + 7;
        }

        if type_tag == 1 {
            return self.decode_pointer(cursor, ctrl, depth);
        }

        let size = self.decode_size(cursor, ctrl & 0x1F)?;

        match type_tag {
            2 => self.decode_string(cursor, size),
            3 => {
                if size != 8 {
                    return Err(GeoIpError::Corrupt(format!("Double with size {}", size)));
                }
                let bytes = self.read_slice(cursor, 8)?;
                Ok(Value::Double(f64::from_be_bytes(bytes.try_into().unwrap())))
            }
            4 => Ok(Value::Bytes(self.read_slice(cursor, size)?.to_vec())),
            5 => {
                if size > 2 {
                    return Err(GeoIpError::Corrupt(format!("Uint16 with size {}", size)));
                }
                Ok(Value::Uint16(self.read_uint(cursor, size)? as u16))
            }
            6 => {
                if size > 4 {
                    return Err(GeoIpError::Corrupt(format!("Uint32 with size {}", size)));
                }
                Ok(Value::Uint32(self.read_uint(cursor, size)? as u32))
            }
            7 => self.decode_map(cursor, size, depth),
            8 => {
                if size > 4 {
                    return Err(GeoIpError::Corrupt(format!("Int32 with size {}", size)));
                }
                Ok(Value::Int32(self.read_uint(cursor, size)? as u32 as i32))
            }
            9 => {
                if size > 8 {
                    return Err(GeoIpError::Corrupt(format!("Uint64 with size {}", size)));
                }
                Ok(Value::Uint64(self.read_uint(cursor, size)?))
            }
            10 => {
                if size > 16 {
                    return Err(GeoIpError::Corrupt(format!("Uint128 with size {}", size)));
                }
                let bytes = self.read_slice(cursor, size)?;
                let mut n: u128 = 0;
                for &b in bytes {
                    n = (n << 8) | b as u128;
                }
                Ok(Value::Uint128(n))
            }
            11 => self.decode_array(cursor, size, depth),
            14 => {
                // Bool stores its value in the size field, no payload
                if size > 1 {
                    return Err(GeoIpError::Corrupt(format!("Bool with size {}", size)));
                }
                Ok(Value::Bool(size == 1))
            }
            15 => {
                if size != 4 {
                    return Err(GeoIpError::Corrupt(format!("Float with size {}", size)));
                }
                let bytes = self.read_slice(cursor, 4)?;
                Ok(Value::Float(f32::from_be_bytes(bytes.try_into().unwrap())))
            }
            // 12 (cache container) and 13 (end marker) never appear inside
            // a record or the metadata map
            other => Err(GeoIpError::Corrupt(format!(
                "Unsupported type tag {} in data section",
                other
            ))),
        }
    }

    /// Decode a pointer and return the value it refers to
    ///
    /// The two bits above the low three select the payload width; the low
    /// three bits contribute high bits of the target for the narrow widths.
    /// Widths 2 and 3 add the cumulative bases 2048 and 526336.
    fn decode_pointer(&self, cursor: &mut usize, ctrl: u8, depth: usize) -> Result<Value> {
        let size_class = (ctrl >> 3) & 0x3;
        let high = (ctrl & 0x7) as u32;

        let target = match size_class {
            0 => {
                let b = self.read_byte(cursor)? as u32;
                (high << 8) | b
            }
            1 => {
                let bytes = self.read_slice(cursor, 2)?;
                2048 + ((high << 16) | ((bytes[0] as u32) << 8) | bytes[1] as u32)
            }
            2 => {
                let bytes = self.read_slice(cursor, 3)?;
                526336
                    + ((high << 24)
                        | ((bytes[0] as u32) << 16)
                        | ((bytes[1] as u32) << 8)
                        | bytes[2] as u32)
            }
            _ => {
                let bytes = self.read_slice(cursor, 4)?;
                u32::from_be_bytes(bytes.try_into().unwrap())
            }
        };

        if target as usize >= self.buffer.len() {
            return Err(GeoIpError::Corrupt(format!(
                "Pointer target {} exceeds data section size {}",
                target,
                self.buffer.len()
            )));
        }

        let mut target_cursor = target as usize;
        self.decode_at(&mut target_cursor, depth + 1)
    }

    fn decode_string(&self, cursor: &mut usize, len: usize) -> Result<Value> {
        let bytes = self.read_slice(cursor, len)?;
        let s = std::str::from_utf8(bytes)
            .map_err(|_| GeoIpError::Corrupt("Invalid UTF-8 in string".to_string()))?;
        Ok(Value::String(s.to_string()))
    }

    fn decode_map(&self, cursor: &mut usize, count: usize, depth: usize) -> Result<Value> {
        let mut map = HashMap::new();
        for _ in 0..count {
            // Keys may themselves be pointers to shared strings
            let key = match self.decode_at(cursor, depth + 1)? {
                Value::String(s) => s,
                _ => return Err(GeoIpError::Corrupt("Map key is not a string".to_string())),
            };
            let value = self.decode_at(cursor, depth + 1)?;
            map.insert(key, value);
        }
        Ok(Value::Map(map))
    }

    fn decode_array(&self, cursor: &mut usize, count: usize, depth: usize) -> Result<Value> {
        let mut array = Vec::new();
        for _ in 0..count {
            array.push(self.decode_at(cursor, depth + 1)?);
        }
        Ok(Value::Array(array))
    }

    /// Decode the size marker, reading extension bytes for markers 29-31
    fn decode_size(&self, cursor: &mut usize, marker: u8) -> Result<usize> {
        match marker {
            0..=28 => Ok(marker as usize),
            29 => Ok(29 + self.read_byte(cursor)? as usize),
            30 => {
                let bytes = self.read_slice(cursor, 2)?;
                Ok(285 + u16::from_be_bytes(bytes.try_into().unwrap()) as usize)
            }
            _ => {
                let bytes = self.read_slice(cursor, 3)?;
                let n = ((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | bytes[2] as usize;
                Ok(65821 + n)
            }
        }
    }

    fn read_byte(&self, cursor: &mut usize) -> Result<u8> {
        if *cursor >= self.buffer.len() {
            return Err(GeoIpError::Corrupt(
                "Truncated value in data section".to_string(),
            ));
        }
        let b = self.buffer[*cursor];
        *cursor += 1;
        Ok(b)
    }

    fn read_slice(&self, cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
        let end = cursor
            .checked_add(len)
            .ok_or_else(|| GeoIpError::Corrupt("Value length overflow".to_string()))?;
        if end > self.buffer.len() {
            return Err(GeoIpError::Corrupt(
                "Value extends past end of data section".to_string(),
            ));
        }
        let slice = &self.buffer[*cursor..end];
        *cursor = end;
        Ok(slice)
    }

    fn read_uint(&self, cursor: &mut usize, size: usize) -> Result<u64> {
        let bytes = self.read_slice(cursor, size)?;
        let mut n: u64 = 0;
        for &b in bytes {
            n = (n << 8) | b as u64;
        }
        Ok(n)
    }
}

/// Data section encoder
///
/// Builds a data section by encoding values and tracking offsets.
/// Identical values get the same offset, so repeated structures
/// (country maps, shared strings) are stored once.
pub struct Encoder {
    buffer: Vec<u8>,
    dedup_map: HashMap<Vec<u8>, u32>,
}

impl Encoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            dedup_map: HashMap::new(),
        }
    }

    /// Encode a value and return its offset
    ///
    /// If the value was previously encoded, returns the existing offset.
    pub fn encode(&mut self, value: &Value) -> u32 {
        let mut temp = Vec::new();
        Self::write_value(value, &mut temp);

        if let Some(&offset) = self.dedup_map.get(&temp) {
            return offset;
        }

        let offset = self.buffer.len() as u32;
        self.buffer.extend_from_slice(&temp);
        self.dedup_map.insert(temp, offset);
        offset
    }

    /// Get the final encoded data section
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get current buffer size
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    fn write_value(value: &Value, out: &mut Vec<u8>) {
        match value {
            Value::String(s) => {
                Self::write_control(2, s.len(), out);
                out.extend_from_slice(s.as_bytes());
            }
            Value::Double(d) => {
                Self::write_control(3, 8, out);
                out.extend_from_slice(&d.to_be_bytes());
            }
            Value::Bytes(b) => {
                Self::write_control(4, b.len(), out);
                out.extend_from_slice(b);
            }
            Value::Uint16(n) => {
                let raw = n.to_be_bytes();
                let bytes = trim_leading_zeros(&raw);
                Self::write_control(5, bytes.len(), out);
                out.extend_from_slice(bytes);
            }
            Value::Uint32(n) => {
                let raw = n.to_be_bytes();
                let bytes = trim_leading_zeros(&raw);
                Self::write_control(6, bytes.len(), out);
                out.extend_from_slice(bytes);
            }
            Value::Map(m) => {
                Self::write_control(7, m.len(), out);
                // Sorted by key for deterministic output and stable dedup
                let mut pairs: Vec<_> = m.iter().collect();
                pairs.sort_by_key(|(k, _)| *k);
                for (key, val) in pairs {
                    Self::write_value(&Value::String(key.clone()), out);
                    Self::write_value(val, out);
                }
            }
            Value::Int32(n) => {
                Self::write_control(8, 4, out);
                out.extend_from_slice(&n.to_be_bytes());
            }
            Value::Uint64(n) => {
                let raw = n.to_be_bytes();
                let bytes = trim_leading_zeros(&raw);
                Self::write_control(9, bytes.len(), out);
                out.extend_from_slice(bytes);
            }
            Value::Uint128(n) => {
                let raw = n.to_be_bytes();
                let bytes = trim_leading_zeros(&raw);
                Self::write_control(10, bytes.len(), out);
                out.extend_from_slice(bytes);
            }
            Value::Array(a) => {
                Self::write_control(11, a.len(), out);
                for val in a {
                    Self::write_value(val, out);
                }
            }
            Value::Bool(b) => {
                Self::write_control(14, if *b { 1 } else { 0 }, out);
            }
            Value::Float(f) => {
                Self::write_control(15, 4, out);
                out.extend_from_slice(&f.to_be_bytes());
            }
        }
    }

    /// Write the control byte(s) for a type tag and size
    ///
    /// Extended types emit the type byte between the control byte and any
    /// size extension bytes, matching the decode order.
    fn write_control(type_tag: u8, size: usize, out: &mut Vec<u8>) {
        let mut ext = [0u8; 3];
        let (marker, ext): (u8, &[u8]) = if size < 29 {
            (size as u8, &[])
        } else if size < 285 {
            ext[0] = (size - 29) as u8;
            (29, &ext[..1])
        } else if size < 65821 {
            ext[..2].copy_from_slice(&((size - 285) as u16).to_be_bytes());
            (30, &ext[..2])
        } else {
            ext.copy_from_slice(&((size - 65821) as u32).to_be_bytes()[1..]);
            (31, &ext[..3])
        };

        if type_tag < 8 {
            out.push((type_tag << 5) | marker);
        } else {
            out.push(marker);
            out.push(type_tag - 7);
        }
        out.extend_from_slice(ext);
    }
}

/// Strip leading zero bytes for variable-width integer encoding
fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}
