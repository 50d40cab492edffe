//! Database metadata parsing
//!
//! The metadata block is the last section of the file, preceded by a fixed
//! marker sequence. It is encoded in the same generic data format as the
//! location records, so parsing it reuses the data section decoder.

use crate::data::{Decoder, Value};
use crate::error::{GeoIpError, Result};

/// Metadata marker: "\xAB\xCD\xEFMaxMind.com"
pub const METADATA_MARKER: &[u8] = b"\xAB\xCD\xEFMaxMind.com";

/// The marker is searched within this many trailing bytes of the file
const MARKER_WINDOW: usize = 128 * 1024;

/// The binary format major version this reader understands
const SUPPORTED_MAJOR_VERSION: u64 = 2;

/// IP version of the search tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    /// IPv4 only
    V4,
    /// IPv6 (may embed IPv4 under ::ffff:0:0/96)
    V6,
}

/// Record size in bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSize {
    /// 24-bit records (6 bytes per node)
    Bits24 = 24,
    /// 28-bit records (7 bytes per node)
    Bits28 = 28,
    /// 32-bit records (8 bytes per node)
    Bits32 = 32,
}

impl RecordSize {
    /// Size of a node (two records) in bytes
    pub fn node_bytes(self) -> usize {
        match self {
            RecordSize::Bits24 => 6,
            RecordSize::Bits28 => 7,
            RecordSize::Bits32 => 8,
        }
    }

    /// Create from the metadata bit count
    pub fn from_bits(bits: u64) -> Result<Self> {
        match bits {
            24 => Ok(RecordSize::Bits24),
            28 => Ok(RecordSize::Bits28),
            32 => Ok(RecordSize::Bits32),
            _ => Err(GeoIpError::Format(format!(
                "Invalid record size: {} bits",
                bits
            ))),
        }
    }
}

/// Decoded database metadata
///
/// Holds the tree layout parameters needed for lookups plus the
/// descriptive fields a diagnostic surface reports.
#[derive(Debug, Clone)]
pub struct Metadata {
    /// Number of nodes in the search tree
    pub node_count: u32,
    /// Record size in bits
    pub record_size: RecordSize,
    /// IP version of the tree
    pub ip_version: IpVersion,
    /// Binary format major version
    pub major_version: u16,
    /// Binary format minor version
    pub minor_version: u16,
    /// Database type tag, e.g. "GeoLite2-City"
    pub database_type: Option<String>,
    /// Locale codes the record names are available in
    pub languages: Vec<String>,
    /// Build timestamp (seconds since the epoch)
    pub build_epoch: Option<u64>,
    /// Size of the search tree region in bytes
    pub tree_size: usize,
    /// Byte offset where the metadata marker starts
    pub marker_offset: usize,
}

impl Metadata {
    /// Locate and decode the metadata block at the end of a database buffer
    pub fn from_buffer(data: &[u8]) -> Result<Self> {
        let marker_offset = find_metadata_marker(data)?;
        let metadata_bytes = &data[marker_offset + METADATA_MARKER.len()..];

        let value = Decoder::new(metadata_bytes).decode(0).map_err(|e| {
            GeoIpError::Format(format!("Failed to decode metadata block: {}", e))
        })?;

        let map = match &value {
            Value::Map(_) => &value,
            _ => return Err(GeoIpError::Format("Metadata is not a map".to_string())),
        };

        let major_version = require_uint(map, "binary_format_major_version")?;
        if major_version != SUPPORTED_MAJOR_VERSION {
            return Err(GeoIpError::Format(format!(
                "Unsupported binary format major version {}",
                major_version
            )));
        }
        let minor_version = map
            .get("binary_format_minor_version")
            .and_then(Value::as_uint)
            .unwrap_or(0);

        let node_count = require_uint(map, "node_count")?;
        let record_size = RecordSize::from_bits(require_uint(map, "record_size")?)?;
        let ip_version = match require_uint(map, "ip_version")? {
            4 => IpVersion::V4,
            6 => IpVersion::V6,
            other => {
                return Err(GeoIpError::Format(format!("Invalid IP version: {}", other)));
            }
        };

        let database_type = map
            .get("database_type")
            .and_then(Value::as_str)
            .map(str::to_string);
        let languages = match map.get("languages") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };
        let build_epoch = map.get("build_epoch").and_then(Value::as_uint);

        let tree_size = node_count as usize * record_size.node_bytes();

        // The data section sits between the tree and the marker; a file
        // too small for its declared tree cannot be walked safely.
        if tree_size + 16 > marker_offset {
            return Err(GeoIpError::Format(format!(
                "Declared tree size {} does not fit before metadata at {}",
                tree_size, marker_offset
            )));
        }

        Ok(Metadata {
            node_count: node_count as u32,
            record_size,
            ip_version,
            major_version: major_version as u16,
            minor_version: minor_version as u16,
            database_type,
            languages,
            build_epoch,
            tree_size,
            marker_offset,
        })
    }

    /// Byte range of the data section within the file buffer
    pub fn data_section_range(&self) -> std::ops::Range<usize> {
        self.tree_size + 16..self.marker_offset
    }
}

fn require_uint(map: &Value, key: &str) -> Result<u64> {
    match map.get(key) {
        Some(v) => v.as_uint().ok_or_else(|| {
            GeoIpError::Format(format!("Metadata field '{}' is not an unsigned integer", key))
        }),
        None => Err(GeoIpError::Format(format!(
            "Required metadata field '{}' not found",
            key
        ))),
    }
}

/// Find the metadata marker by scanning backward from the end of the buffer
///
/// The metadata section is always last, so the relevant marker is the final
/// occurrence. The scan is bounded to the trailing window; a marker that
/// only appears earlier (inside record data) is ignored.
pub fn find_metadata_marker(data: &[u8]) -> Result<usize> {
    if data.len() < METADATA_MARKER.len() {
        return Err(GeoIpError::Format("Metadata marker not found".to_string()));
    }

    let window_start = data.len().saturating_sub(MARKER_WINDOW);

    let mut pos = data.len() - METADATA_MARKER.len();
    loop {
        if &data[pos..pos + METADATA_MARKER.len()] == METADATA_MARKER {
            return Ok(pos);
        }
        if pos == window_start {
            return Err(GeoIpError::Format("Metadata marker not found".to_string()));
        }
        pos -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Encoder;
    use std::collections::HashMap;

    fn metadata_map(major: u64, node_count: u32, record_size: u64, ip_version: u64) -> Value {
        let mut map = HashMap::new();
        map.insert(
            "binary_format_major_version".to_string(),
            Value::Uint16(major as u16),
        );
        map.insert("binary_format_minor_version".to_string(), Value::Uint16(0));
        map.insert("node_count".to_string(), Value::Uint32(node_count));
        map.insert("record_size".to_string(), Value::Uint16(record_size as u16));
        map.insert("ip_version".to_string(), Value::Uint16(ip_version as u16));
        map.insert(
            "database_type".to_string(),
            Value::String("Test-City".to_string()),
        );
        map.insert(
            "languages".to_string(),
            Value::Array(vec![Value::String("en".to_string())]),
        );
        map.insert("build_epoch".to_string(), Value::Uint64(1700000000));
        Value::Map(map)
    }

    fn build_file(meta: &Value, node_count: u32) -> Vec<u8> {
        // tree region + separator + empty data section + marker + metadata
        let mut file = vec![0u8; node_count as usize * 6 + 16];
        file.extend_from_slice(METADATA_MARKER);
        let mut encoder = Encoder::new();
        encoder.encode(meta);
        file.extend_from_slice(&encoder.into_bytes());
        file
    }

    #[test]
    fn test_parse_metadata() {
        let file = build_file(&metadata_map(2, 4, 24, 4), 4);
        let meta = Metadata::from_buffer(&file).unwrap();
        assert_eq!(meta.node_count, 4);
        assert_eq!(meta.record_size, RecordSize::Bits24);
        assert_eq!(meta.ip_version, IpVersion::V4);
        assert_eq!(meta.major_version, 2);
        assert_eq!(meta.database_type.as_deref(), Some("Test-City"));
        assert_eq!(meta.languages, vec!["en".to_string()]);
        assert_eq!(meta.build_epoch, Some(1700000000));
        assert_eq!(meta.tree_size, 24);
    }

    #[test]
    fn test_unsupported_major_version() {
        let file = build_file(&metadata_map(3, 4, 24, 4), 4);
        let result = Metadata::from_buffer(&file);
        assert!(matches!(result, Err(GeoIpError::Format(_))));
    }

    #[test]
    fn test_missing_required_field() {
        let mut map = HashMap::new();
        map.insert(
            "binary_format_major_version".to_string(),
            Value::Uint16(2),
        );
        // node_count, record_size, ip_version all absent
        let file = build_file(&Value::Map(map), 0);
        let result = Metadata::from_buffer(&file);
        assert!(matches!(result, Err(GeoIpError::Format(_))));
    }

    #[test]
    fn test_invalid_record_size() {
        let file = build_file(&metadata_map(2, 4, 30, 4), 4);
        assert!(matches!(
            Metadata::from_buffer(&file),
            Err(GeoIpError::Format(_))
        ));
    }

    #[test]
    fn test_marker_not_found() {
        let data = b"not a valid mmdb file";
        assert!(matches!(
            find_metadata_marker(data),
            Err(GeoIpError::Format(_))
        ));
    }

    #[test]
    fn test_last_marker_wins() {
        // A stray marker inside the data region must not shadow the real one
        let mut file = vec![0u8; 6 + 16];
        file.extend_from_slice(METADATA_MARKER);
        file.extend_from_slice(&[0u8; 8]);
        let real_offset = file.len();
        file.extend_from_slice(METADATA_MARKER);
        let mut encoder = Encoder::new();
        encoder.encode(&metadata_map(2, 1, 24, 4));
        file.extend_from_slice(&encoder.into_bytes());

        assert_eq!(find_metadata_marker(&file).unwrap(), real_offset);
        assert!(Metadata::from_buffer(&file).is_ok());
    }

    #[test]
    fn test_tree_larger_than_file() {
        // node_count claims a tree bigger than the bytes before the marker
        let file = build_file(&metadata_map(2, 1000, 24, 4), 1);
        assert!(matches!(
            Metadata::from_buffer(&file),
            Err(GeoIpError::Format(_))
        ));
    }
}
