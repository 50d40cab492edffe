//! Database builder
//!
//! Writes a complete database: search tree, 16-byte separator,
//! deduplicated data section, metadata marker, and metadata block. The
//! test suite and fixtures are the primary consumers; the output is a
//! valid database any conforming reader can open.

use crate::data::{Encoder, Value};
use crate::error::{GeoIpError, Result};
use crate::metadata::{RecordSize, METADATA_MARKER};
use std::collections::HashMap;
use std::net::IpAddr;

/// Builder for a lookup database
pub struct DatabaseBuilder {
    entries: Vec<(IpAddr, u8, Value)>,
    record_size: RecordSize,
    database_type: String,
}

impl DatabaseBuilder {
    /// Create a builder with 24-bit records
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            record_size: RecordSize::Bits24,
            database_type: "GeoProbe-Test".to_string(),
        }
    }

    /// Set the record size for the search tree
    pub fn with_record_size(mut self, record_size: RecordSize) -> Self {
        self.record_size = record_size;
        self
    }

    /// Set the database type tag written to the metadata
    pub fn with_database_type(mut self, db_type: impl Into<String>) -> Self {
        self.database_type = db_type.into();
        self
    }

    /// Add a network from a literal, either a bare IP or CIDR notation
    pub fn add(&mut self, network: &str, data: Value) -> Result<()> {
        let (addr, prefix_len) = parse_network(network)?;
        self.add_network(addr, prefix_len, data)
    }

    /// Add a network with an explicit prefix length
    pub fn add_network(&mut self, addr: IpAddr, prefix_len: u8, data: Value) -> Result<()> {
        let max_prefix = if addr.is_ipv4() { 32 } else { 128 };
        if prefix_len > max_prefix {
            return Err(GeoIpError::InvalidInput(format!(
                "Prefix length {} exceeds {} for {}",
                prefix_len, max_prefix, addr
            )));
        }
        self.entries.push((addr, prefix_len, data));
        Ok(())
    }

    /// Assemble the database
    pub fn build(&self) -> Result<Vec<u8>> {
        let needs_v6 = self.entries.iter().any(|(addr, _, _)| addr.is_ipv6());

        // Data section first; the tree stores offsets into it
        let mut encoder = Encoder::new();
        let mut offsets = Vec::with_capacity(self.entries.len());
        for (_, _, data) in &self.entries {
            offsets.push(encoder.encode(data));
        }
        let data_section = encoder.into_bytes();

        let mut tree = TreeBuilder::new(needs_v6);
        for ((addr, prefix_len, _), offset) in self.entries.iter().zip(&offsets) {
            tree.insert(*addr, *prefix_len, *offset)?;
        }
        let (tree_bytes, node_count) = tree.serialize(self.record_size)?;

        let mut database = tree_bytes;
        database.extend_from_slice(&[0u8; 16]);
        database.extend_from_slice(&data_section);
        database.extend_from_slice(METADATA_MARKER);

        let mut meta_encoder = Encoder::new();
        meta_encoder.encode(&self.metadata_value(node_count, needs_v6));
        database.extend_from_slice(&meta_encoder.into_bytes());

        Ok(database)
    }

    fn metadata_value(&self, node_count: u32, needs_v6: bool) -> Value {
        let build_epoch = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let mut description = HashMap::new();
        description.insert(
            "en".to_string(),
            Value::String("geoprobe synthetic database".to_string()),
        );

        let mut metadata = HashMap::new();
        metadata.insert(
            "binary_format_major_version".to_string(),
            Value::Uint16(2),
        );
        metadata.insert(
            "binary_format_minor_version".to_string(),
            Value::Uint16(0),
        );
        metadata.insert("build_epoch".to_string(), Value::Uint64(build_epoch));
        metadata.insert(
            "database_type".to_string(),
            Value::String(self.database_type.clone()),
        );
        metadata.insert("description".to_string(), Value::Map(description));
        metadata.insert(
            "languages".to_string(),
            Value::Array(vec![Value::String("en".to_string())]),
        );
        metadata.insert(
            "ip_version".to_string(),
            Value::Uint16(if needs_v6 { 6 } else { 4 }),
        );
        metadata.insert("node_count".to_string(), Value::Uint32(node_count));
        metadata.insert(
            "record_size".to_string(),
            Value::Uint16(self.record_size as u16),
        );
        Value::Map(metadata)
    }
}

impl Default for DatabaseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse "a.b.c.d", "a.b.c.d/nn", or the IPv6 equivalents
fn parse_network(network: &str) -> Result<(IpAddr, u8)> {
    if let Some((addr_str, prefix_str)) = network.split_once('/') {
        let addr: IpAddr = addr_str.parse().map_err(|_| {
            GeoIpError::InvalidInput(format!("Unparseable network '{}'", network))
        })?;
        let prefix_len: u8 = prefix_str.parse().map_err(|_| {
            GeoIpError::InvalidInput(format!("Unparseable prefix in '{}'", network))
        })?;
        Ok((addr, prefix_len))
    } else {
        let addr: IpAddr = network.parse().map_err(|_| {
            GeoIpError::InvalidInput(format!("Unparseable IP address '{}'", network))
        })?;
        Ok((addr, if addr.is_ipv4() { 32 } else { 128 }))
    }
}

/// A node edge during building
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    /// No entry below this edge yet
    Empty,
    /// Points to another node
    Node(u32),
    /// Points to a data section offset; the prefix length decides which
    /// of two overlapping networks is more specific
    Data(u32, u8),
}

#[derive(Debug, Clone)]
struct Node {
    left: Edge,
    right: Edge,
}

impl Node {
    fn new() -> Self {
        Self {
            left: Edge::Empty,
            right: Edge::Empty,
        }
    }
}

/// Arena-based search tree builder
struct TreeBuilder {
    nodes: Vec<Node>,
    v6: bool,
}

impl TreeBuilder {
    fn new(v6: bool) -> Self {
        Self {
            nodes: vec![Node::new()],
            v6,
        }
    }

    /// Insert a network, mapping its address bits onto the full 128-bit path
    fn insert(&mut self, addr: IpAddr, prefix_len: u8, data_offset: u32) -> Result<()> {
        let (bits, path_len) = match addr {
            IpAddr::V4(v4) => {
                if self.v6 {
                    // IPv4 space sits below 96 zero bits in an IPv6 tree
                    (u32::from(v4) as u128, 96 + prefix_len)
                } else {
                    ((u32::from(v4) as u128) << 96, prefix_len)
                }
            }
            IpAddr::V6(v6) => {
                if !self.v6 {
                    return Err(GeoIpError::InvalidInput(format!(
                        "Cannot insert IPv6 network {} into an IPv4-only tree",
                        v6
                    )));
                }
                (u128::from(v6), prefix_len)
            }
        };
        self.insert_bits(bits, path_len, data_offset);
        Ok(())
    }

    fn insert_bits(&mut self, bits: u128, path_len: u8, data_offset: u32) {
        if path_len == 0 {
            // A default route covers everything not claimed by a longer prefix
            self.backfill(0, data_offset, 0);
            return;
        }

        let mut node_id = 0u32;

        for depth in 0..path_len {
            let bit = ((bits >> (127 - depth)) & 1) as u8;
            let edge = self.edge(node_id, bit);

            if depth + 1 == path_len {
                match edge {
                    Edge::Empty => {
                        self.set_edge(node_id, bit, Edge::Data(data_offset, path_len));
                    }
                    Edge::Data(_, existing_len) => {
                        // Equal or more specific replaces; otherwise keep
                        if path_len >= existing_len {
                            self.set_edge(node_id, bit, Edge::Data(data_offset, path_len));
                        }
                    }
                    Edge::Node(child) => {
                        // More specific networks already exist deeper; fill
                        // the gaps they left without overwriting them
                        self.backfill(child, data_offset, path_len);
                    }
                }
                return;
            }

            match edge {
                Edge::Empty => {
                    let new_id = self.allocate();
                    self.set_edge(node_id, bit, Edge::Node(new_id));
                    node_id = new_id;
                }
                Edge::Node(child) => {
                    node_id = child;
                }
                Edge::Data(existing_offset, existing_len) => {
                    // A broader network covers this path; push its data one
                    // level down so the more specific insert can continue
                    let new_id = self.allocate();
                    self.nodes[new_id as usize].left = Edge::Data(existing_offset, existing_len);
                    self.nodes[new_id as usize].right = Edge::Data(existing_offset, existing_len);
                    self.set_edge(node_id, bit, Edge::Node(new_id));
                    node_id = new_id;
                }
            }
        }
    }

    /// Fill empty and less specific edges of a subtree with a broader
    /// network's data, preserving more specific entries
    fn backfill(&mut self, node_id: u32, data_offset: u32, path_len: u8) {
        for bit in 0..2u8 {
            match self.edge(node_id, bit) {
                Edge::Empty => {
                    self.set_edge(node_id, bit, Edge::Data(data_offset, path_len));
                }
                Edge::Data(_, existing_len) => {
                    if path_len > existing_len {
                        self.set_edge(node_id, bit, Edge::Data(data_offset, path_len));
                    }
                }
                Edge::Node(child) => {
                    self.backfill(child, data_offset, path_len);
                }
            }
        }
    }

    fn edge(&self, node_id: u32, bit: u8) -> Edge {
        let node = &self.nodes[node_id as usize];
        if bit == 0 {
            node.left
        } else {
            node.right
        }
    }

    fn set_edge(&mut self, node_id: u32, bit: u8, edge: Edge) {
        let node = &mut self.nodes[node_id as usize];
        if bit == 0 {
            node.left = edge;
        } else {
            node.right = edge;
        }
    }

    fn allocate(&mut self) -> u32 {
        let id = self.nodes.len() as u32;
        self.nodes.push(Node::new());
        id
    }

    /// Serialize the arena into the on-disk tree region
    fn serialize(&self, record_size: RecordSize) -> Result<(Vec<u8>, u32)> {
        let node_count = self.nodes.len() as u32;
        let mut tree = vec![0u8; node_count as usize * record_size.node_bytes()];

        for (node_id, node) in self.nodes.iter().enumerate() {
            let left = self.record_value(node.left, node_count, record_size)?;
            let right = self.record_value(node.right, node_count, record_size)?;
            write_node(&mut tree, node_id, left, right, record_size);
        }

        Ok((tree, node_count))
    }

    /// Convert an edge into its on-disk record value
    fn record_value(&self, edge: Edge, node_count: u32, record_size: RecordSize) -> Result<u32> {
        let value = match edge {
            Edge::Empty => node_count,
            Edge::Node(id) => id,
            Edge::Data(offset, _) => node_count
                .checked_add(16)
                .and_then(|base| base.checked_add(offset))
                .ok_or_else(|| {
                    GeoIpError::Format(format!(
                        "Data pointer overflow: node_count {} + offset {}",
                        node_count, offset
                    ))
                })?,
        };

        let max = match record_size {
            RecordSize::Bits24 => 0x00FF_FFFF,
            RecordSize::Bits28 => 0x0FFF_FFFF,
            RecordSize::Bits32 => u32::MAX,
        };
        if value > max {
            return Err(GeoIpError::Format(format!(
                "Record value {} does not fit in {}-bit records",
                value, record_size as u16
            )));
        }
        Ok(value)
    }
}

fn write_node(tree: &mut [u8], node_id: usize, left: u32, right: u32, record_size: RecordSize) {
    match record_size {
        RecordSize::Bits24 => {
            let offset = node_id * 6;
            tree[offset..offset + 3].copy_from_slice(&left.to_be_bytes()[1..]);
            tree[offset + 3..offset + 6].copy_from_slice(&right.to_be_bytes()[1..]);
        }
        RecordSize::Bits28 => {
            let offset = node_id * 7;
            tree[offset..offset + 3].copy_from_slice(&left.to_be_bytes()[1..]);
            tree[offset + 3] = ((((left >> 24) & 0x0F) as u8) << 4) | (((right >> 24) & 0x0F) as u8);
            tree[offset + 4..offset + 7].copy_from_slice(&right.to_be_bytes()[1..]);
        }
        RecordSize::Bits32 => {
            let offset = node_id * 8;
            tree[offset..offset + 4].copy_from_slice(&left.to_be_bytes());
            tree[offset + 4..offset + 8].copy_from_slice(&right.to_be_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged(tag: &str) -> Value {
        let mut map = HashMap::new();
        map.insert("tag".to_string(), Value::String(tag.to_string()));
        Value::Map(map)
    }

    #[test]
    fn test_parse_network_forms() {
        assert_eq!(
            parse_network("8.8.8.8").unwrap(),
            ("8.8.8.8".parse().unwrap(), 32)
        );
        assert_eq!(
            parse_network("192.168.0.0/16").unwrap(),
            ("192.168.0.0".parse().unwrap(), 16)
        );
        assert_eq!(
            parse_network("2001:db8::/32").unwrap(),
            ("2001:db8::".parse().unwrap(), 32)
        );
        assert!(parse_network("garbage").is_err());
        assert!(parse_network("8.8.8.8/abc").is_err());
    }

    #[test]
    fn test_empty_build_is_valid() {
        let db = DatabaseBuilder::new().build().unwrap();
        // Single root node, separator, marker, metadata
        assert!(db.len() > 6 + 16 + METADATA_MARKER.len());
    }

    #[test]
    fn test_prefix_length_validation() {
        let mut builder = DatabaseBuilder::new();
        let result = builder.add("8.8.8.8/33", tagged("x"));
        assert!(matches!(result, Err(GeoIpError::InvalidInput(_))));
    }

    #[test]
    fn test_ipv6_forces_v6_tree() {
        let mut builder = DatabaseBuilder::new();
        builder.add("2001:db8::/32", tagged("v6")).unwrap();
        builder.add("8.8.8.0/24", tagged("v4")).unwrap();
        let db = builder.build().unwrap();

        let meta = crate::metadata::Metadata::from_buffer(&db).unwrap();
        assert_eq!(meta.ip_version, crate::metadata::IpVersion::V6);
    }

    #[test]
    fn test_serialize_all_record_sizes() {
        for record_size in [RecordSize::Bits24, RecordSize::Bits28, RecordSize::Bits32] {
            let mut builder = DatabaseBuilder::new().with_record_size(record_size);
            builder.add("10.0.0.0/8", tagged("ten")).unwrap();
            let db = builder.build().unwrap();

            let meta = crate::metadata::Metadata::from_buffer(&db).unwrap();
            assert_eq!(meta.record_size, record_size);
        }
    }

    #[test]
    fn test_covering_network_split() {
        // /24 first, then /32 inside it: the data leaf must split
        let mut tree = TreeBuilder::new(false);
        tree.insert("192.0.2.0".parse().unwrap(), 24, 10).unwrap();
        tree.insert("192.0.2.1".parse().unwrap(), 32, 20).unwrap();
        assert!(tree.nodes.len() > 24);
    }
}
