//! Search tree traversal
//!
//! The search tree is a compact binary trie walked one address bit at a
//! time from the most significant bit. Each node holds two records (left
//! for bit 0, right for bit 1) whose value is either another node index,
//! the node count (the "not found" sentinel), or a data section pointer.

use crate::error::{GeoIpError, Result};
use crate::metadata::{IpVersion, Metadata, RecordSize};
use std::net::IpAddr;

/// Outcome of a successful tree walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupResult {
    /// Offset into the data section
    pub data_offset: u32,
    /// Length of the matched network prefix
    pub prefix_len: u8,
}

/// Search tree over the tree region of a database buffer
pub struct SearchTree<'a> {
    tree: &'a [u8],
    node_count: u32,
    record_size: RecordSize,
    ip_version: IpVersion,
    data_section_len: usize,
}

impl<'a> SearchTree<'a> {
    /// Create a search tree view
    ///
    /// `tree` must be exactly the tree region (the first `tree_size` bytes
    /// of the file); `data_section_len` bounds the data offsets a terminal
    /// record may produce.
    pub fn new(tree: &'a [u8], metadata: &Metadata, data_section_len: usize) -> Self {
        Self {
            tree,
            node_count: metadata.node_count,
            record_size: metadata.record_size,
            ip_version: metadata.ip_version,
            data_section_len,
        }
    }

    /// Walk the tree for an IP address
    ///
    /// Returns `Ok(None)` when the address has no entry. Longest-prefix
    /// semantics follow from the walk itself: more specific entries sit
    /// deeper in the trie and terminate the walk later.
    pub fn lookup(&self, ip: IpAddr) -> Result<Option<LookupResult>> {
        // An IPv4 query against an IPv6 tree walks the 96 zero bits of the
        // embedded IPv4 space first; those bits are part of the path but
        // not of the reported IPv4 prefix.
        let (bits, bit_count, v4_embedded) = match (ip, self.ip_version) {
            (IpAddr::V4(v4), IpVersion::V4) => {
                ((u32::from(v4) as u128) << 96, 32u32, false)
            }
            (IpAddr::V4(v4), IpVersion::V6) => (u32::from(v4) as u128, 128, true),
            (IpAddr::V6(v6), IpVersion::V6) => (u128::from(v6), 128, false),
            (IpAddr::V6(v6), IpVersion::V4) => {
                return Err(GeoIpError::AddressFamily(format!(
                    "Cannot look up IPv6 address {} in an IPv4-only database",
                    v6
                )));
            }
        };

        let mut node = 0u32;
        for depth in 0..bit_count {
            let bit = ((bits >> (127 - depth)) & 1) as u8;
            let record = self.read_record(node, bit)?;

            if record == self.node_count {
                return Ok(None);
            } else if record < self.node_count {
                node = record;
            } else {
                let data_offset = self.data_offset(record)?;
                let matched = depth + 1;
                let prefix_len = if v4_embedded {
                    matched.saturating_sub(96)
                } else {
                    matched
                };
                return Ok(Some(LookupResult {
                    data_offset,
                    prefix_len: prefix_len as u8,
                }));
            }
        }

        Ok(None)
    }

    /// Read one record from a node
    ///
    /// `side` 0 reads the left record, 1 the right.
    fn read_record(&self, node: u32, side: u8) -> Result<u32> {
        if node >= self.node_count {
            return Err(GeoIpError::Corrupt(format!(
                "Node index {} exceeds node count {}",
                node, self.node_count
            )));
        }

        let node = node as usize;
        let side = side as usize;
        match self.record_size {
            RecordSize::Bits24 => {
                let offset = node * 6 + side * 3;
                let bytes = self.tree_slice(offset, 3)?;
                Ok(((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32)
            }
            RecordSize::Bits28 => {
                // Layout: [left 24 bits][middle byte][right 24 bits], middle
                // byte carries the high nibbles of both records
                let offset = node * 7;
                let bytes = self.tree_slice(offset, 7)?;
                let (high, low) = if side == 0 {
                    (((bytes[3] >> 4) & 0x0F) as u32, &bytes[0..3])
                } else {
                    ((bytes[3] & 0x0F) as u32, &bytes[4..7])
                };
                Ok((high << 24)
                    | ((low[0] as u32) << 16)
                    | ((low[1] as u32) << 8)
                    | low[2] as u32)
            }
            RecordSize::Bits32 => {
                let offset = node * 8 + side * 4;
                let bytes = self.tree_slice(offset, 4)?;
                Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
            }
        }
    }

    /// Translate a terminal record into a data section offset
    ///
    /// Terminal records encode `node_count + 16 + offset`; the 16 accounts
    /// for the separator between the tree and the data section.
    fn data_offset(&self, record: u32) -> Result<u32> {
        let offset = record
            .checked_sub(self.node_count)
            .and_then(|n| n.checked_sub(16))
            .ok_or_else(|| {
                GeoIpError::Corrupt(format!(
                    "Record {} is inside the data separator (node_count = {})",
                    record, self.node_count
                ))
            })?;

        if offset as usize >= self.data_section_len {
            return Err(GeoIpError::Corrupt(format!(
                "Data offset {} exceeds data section size {}",
                offset, self.data_section_len
            )));
        }
        Ok(offset)
    }

    fn tree_slice(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= self.tree.len())
            .ok_or_else(|| {
                GeoIpError::Corrupt(format!(
                    "Record at offset {} exceeds tree region size {}",
                    offset,
                    self.tree.len()
                ))
            })?;
        Ok(&self.tree[offset..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn test_metadata(node_count: u32, record_size: RecordSize, ip_version: IpVersion) -> Metadata {
        Metadata {
            node_count,
            record_size,
            ip_version,
            major_version: 2,
            minor_version: 0,
            database_type: None,
            languages: Vec::new(),
            build_epoch: None,
            tree_size: node_count as usize * record_size.node_bytes(),
            marker_offset: 0,
        }
    }

    fn write_24bit_node(tree: &mut [u8], node: usize, left: u32, right: u32) {
        let offset = node * 6;
        tree[offset..offset + 3].copy_from_slice(&left.to_be_bytes()[1..]);
        tree[offset + 3..offset + 6].copy_from_slice(&right.to_be_bytes()[1..]);
    }

    #[test]
    fn test_read_24bit_record() {
        let mut tree = vec![0u8; 12];
        write_24bit_node(&mut tree, 0, 1, 2);
        let meta = test_metadata(2, RecordSize::Bits24, IpVersion::V4);
        let search = SearchTree::new(&tree, &meta, 100);

        assert_eq!(search.read_record(0, 0).unwrap(), 1);
        assert_eq!(search.read_record(0, 1).unwrap(), 2);
    }

    #[test]
    fn test_read_28bit_record() {
        let mut tree = vec![0u8; 7];
        // Left: 0x1000001, Right: 0x2000002
        tree[0..3].copy_from_slice(&[0x00, 0x00, 0x01]);
        tree[3] = 0x12;
        tree[4..7].copy_from_slice(&[0x00, 0x00, 0x02]);
        let meta = test_metadata(1, RecordSize::Bits28, IpVersion::V4);
        let search = SearchTree::new(&tree, &meta, 100);

        assert_eq!(search.read_record(0, 0).unwrap(), 0x1000001);
        assert_eq!(search.read_record(0, 1).unwrap(), 0x2000002);
    }

    #[test]
    fn test_node_index_out_of_bounds() {
        let tree = vec![0u8; 6];
        let meta = test_metadata(1, RecordSize::Bits24, IpVersion::V4);
        let search = SearchTree::new(&tree, &meta, 100);
        assert!(matches!(
            search.read_record(5, 0),
            Err(GeoIpError::Corrupt(_))
        ));
    }

    #[test]
    fn test_lookup_miss_on_sentinel() {
        // Root with both records equal to node_count
        let mut tree = vec![0u8; 6];
        write_24bit_node(&mut tree, 0, 1, 1);
        let meta = test_metadata(1, RecordSize::Bits24, IpVersion::V4);
        let search = SearchTree::new(&tree, &meta, 100);

        let result = search
            .lookup(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)))
            .unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn test_lookup_hit_with_prefix_len() {
        // Root: bit 0 -> data, bit 1 -> miss. 8.x starts with bit 0.
        // node_count=1, record 17 -> data offset 0, prefix /1
        let mut tree = vec![0u8; 6];
        write_24bit_node(&mut tree, 0, 17, 1);
        let meta = test_metadata(1, RecordSize::Bits24, IpVersion::V4);
        let search = SearchTree::new(&tree, &meta, 100);

        let result = search
            .lookup(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)))
            .unwrap()
            .unwrap();
        assert_eq!(result.data_offset, 0);
        assert_eq!(result.prefix_len, 1);
    }

    #[test]
    fn test_ipv6_query_on_v4_tree_fails() {
        let tree = vec![0u8; 6];
        let meta = test_metadata(1, RecordSize::Bits24, IpVersion::V4);
        let search = SearchTree::new(&tree, &meta, 100);

        let result = search.lookup("2001:4860:4860::8888".parse().unwrap());
        assert!(matches!(result, Err(GeoIpError::AddressFamily(_))));
    }

    #[test]
    fn test_data_offset_in_separator_is_corrupt() {
        // Record node_count+5 lands inside the 16-byte separator
        let mut tree = vec![0u8; 6];
        write_24bit_node(&mut tree, 0, 6, 6);
        let meta = test_metadata(1, RecordSize::Bits24, IpVersion::V4);
        let search = SearchTree::new(&tree, &meta, 100);

        let result = search.lookup(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)));
        assert!(matches!(result, Err(GeoIpError::Corrupt(_))));
    }

    #[test]
    fn test_data_offset_beyond_section_is_corrupt() {
        // Data offset 50 against a 10-byte data section
        let mut tree = vec![0u8; 6];
        write_24bit_node(&mut tree, 0, 1 + 16 + 50, 1 + 16 + 50);
        let meta = test_metadata(1, RecordSize::Bits24, IpVersion::V4);
        let search = SearchTree::new(&tree, &meta, 10);

        let result = search.lookup(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)));
        assert!(matches!(result, Err(GeoIpError::Corrupt(_))));
    }
}
