//! Database reader
//!
//! The reader opens a database file once and serves any number of lookups
//! against the immutable buffer. The file is memory-mapped when opened by
//! path; byte buffers are accepted directly for tests and embedded use.
//!
//! # Thread Safety
//!
//! The buffer is never mutated after open, so a `Reader` can be shared
//! across threads and queried concurrently without locking.

use crate::data::{Decoder, Value};
use crate::error::{GeoIpError, Result};
use crate::metadata::Metadata;
use crate::record::LocationRecord;
use crate::tree::{LookupResult, SearchTree};
use memmap2::Mmap;
use std::fs::File;
use std::net::IpAddr;
use std::path::Path;

/// Storage for the database bytes - either owned or memory-mapped
enum Storage {
    Owned(Vec<u8>),
    Mmap(Mmap),
}

impl Storage {
    fn as_slice(&self) -> &[u8] {
        match self {
            Storage::Owned(v) => v.as_slice(),
            Storage::Mmap(m) => &m[..],
        }
    }
}

/// An open database
///
/// # Examples
///
/// ```no_run
/// use geoprobe::Reader;
///
/// let reader = Reader::open("GeoLite2-City.mmdb")?;
/// let record = reader.location_str("8.8.8.8")?;
/// println!("{:?} {:?}", record.country_iso, record.city_name);
/// # Ok::<(), geoprobe::GeoIpError>(())
/// ```
pub struct Reader {
    storage: Storage,
    metadata: Metadata,
}

impl Reader {
    /// Open and memory-map a database file
    ///
    /// Validates the metadata block before returning; an unsupported
    /// format version or inconsistent tree layout fails here, before any
    /// lookup is attempted.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(|e| {
            GeoIpError::Io(format!("Failed to open {}: {}", path.as_ref().display(), e))
        })?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| {
            GeoIpError::Io(format!("Failed to map {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_storage(Storage::Mmap(mmap))
    }

    /// Create a reader over an in-memory database buffer
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_storage(Storage::Owned(bytes))
    }

    fn from_storage(storage: Storage) -> Result<Self> {
        let metadata = Metadata::from_buffer(storage.as_slice())?;
        Ok(Self { storage, metadata })
    }

    /// The decoded database metadata
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Walk the search tree for an address without decoding the record
    ///
    /// `Ok(None)` means the address has no entry.
    pub fn lookup_offset(&self, ip: IpAddr) -> Result<Option<LookupResult>> {
        let data = self.storage.as_slice();
        let tree = SearchTree::new(
            &data[..self.metadata.tree_size],
            &self.metadata,
            self.metadata.data_section_range().len(),
        );
        tree.lookup(ip)
    }

    /// Look up an address and decode the full record value
    pub fn lookup(&self, ip: IpAddr) -> Result<Option<Value>> {
        let hit = match self.lookup_offset(ip)? {
            Some(hit) => hit,
            None => return Ok(None),
        };
        Ok(Some(self.decode_record(hit.data_offset)?))
    }

    /// Look up an address and project the diagnostic location fields
    ///
    /// A miss is reported as `Err(GeoIpError::NotFound)` so a driver can
    /// distinguish "no data" from the field-level absence markers inside
    /// a record.
    pub fn location(&self, ip: IpAddr) -> Result<LocationRecord> {
        match self.lookup(ip)? {
            Some(value) => Ok(LocationRecord::from_value(&value)),
            None => Err(GeoIpError::NotFound),
        }
    }

    /// Parse an IP literal and look up its location record
    pub fn location_str(&self, ip: &str) -> Result<LocationRecord> {
        let addr: IpAddr = ip
            .parse()
            .map_err(|_| GeoIpError::InvalidInput(format!("Unparseable IP address '{}'", ip)))?;
        self.location(addr)
    }

    /// Decode the record at a data section offset
    fn decode_record(&self, offset: u32) -> Result<Value> {
        let data = self.storage.as_slice();
        let section = &data[self.metadata.data_section_range()];
        Decoder::new(section).decode(offset)
    }
}
