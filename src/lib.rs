//! geoprobe - GeoIP lookup verification core
//!
//! A self-contained reader for MaxMind DB format GeoIP databases, plus a
//! builder for producing synthetic databases in tests and fixtures. Given
//! a database file and an IP address, the library returns a structured
//! location record or a typed error; the `geoprobe` binary wraps that in
//! a small diagnostic driver.
//!
//! # Quick Start
//!
//! ```rust
//! use geoprobe::{DatabaseBuilder, Reader, Value};
//! use std::collections::HashMap;
//!
//! // Build a small database
//! let mut country = HashMap::new();
//! country.insert("iso_code".to_string(), Value::String("US".to_string()));
//! let mut record = HashMap::new();
//! record.insert("country".to_string(), Value::Map(country));
//!
//! let mut builder = DatabaseBuilder::new();
//! builder.add("8.8.8.0/24", Value::Map(record))?;
//! let bytes = builder.build()?;
//!
//! // Query it
//! let reader = Reader::from_bytes(bytes)?;
//! let location = reader.location_str("8.8.8.8")?;
//! assert_eq!(location.country_iso.as_deref(), Some("US"));
//! # Ok::<(), geoprobe::GeoIpError>(())
//! ```
//!
//! # Architecture
//!
//! Three sequential stages, invoked once per query over an immutable
//! buffer that is read or mapped once:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Database File                          │
//! ├─────────────────────────────────────────┤
//! │  1. Search Tree (binary trie)           │
//! │  2. Data Section (deduplicated records) │
//! │  3. Metadata (marker + metadata map)    │
//! └─────────────────────────────────────────┘
//!     open: locate + validate metadata
//!     lookup: walk the trie bit by bit
//!     decode: expand the record at the hit offset
//! ```
//!
//! The buffer is never mutated after open, so a [`Reader`] is safe to
//! share across threads without locking. Every loop is bounded by the
//! buffer size, the node count, or an explicit decode depth cap; corrupt
//! inputs produce [`GeoIpError::Corrupt`], never unbounded work.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Database builder for synthetic databases and fixtures
pub mod builder;
/// Data section encoding/decoding
pub mod data;
/// Error types
pub mod error;
/// Metadata block parsing
pub mod metadata;
/// Database reader
pub mod reader;
/// Location record projection
pub mod record;
/// Search tree traversal
pub mod tree;

pub use crate::builder::DatabaseBuilder;
pub use crate::data::Value;
pub use crate::error::{GeoIpError, Result};
pub use crate::metadata::{IpVersion, Metadata, RecordSize};
pub use crate::reader::Reader;
pub use crate::record::LocationRecord;
pub use crate::tree::LookupResult;

/// Library version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
