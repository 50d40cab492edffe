/// Error types for the geoprobe library
use std::fmt;

/// Result type alias for geoprobe operations
pub type Result<T> = std::result::Result<T, GeoIpError>;

/// Main error type for database and lookup operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeoIpError {
    /// Malformed or unsupported database header/metadata
    Format(String),

    /// Unparseable IP address literal
    InvalidInput(String),

    /// IP version of the query does not match the database
    AddressFamily(String),

    /// Out-of-bounds node or pointer reference, cyclic pointer,
    /// or decode depth cap exceeded
    Corrupt(String),

    /// I/O errors while opening or mapping the database file
    Io(String),

    /// The queried address has no matching entry.
    ///
    /// Only produced by the record-level convenience API; the tree-level
    /// lookup reports a miss as `Ok(None)`. A miss is an expected outcome,
    /// not a failure condition.
    NotFound,
}

impl fmt::Display for GeoIpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeoIpError::Format(msg) => write!(f, "Format error: {}", msg),
            GeoIpError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            GeoIpError::AddressFamily(msg) => write!(f, "Address family mismatch: {}", msg),
            GeoIpError::Corrupt(msg) => write!(f, "Corrupt data: {}", msg),
            GeoIpError::Io(msg) => write!(f, "I/O error: {}", msg),
            GeoIpError::NotFound => write!(f, "No matching entry"),
        }
    }
}

impl std::error::Error for GeoIpError {}

impl From<std::io::Error> for GeoIpError {
    fn from(err: std::io::Error) -> Self {
        GeoIpError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = GeoIpError::Format("bad marker".to_string());
        assert_eq!(err.to_string(), "Format error: bad marker");

        let err = GeoIpError::NotFound;
        assert_eq!(err.to_string(), "No matching entry");
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: GeoIpError = io.into();
        assert!(matches!(err, GeoIpError::Io(_)));
    }
}
