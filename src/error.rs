//! Error types for MMDB reading and decoding.

use std::fmt;
use std::net::IpAddr;

/// Main error type for database opening, lookups, and data decoding.
///
/// The Display strings of the caller-error variants are stable; callers
/// (and downstream bindings) match on them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MmdbError {
    /// The buffer does not carry the MMDB metadata marker.
    InvalidFile,

    /// The metadata map is missing, malformed, or fails validation.
    InvalidMetadata,

    /// Corruption detected in the search tree or data section. The message
    /// is the complete, user-facing description.
    InvalidDatabase(String),

    /// An IPv6 address was looked up in an IPv4-only database.
    IpVersionMismatch(IpAddr),

    /// A query was issued after `close`. Carries the operation name.
    ClosedDatabase(&'static str),

    /// The encoded value cannot be materialized into the destination type.
    Decoding(String),

    /// I/O failure while opening or mapping the database file.
    Io(String),
}

impl MmdbError {
    /// Shorthand for the corruption family.
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        MmdbError::InvalidDatabase(msg.into())
    }
}

impl fmt::Display for MmdbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MmdbError::InvalidFile => {
                write!(f, "error opening database: invalid MaxMind DB file")
            }
            MmdbError::InvalidMetadata => {
                write!(f, "the MaxMind DB contains invalid metadata")
            }
            MmdbError::InvalidDatabase(msg) => write!(f, "{}", msg),
            MmdbError::IpVersionMismatch(ip) => write!(
                f,
                "error looking up '{}': you attempted to look up an IPv6 \
                 address in an IPv4-only database",
                ip
            ),
            MmdbError::ClosedDatabase(op) => {
                write!(f, "cannot call {} on a closed database", op)
            }
            MmdbError::Decoding(msg) => write!(f, "{}", msg),
            MmdbError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for MmdbError {}

impl From<std::io::Error> for MmdbError {
    fn from(err: std::io::Error) -> Self {
        MmdbError::Io(err.to_string())
    }
}

impl serde::de::Error for MmdbError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        MmdbError::Decoding(msg.to_string())
    }

    fn invalid_type(unexp: serde::de::Unexpected<'_>, exp: &dyn serde::de::Expected) -> Self {
        MmdbError::Decoding(format!("cannot unmarshal {} into {}", unexp, exp))
    }
}
