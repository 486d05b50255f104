//! Metadata location and parsing.
//!
//! MMDB metadata is a data-section-encoded map at the end of the file,
//! introduced by a 14-byte marker. It is located by scanning backwards
//! for the last occurrence of the marker within the final 128 KiB, then
//! decoded with the same decoder that serves record lookups (metadata may
//! itself contain pointers, which resolve within the metadata section).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::MmdbError;

/// Marker introducing the metadata map: `\xab\xcd\xef` + "MaxMind.com".
pub(crate) const METADATA_START_MARKER: &[u8] = b"\xab\xcd\xefMaxMind.com";

/// The marker must appear within this many trailing bytes.
const METADATA_MAX_SIZE: usize = 128 * 1024;

/// Parsed database metadata.
///
/// Field names mirror the keys of the on-disk metadata map.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Metadata {
    /// Major version of the binary format. Only version 2 is supported.
    pub binary_format_major_version: u16,
    /// Minor version of the binary format.
    pub binary_format_minor_version: u16,
    /// Database build time, seconds since the Unix epoch.
    pub build_epoch: u64,
    /// Database type, e.g. `"GeoIP2-City"`.
    pub database_type: String,
    /// Per-language description strings, keyed by language tag.
    pub description: BTreeMap<String, String>,
    /// IP version the search tree was built for: 4 or 6.
    pub ip_version: u16,
    /// Locale codes for which this database may have localized data.
    pub languages: Vec<String>,
    /// Number of nodes in the search tree.
    pub node_count: u32,
    /// Record size in bits: 24, 28, or 32.
    pub record_size: u16,
}

impl Metadata {
    /// Bytes per node: two records of `record_size` bits each.
    pub(crate) fn node_byte_size(&self) -> usize {
        self.record_size as usize / 4
    }

    /// Total size of the search tree in bytes.
    pub(crate) fn search_tree_size(&self) -> usize {
        self.node_count as usize * self.node_byte_size()
    }

    /// Field-level validation, applied once at open.
    pub(crate) fn validate(&self) -> Result<(), MmdbError> {
        if self.binary_format_major_version != 2 {
            return Err(MmdbError::InvalidMetadata);
        }
        if !matches!(self.record_size, 24 | 28 | 32) {
            return Err(MmdbError::InvalidMetadata);
        }
        if !matches!(self.ip_version, 4 | 6) {
            return Err(MmdbError::InvalidMetadata);
        }
        if self.node_count == 0 {
            return Err(MmdbError::InvalidMetadata);
        }
        Ok(())
    }
}

/// Offset of the first metadata byte (just past the marker).
///
/// Only the final 128 KiB are searched, and the last occurrence wins; the
/// marker bytes may legitimately appear inside the data section.
pub(crate) fn find_metadata_start(buf: &[u8]) -> Result<usize, MmdbError> {
    let window_start = buf.len().saturating_sub(METADATA_MAX_SIZE);
    memchr::memmem::rfind(&buf[window_start..], METADATA_START_MARKER)
        .map(|i| window_start + i + METADATA_START_MARKER.len())
        .ok_or(MmdbError::InvalidFile)
}
