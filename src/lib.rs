//! Geotrie - Read-Only Lookup Engine for MaxMind DB Files
//!
//! Geotrie reads MMDB format databases: compact, immutable, memory-mappable
//! files mapping IP address prefixes (IPv4 and IPv6) to richly structured
//! records. It answers two primitive queries: find the longest matching
//! prefix for an address, and materialize the record at an offset into a
//! caller-provided typed destination.
//!
//! # Quick Start
//!
//! ```no_run
//! use geotrie::Reader;
//! use serde::Deserialize;
//! use std::collections::BTreeMap;
//! use std::net::IpAddr;
//!
//! #[derive(Deserialize, Default)]
//! struct Country {
//!     #[serde(default)]
//!     country: BTreeMap<String, String>,
//! }
//!
//! let reader = Reader::open("GeoLite2-Country.mmdb")?;
//!
//! let ip: IpAddr = "89.160.20.128".parse().unwrap();
//! let mut record = Country::default();
//! reader.lookup(ip, &mut record)?;
//! # Ok::<(), geotrie::MmdbError>(())
//! ```
//!
//! Records decode into any [`serde::Deserialize`] destination: derived
//! structs (field names match map keys; unknown keys are skipped), maps,
//! sequences, primitives, or the schemaless [`DataValue`]. An [`Offset`]
//! field captures a record's position instead of decoding it, for deferred
//! decoding via [`Reader::decode`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  MMDB File Layout                           │
//! ├─────────────────────────────────────────────┤
//! │  1. Search Tree (bit-indexed binary trie)   │
//! │  2. 16-byte separator                       │
//! │  3. Data Section (tagged values, pointers)  │
//! │  4. Metadata marker + metadata map          │
//! └─────────────────────────────────────────────┘
//!          ↓ mmap() or owned bytes
//!   tree walker ──► record offset ──► decoder ──► your type
//! ```
//!
//! The reader is a read-only object over an immutable buffer: queries are
//! CPU-bound, never block, and need no synchronization. [`Reader::close`]
//! releases the buffer; later queries fail with a typed error.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod decoder;
mod error;
mod metadata;
mod reader;
mod tree;
mod value;

pub use crate::error::MmdbError;
pub use crate::metadata::Metadata;
pub use crate::reader::{Networks, Reader, NOT_FOUND};
pub use crate::value::{DataValue, Offset};

/// Library version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
