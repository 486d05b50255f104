//! Database reader and public query surface.
//!
//! A [`Reader`] wraps one contiguous, immutable byte buffer holding an
//! entire MMDB file. Opening validates the structure once (metadata
//! fields, tree bounds, IPv4 subtree position); afterwards every query is
//! a pure read with no internal synchronization, so a `Reader` can be
//! shared freely across threads.
//!
//! Queries compose the two subsystems: the search tree walker finds the
//! record for an address, and the data section decoder materializes it
//! into the caller's destination type.

use std::fmt;
use std::fs::File;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;

use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use memmap2::Mmap;
use serde::Deserialize;

use crate::decoder::Decoder;
use crate::error::MmdbError;
use crate::metadata::{find_metadata_start, Metadata, METADATA_START_MARKER};
use crate::tree::{IpBits, SearchTree};

/// Sentinel returned by [`Reader::lookup_offset`] when the address has no
/// record. Distinct from every valid data section offset.
pub const NOT_FOUND: usize = usize::MAX;

/// The search tree is separated from the data section by 16 zero bytes.
const DATA_SECTION_SEPARATOR_SIZE: usize = 16;

/// A reader for MMDB format databases.
///
/// Generic over the buffer source: a [`Mmap`], an owned `Vec<u8>`, or any
/// other contiguous byte container.
pub struct Reader<S: AsRef<[u8]>> {
    /// `None` once the reader has been closed.
    buf: Option<S>,
    metadata: Metadata,
    search_tree_size: usize,
    data_section_start: usize,
    data_section_end: usize,
    ipv4_start: usize,
    ipv4_start_bit_depth: usize,
}

impl Reader<Mmap> {
    /// Open a database file by memory mapping it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Reader<Mmap>, MmdbError> {
        let file = File::open(path)?;
        // Safety: the mapping is read-only and the file format is fully
        // bounds-checked on every access; a concurrent writer would be a
        // violation of the database's immutability contract.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| MmdbError::Io(e.to_string()))?;
        Reader::from_source(mmap)
    }
}

impl Reader<Vec<u8>> {
    /// Open a database file by reading it fully into memory.
    pub fn open_readfile<P: AsRef<Path>>(path: P) -> Result<Reader<Vec<u8>>, MmdbError> {
        Reader::from_source(std::fs::read(path)?)
    }

    /// Create a reader over an in-memory database image.
    pub fn from_bytes(buf: Vec<u8>) -> Result<Reader<Vec<u8>>, MmdbError> {
        Reader::from_source(buf)
    }
}

impl<S: AsRef<[u8]>> Reader<S> {
    /// Create a reader from any contiguous byte source.
    ///
    /// Locates and decodes the metadata, validates the file structure, and
    /// caches the IPv4 subtree position for IPv6 databases.
    pub fn from_source(buf: S) -> Result<Reader<S>, MmdbError> {
        let bytes = buf.as_ref();

        let metadata_start = find_metadata_start(bytes)?;
        let mut metadata_decoder = Decoder::new(&bytes[metadata_start..], 0);
        let metadata =
            Metadata::deserialize(&mut metadata_decoder).map_err(|_| MmdbError::InvalidMetadata)?;
        metadata.validate()?;

        let search_tree_size = metadata.search_tree_size();
        let data_section_start = search_tree_size + DATA_SECTION_SEPARATOR_SIZE;
        let data_section_end = metadata_start - METADATA_START_MARKER.len();
        if data_section_start > data_section_end {
            return Err(MmdbError::InvalidMetadata);
        }

        let (ipv4_start, ipv4_start_bit_depth) = if metadata.ip_version == 6 {
            let tree = SearchTree::new(
                &bytes[..search_tree_size],
                metadata.node_count as usize,
                metadata.record_size,
            );
            tree.find_ipv4_root()?
        } else {
            (0, 0)
        };

        Ok(Reader {
            buf: Some(buf),
            metadata,
            search_tree_size,
            data_section_start,
            data_section_end,
            ipv4_start,
            ipv4_start_bit_depth,
        })
    }

    /// Database metadata. Remains available after `close`.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Release the underlying buffer. Idempotent; subsequent queries fail
    /// with a closed-database error naming the operation.
    pub fn close(&mut self) -> Result<(), MmdbError> {
        self.buf = None;
        Ok(())
    }

    /// Look up `address` and decode its record into `result`.
    ///
    /// On a miss, `result` is left untouched.
    pub fn lookup<'de, T: Deserialize<'de>>(
        &'de self,
        address: IpAddr,
        result: &mut T,
    ) -> Result<(), MmdbError> {
        let bytes = self.require_open("Lookup")?;
        let ip = self.normalize(address)?;
        let (record, _) = self.walk(bytes, &ip)?;
        if record == 0 {
            return Ok(());
        }
        let offset = self.resolve_data_pointer(record)?;
        self.decode_at(bytes, offset, result)
    }

    /// Like [`lookup`](Self::lookup), additionally returning the matched
    /// network and whether a record was found.
    ///
    /// The network is the queried address truncated to the matched prefix
    /// length. IPv4 queries against an IPv6 database report in IPv4 form
    /// when the match lies entirely within the IPv4-mapped space, and in
    /// IPv6 form otherwise.
    pub fn lookup_network<'de, T: Deserialize<'de>>(
        &'de self,
        address: IpAddr,
        result: &mut T,
    ) -> Result<(IpNetwork, bool), MmdbError> {
        let bytes = self.require_open("LookupNetwork")?;
        let ip = self.normalize(address)?;
        let (record, prefix_len) = self.walk(bytes, &ip)?;
        let network = self.cidr(&ip, prefix_len)?;
        if record == 0 {
            return Ok((network, false));
        }
        let offset = self.resolve_data_pointer(record)?;
        self.decode_at(bytes, offset, result)?;
        Ok((network, true))
    }

    /// Look up `address` and return its raw data section offset without
    /// decoding, or [`NOT_FOUND`] on a miss.
    ///
    /// The offset feeds [`decode`](Self::decode) for deferred decoding and
    /// is stable for the lifetime of the database file.
    pub fn lookup_offset(&self, address: IpAddr) -> Result<usize, MmdbError> {
        let bytes = self.require_open("LookupOffset")?;
        let ip = self.normalize(address)?;
        let (record, _) = self.walk(bytes, &ip)?;
        if record == 0 {
            return Ok(NOT_FOUND);
        }
        self.resolve_data_pointer(record)
    }

    /// Decode the value at `offset` (as returned by
    /// [`lookup_offset`](Self::lookup_offset) or captured in an
    /// [`Offset`](crate::Offset) field) into `result`.
    pub fn decode<'de, T: Deserialize<'de>>(
        &'de self,
        offset: usize,
        result: &mut T,
    ) -> Result<(), MmdbError> {
        let bytes = self.require_open("Decode")?;
        if offset >= self.data_section_end - self.data_section_start {
            return Err(MmdbError::corrupt(
                "the MaxMind DB file's data section contains bad data (offset beyond the data section)",
            ));
        }
        self.decode_at(bytes, offset, result)
    }

    /// Iterate every network in the database, depth-first.
    pub fn networks(&self) -> Result<Networks<'_, S>, MmdbError> {
        let cidr = if self.metadata.ip_version == 6 {
            IpNetwork::V6(Ipv6Network::new(Ipv6Addr::UNSPECIFIED, 0).map_err(network_error)?)
        } else {
            IpNetwork::V4(Ipv4Network::new(Ipv4Addr::UNSPECIFIED, 0).map_err(network_error)?)
        };
        self.networks_within(cidr)
    }

    /// Iterate the networks contained in `cidr`, depth-first.
    ///
    /// Yields `(network, data_offset)` pairs; the offset is accepted by
    /// [`decode`](Self::decode). Networks without a record are skipped.
    /// In an IPv6 database, IPv4 ranges are iterated in their zero-prefix
    /// position and reported in IPv6 form.
    pub fn networks_within(&self, cidr: IpNetwork) -> Result<Networks<'_, S>, MmdbError> {
        let bytes = self.require_open("Networks")?;

        let (ip, requested_prefix) = match (cidr, self.metadata.ip_version) {
            (IpNetwork::V4(n), 4) => (IpBits::v4(n.network()), n.prefix() as usize),
            (IpNetwork::V4(n), _) => {
                // IPv4 space lives beneath ::/96 in an IPv6 tree.
                let mapped = Ipv6Addr::from(u32::from(n.network()) as u128);
                (IpBits::v6(mapped), n.prefix() as usize + 96)
            }
            (IpNetwork::V6(n), 6) => (IpBits::v6(n.network()), n.prefix() as usize),
            (IpNetwork::V6(n), _) => match n.network().to_ipv4() {
                Some(v4) if n.prefix() >= 96 => (IpBits::v4(v4), n.prefix() as usize - 96),
                _ => return Err(MmdbError::IpVersionMismatch(IpAddr::V6(n.network()))),
            },
        };

        let tree = self.tree(bytes);
        let node_count = self.metadata.node_count as usize;

        // Descend to the requested prefix. Stopping early means a single
        // record already covers the whole range.
        let mut node = 0usize;
        let mut depth = 0usize;
        for i in 0..requested_prefix {
            if node >= node_count {
                break;
            }
            node = tree.read_record(node, ip.get_bit(i) as usize)?;
            depth = i + 1;
        }

        Ok(Networks {
            reader: self,
            stack: vec![NetworkNode {
                node,
                ip,
                prefix_len: depth,
            }],
        })
    }

    fn require_open(&self, op: &'static str) -> Result<&[u8], MmdbError> {
        self.buf
            .as_ref()
            .map(|b| b.as_ref())
            .ok_or(MmdbError::ClosedDatabase(op))
    }

    fn tree<'de>(&self, bytes: &'de [u8]) -> SearchTree<'de> {
        SearchTree::new(
            &bytes[..self.search_tree_size],
            self.metadata.node_count as usize,
            self.metadata.record_size,
        )
    }

    /// Normalize an address for traversal.
    ///
    /// IPv4-mapped IPv6 addresses become plain IPv4 in any database. An
    /// IPv4-only database additionally accepts 16-byte addresses whose
    /// high 96 bits are zero; every other IPv6 input against it is a
    /// version mismatch.
    fn normalize(&self, address: IpAddr) -> Result<IpBits, MmdbError> {
        match address {
            IpAddr::V4(v4) => Ok(IpBits::v4(v4)),
            IpAddr::V6(v6) => {
                if let Some(v4) = v6.to_ipv4_mapped() {
                    Ok(IpBits::v4(v4))
                } else if self.metadata.ip_version == 4 {
                    match v6.to_ipv4() {
                        Some(v4) => Ok(IpBits::v4(v4)),
                        None => Err(MmdbError::IpVersionMismatch(address)),
                    }
                } else {
                    Ok(IpBits::v6(v6))
                }
            }
        }
    }

    /// Walk the tree for `ip`. Returns the record (0 on a miss) and the
    /// total matched prefix length, including the IPv4 subtree depth for
    /// IPv4 queries.
    fn walk(&self, bytes: &[u8], ip: &IpBits) -> Result<(usize, usize), MmdbError> {
        let start_node = if ip.is_v4() { self.ipv4_start } else { 0 };
        let (record, prefix_len) = self.tree(bytes).traverse(ip, start_node)?;
        let prefix_len = if ip.is_v4() {
            prefix_len + self.ipv4_start_bit_depth
        } else {
            prefix_len
        };
        Ok((record, prefix_len))
    }

    /// The matched network for a query, applying the reporting rule of
    /// IPv4 queries in IPv6 databases.
    fn cidr(&self, ip: &IpBits, prefix_len: usize) -> Result<IpNetwork, MmdbError> {
        if ip.is_v4() {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(ip.octets());
            let bits = u32::from_be_bytes(octets);

            if self.metadata.ip_version == 6 && prefix_len < 96 {
                // The match extends beyond the IPv4-mapped space; report
                // it where it actually lives in the IPv6 tree.
                let masked = (bits as u128) & mask128(prefix_len);
                let network = Ipv6Network::new(Ipv6Addr::from(masked), prefix_len as u8)
                    .map_err(network_error)?;
                return Ok(IpNetwork::V6(network));
            }

            let v4_prefix = if self.metadata.ip_version == 6 {
                prefix_len - 96
            } else {
                prefix_len
            };
            let masked = Ipv4Addr::from(bits & mask32(v4_prefix));
            let network =
                Ipv4Network::new(masked, v4_prefix as u8).map_err(network_error)?;
            Ok(IpNetwork::V4(network))
        } else {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(ip.octets());
            let masked = u128::from_be_bytes(octets) & mask128(prefix_len);
            let network = Ipv6Network::new(Ipv6Addr::from(masked), prefix_len as u8)
                .map_err(network_error)?;
            Ok(IpNetwork::V6(network))
        }
    }

    /// Resolve a data record value from the tree to a data section offset.
    fn resolve_data_pointer(&self, record: usize) -> Result<usize, MmdbError> {
        let offset = record
            .checked_sub(self.metadata.node_count as usize)
            .and_then(|v| v.checked_sub(DATA_SECTION_SEPARATOR_SIZE))
            .ok_or_else(|| {
                MmdbError::corrupt("the MaxMind DB file's search tree is corrupt")
            })?;
        if offset >= self.data_section_end - self.data_section_start {
            return Err(MmdbError::corrupt(
                "the MaxMind DB file's search tree is corrupt \
                 (data record resolves beyond the data section)",
            ));
        }
        Ok(offset)
    }

    fn decode_at<'de, T: Deserialize<'de>>(
        &self,
        bytes: &'de [u8],
        offset: usize,
        result: &mut T,
    ) -> Result<(), MmdbError> {
        let data_section = &bytes[self.data_section_start..self.data_section_end];
        let mut decoder = Decoder::new(data_section, offset);
        *result = T::deserialize(&mut decoder)?;
        Ok(())
    }
}

impl<S: AsRef<[u8]>> fmt::Debug for Reader<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("metadata", &self.metadata)
            .field("closed", &self.buf.is_none())
            .finish()
    }
}

fn network_error(err: ipnetwork::IpNetworkError) -> MmdbError {
    MmdbError::corrupt(format!("invalid network prefix: {}", err))
}

fn mask32(prefix: usize) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    }
}

fn mask128(prefix: usize) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - prefix)
    }
}

#[derive(Debug)]
struct NetworkNode {
    node: usize,
    ip: IpBits,
    prefix_len: usize,
}

/// Depth-first iterator over the networks of a database.
///
/// Created by [`Reader::networks`] and [`Reader::networks_within`].
#[derive(Debug)]
pub struct Networks<'de, S: AsRef<[u8]>> {
    reader: &'de Reader<S>,
    stack: Vec<NetworkNode>,
}

impl<'de, S: AsRef<[u8]>> Iterator for Networks<'de, S> {
    type Item = Result<(IpNetwork, usize), MmdbError>;

    fn next(&mut self) -> Option<Self::Item> {
        let bytes = match self.reader.require_open("Networks") {
            Ok(bytes) => bytes,
            Err(err) => return Some(Err(err)),
        };
        let tree = self.reader.tree(bytes);
        let node_count = self.reader.metadata.node_count as usize;

        while let Some(current) = self.stack.pop() {
            if current.node == node_count {
                continue;
            }
            if current.node > node_count {
                let network = self.reader.cidr(&current.ip, current.prefix_len);
                let offset = self.reader.resolve_data_pointer(current.node);
                return Some(network.and_then(|n| offset.map(|o| (n, o))));
            }
            if current.prefix_len >= current.ip.bit_count() {
                self.stack.clear();
                return Some(Err(MmdbError::corrupt("invalid node in search tree")));
            }

            // Right first so the left branch pops first (ascending order).
            let right = match tree.read_record(current.node, 1) {
                Ok(node) => node,
                Err(err) => return Some(Err(err)),
            };
            let left = match tree.read_record(current.node, 0) {
                Ok(node) => node,
                Err(err) => return Some(Err(err)),
            };
            self.stack.push(NetworkNode {
                node: right,
                ip: current.ip.with_bit_set(current.prefix_len),
                prefix_len: current.prefix_len + 1,
            });
            self.stack.push(NetworkNode {
                node: left,
                ip: current.ip,
                prefix_len: current.prefix_len + 1,
            });
        }
        None
    }
}
