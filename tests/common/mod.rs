//! In-memory MMDB fixture writer.
//!
//! Test support only: builds complete, valid MMDB images (search tree,
//! separator, data section, metadata) so the reader can be exercised
//! against known content without binary fixture files. Also exposes the
//! raw pieces (value encoding, file assembly) so corruption cases can be
//! crafted byte by byte.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::IpAddr;

/// A value to encode into a data section.
///
/// Unlike the reader's opaque representation, this keeps every wire type
/// distinct so fixtures control exactly which encoding appears on disk.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Pointer(usize),
    String(String),
    Double(f64),
    Bytes(Vec<u8>),
    Uint16(u16),
    Uint32(u32),
    Map(Vec<(String, Value)>),
    Int32(i32),
    Uint64(u64),
    Uint128(u128),
    Array(Vec<Value>),
    Bool(bool),
    Float(f32),
    /// Pre-encoded bytes spliced in verbatim, for corruption fixtures.
    Raw(Vec<u8>),
}

pub fn string(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn map(pairs: &[(&str, Value)]) -> Value {
    Value::Map(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
    )
}

/// Encode a single value, with nested values inline.
pub fn encode_value(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_into(value, &mut buf);
    buf
}

fn push_control(type_num: u8, size: usize, buf: &mut Vec<u8>) {
    let (low5, ext): (u8, Vec<u8>) = if size < 29 {
        (size as u8, vec![])
    } else if size < 285 {
        (29, vec![(size - 29) as u8])
    } else if size < 65_821 {
        (30, ((size - 285) as u16).to_be_bytes().to_vec())
    } else {
        let v = size - 65_821;
        (31, vec![(v >> 16) as u8, (v >> 8) as u8, v as u8])
    };
    if type_num < 8 {
        buf.push((type_num << 5) | low5);
    } else {
        // Extended type: size bits in the first byte, type in the second.
        buf.push(low5);
        buf.push(type_num - 7);
    }
    buf.extend_from_slice(&ext);
}

fn push_unsigned(type_num: u8, bytes: &[u8], buf: &mut Vec<u8>) {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    push_control(type_num, bytes.len() - start, buf);
    buf.extend_from_slice(&bytes[start..]);
}

fn encode_into(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Pointer(target) => {
            let target = *target;
            if target < 2_048 {
                buf.push(0x20 | ((target >> 8) as u8 & 0x7));
                buf.push(target as u8);
            } else if target < 526_336 {
                let v = target - 2_048;
                buf.push(0x28 | ((v >> 16) as u8 & 0x7));
                buf.push((v >> 8) as u8);
                buf.push(v as u8);
            } else if target < (1 << 27) + 526_336 {
                let v = target - 526_336;
                buf.push(0x30 | ((v >> 24) as u8 & 0x7));
                buf.push((v >> 16) as u8);
                buf.push((v >> 8) as u8);
                buf.push(v as u8);
            } else {
                buf.push(0x38);
                buf.extend_from_slice(&(target as u32).to_be_bytes());
            }
        }
        Value::String(s) => {
            push_control(2, s.len(), buf);
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Double(d) => {
            push_control(3, 8, buf);
            buf.extend_from_slice(&d.to_be_bytes());
        }
        Value::Bytes(b) => {
            push_control(4, b.len(), buf);
            buf.extend_from_slice(b);
        }
        Value::Uint16(n) => push_unsigned(5, &n.to_be_bytes(), buf),
        Value::Uint32(n) => push_unsigned(6, &n.to_be_bytes(), buf),
        Value::Map(pairs) => {
            push_control(7, pairs.len(), buf);
            for (key, val) in pairs {
                encode_into(&Value::String(key.clone()), buf);
                encode_into(val, buf);
            }
        }
        Value::Int32(n) => {
            push_control(8, 4, buf);
            buf.extend_from_slice(&n.to_be_bytes());
        }
        Value::Uint64(n) => push_unsigned(9, &n.to_be_bytes(), buf),
        Value::Uint128(n) => push_unsigned(10, &n.to_be_bytes(), buf),
        Value::Array(items) => {
            push_control(11, items.len(), buf);
            for item in items {
                encode_into(item, buf);
            }
        }
        Value::Bool(b) => push_control(14, *b as usize, buf),
        Value::Float(f) => {
            push_control(15, 4, buf);
            buf.extend_from_slice(&f.to_be_bytes());
        }
        Value::Raw(bytes) => buf.extend_from_slice(bytes),
    }
}

/// Data section encoder with whole-value deduplication: writing the same
/// value twice yields the same offset, so records can be shared.
#[derive(Default)]
pub struct DataWriter {
    buffer: Vec<u8>,
    dedup: HashMap<Vec<u8>, usize>,
}

impl DataWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `value` and return its offset within the data section.
    pub fn write(&mut self, value: &Value) -> usize {
        let encoded = encode_value(value);
        if let Some(&offset) = self.dedup.get(&encoded) {
            return offset;
        }
        let offset = self.buffer.len();
        self.buffer.extend_from_slice(&encoded);
        self.dedup.insert(encoded, offset);
        offset
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodePointer {
    Node(u32),
    /// Data offset plus the prefix length it was inserted at, so that
    /// longest-prefix layering keeps the most specific record.
    Data(usize, u8),
    Empty,
}

#[derive(Debug, Clone)]
struct Node {
    left: NodePointer,
    right: NodePointer,
}

impl Node {
    fn new_empty() -> Self {
        Node {
            left: NodePointer::Empty,
            right: NodePointer::Empty,
        }
    }
}

/// Arena-based search tree builder.
pub struct TreeBuilder {
    nodes: Vec<Node>,
    ip_version: u16,
}

impl TreeBuilder {
    pub fn new(ip_version: u16) -> Self {
        TreeBuilder {
            nodes: vec![Node::new_empty()],
            ip_version,
        }
    }

    /// Insert a network with its data offset. IPv4 networks in an IPv6
    /// tree land beneath ::/96.
    pub fn insert(&mut self, addr: IpAddr, prefix_len: u8, data_offset: usize) {
        let (bits, prefix_len) = match addr {
            IpAddr::V4(v4) => {
                assert!(prefix_len <= 32);
                if self.ip_version == 4 {
                    ((u32::from(v4) as u128) << 96, prefix_len)
                } else {
                    // IPv4 space sits beneath ::/96.
                    (u32::from(v4) as u128, 96 + prefix_len)
                }
            }
            IpAddr::V6(v6) => {
                assert!(self.ip_version == 6, "IPv6 network in an IPv4-only tree");
                (u128::from(v6), prefix_len)
            }
        };
        self.insert_bits(bits, prefix_len, data_offset);
    }

    fn insert_bits(&mut self, bits: u128, prefix_len: u8, data_offset: usize) {
        let mut node_id = 0usize;

        for depth in 0..prefix_len {
            let bit = ((bits >> (127 - depth)) & 1) as u8;
            let child = self.child(node_id, bit);

            if depth + 1 == prefix_len {
                match child {
                    NodePointer::Empty => {
                        self.set_child(node_id, bit, NodePointer::Data(data_offset, prefix_len));
                    }
                    NodePointer::Data(_, existing) => {
                        if prefix_len >= existing {
                            self.set_child(
                                node_id,
                                bit,
                                NodePointer::Data(data_offset, prefix_len),
                            );
                        }
                    }
                    NodePointer::Node(child_id) => {
                        // More specific prefixes already exist below; fill
                        // the gaps they left.
                        self.backfill(child_id as usize, data_offset, prefix_len);
                    }
                }
                return;
            }

            match child {
                NodePointer::Empty => {
                    let new_id = self.allocate();
                    self.set_child(node_id, bit, NodePointer::Node(new_id));
                    node_id = new_id as usize;
                }
                NodePointer::Node(child_id) => {
                    node_id = child_id as usize;
                }
                NodePointer::Data(existing_offset, existing_prefix) => {
                    // A less specific record sits on this edge; push it
                    // down one level and keep descending.
                    let new_id = self.allocate();
                    self.nodes[new_id as usize].left =
                        NodePointer::Data(existing_offset, existing_prefix);
                    self.nodes[new_id as usize].right =
                        NodePointer::Data(existing_offset, existing_prefix);
                    self.set_child(node_id, bit, NodePointer::Node(new_id));
                    node_id = new_id as usize;
                }
            }
        }
    }

    fn backfill(&mut self, node_id: usize, data_offset: usize, prefix_len: u8) {
        for bit in 0..2u8 {
            match self.child(node_id, bit) {
                NodePointer::Empty => {
                    self.set_child(node_id, bit, NodePointer::Data(data_offset, prefix_len));
                }
                NodePointer::Data(_, existing) => {
                    if prefix_len > existing {
                        self.set_child(node_id, bit, NodePointer::Data(data_offset, prefix_len));
                    }
                }
                NodePointer::Node(child_id) => {
                    self.backfill(child_id as usize, data_offset, prefix_len);
                }
            }
        }
    }

    fn child(&self, node_id: usize, bit: u8) -> NodePointer {
        let node = &self.nodes[node_id];
        if bit == 0 {
            node.left
        } else {
            node.right
        }
    }

    fn set_child(&mut self, node_id: usize, bit: u8, pointer: NodePointer) {
        let node = &mut self.nodes[node_id];
        if bit == 0 {
            node.left = pointer;
        } else {
            node.right = pointer;
        }
    }

    fn allocate(&mut self) -> u32 {
        let id = self.nodes.len() as u32;
        self.nodes.push(Node::new_empty());
        id
    }

    /// Serialize for the given record size. Returns (bytes, node_count).
    pub fn build(&self, record_size: u16) -> (Vec<u8>, u32) {
        let node_count = self.nodes.len() as u32;
        let node_bytes = record_size as usize / 4;
        let mut tree = vec![0u8; node_count as usize * node_bytes];

        for (node_id, node) in self.nodes.iter().enumerate() {
            let left = self.record_value(node.left, node_count);
            let right = self.record_value(node.right, node_count);
            let base = node_id * node_bytes;
            match record_size {
                24 => {
                    tree[base..base + 3].copy_from_slice(&left.to_be_bytes()[1..]);
                    tree[base + 3..base + 6].copy_from_slice(&right.to_be_bytes()[1..]);
                }
                28 => {
                    tree[base..base + 3].copy_from_slice(&left.to_be_bytes()[1..]);
                    tree[base + 3] = (((left >> 24) as u8 & 0x0f) << 4) | ((right >> 24) as u8 & 0x0f);
                    tree[base + 4..base + 7].copy_from_slice(&right.to_be_bytes()[1..]);
                }
                32 => {
                    tree[base..base + 4].copy_from_slice(&left.to_be_bytes());
                    tree[base + 4..base + 8].copy_from_slice(&right.to_be_bytes());
                }
                other => panic!("unsupported record size {}", other),
            }
        }

        (tree, node_count)
    }

    fn record_value(&self, pointer: NodePointer, node_count: u32) -> u32 {
        match pointer {
            NodePointer::Empty => node_count,
            NodePointer::Node(id) => id,
            NodePointer::Data(offset, _) => node_count + 16 + offset as u32,
        }
    }
}

/// Assemble a complete database image from its sections.
pub fn assemble(
    tree_bytes: &[u8],
    data_bytes: &[u8],
    metadata_bytes: &[u8],
) -> Vec<u8> {
    let mut db = Vec::new();
    db.extend_from_slice(tree_bytes);
    db.extend_from_slice(&[0u8; 16]);
    db.extend_from_slice(data_bytes);
    db.extend_from_slice(b"\xab\xcd\xefMaxMind.com");
    db.extend_from_slice(metadata_bytes);
    db
}

/// The standard metadata map used by the fixture databases.
pub fn metadata_value(ip_version: u16, record_size: u16, node_count: u32) -> Value {
    map(&[
        ("binary_format_major_version", Value::Uint16(2)),
        ("binary_format_minor_version", Value::Uint16(0)),
        ("build_epoch", Value::Uint64(1_704_067_200)),
        ("database_type", string("Test")),
        (
            "description",
            map(&[
                ("en", string("Test Database")),
                ("zh", string("Test Database Chinese")),
            ]),
        ),
        ("ip_version", Value::Uint16(ip_version)),
        (
            "languages",
            Value::Array(vec![string("en"), string("zh")]),
        ),
        ("node_count", Value::Uint32(node_count)),
        ("record_size", Value::Uint16(record_size)),
    ])
}

/// High-level fixture builder: insert networks, build a database image.
pub struct MmdbWriter {
    ip_version: u16,
    record_size: u16,
    data: DataWriter,
    networks: Vec<(IpAddr, u8, usize)>,
}

impl MmdbWriter {
    pub fn new(ip_version: u16, record_size: u16) -> Self {
        MmdbWriter {
            ip_version,
            record_size,
            data: DataWriter::new(),
            networks: Vec::new(),
        }
    }

    /// Encode `value` into the data section, returning its offset.
    pub fn write_data(&mut self, value: &Value) -> usize {
        self.data.write(value)
    }

    /// Insert `cidr` ("1.2.3.0/24", or a bare address for a host route)
    /// with `value` as its record.
    pub fn insert(&mut self, cidr: &str, value: Value) {
        let offset = self.data.write(&value);
        self.insert_at(cidr, offset);
    }

    /// Insert `cidr` pointing at an already-written data offset.
    pub fn insert_at(&mut self, cidr: &str, data_offset: usize) {
        let (addr, prefix_len) = parse_cidr(cidr);
        self.networks.push((addr, prefix_len, data_offset));
    }

    pub fn build(self) -> Vec<u8> {
        let mut tree = TreeBuilder::new(self.ip_version);
        for &(addr, prefix_len, offset) in &self.networks {
            tree.insert(addr, prefix_len, offset);
        }
        let (tree_bytes, node_count) = tree.build(self.record_size);
        let metadata =
            encode_value(&metadata_value(self.ip_version, self.record_size, node_count));
        assemble(&tree_bytes, &self.data.into_bytes(), &metadata)
    }
}

pub fn parse_cidr(cidr: &str) -> (IpAddr, u8) {
    match cidr.split_once('/') {
        Some((addr, prefix)) => (
            addr.parse().expect("invalid address in fixture"),
            prefix.parse().expect("invalid prefix in fixture"),
        ),
        None => {
            let addr: IpAddr = cidr.parse().expect("invalid address in fixture");
            let prefix = if addr.is_ipv4() { 32 } else { 128 };
            (addr, prefix)
        }
    }
}

/// The ipv4 test network set: disjoint host and subnet routes whose
/// record is {"ip": "<network address>"}.
pub const IPV4_NETWORKS: &[&str] = &[
    "1.1.1.1/32",
    "1.1.1.2/31",
    "1.1.1.4/30",
    "1.1.1.8/29",
    "1.1.1.16/28",
    "1.1.1.32/32",
];

/// The ipv6 test network set.
pub const IPV6_NETWORKS: &[&str] = &[
    "::1:ffff:ffff/128",
    "::2:0:0/122",
    "::2:0:40/124",
    "::2:0:50/125",
    "::2:0:58/127",
];

/// Database mirroring the canonical ipv4 test fixture.
pub fn ipv4_db(record_size: u16) -> Vec<u8> {
    let mut writer = MmdbWriter::new(4, record_size);
    for network in IPV4_NETWORKS {
        let addr = network.split('/').next().unwrap();
        writer.insert(network, map(&[("ip", string(addr))]));
    }
    writer.build()
}

/// Database mirroring the canonical ipv6 test fixture.
pub fn ipv6_db(record_size: u16) -> Vec<u8> {
    let mut writer = MmdbWriter::new(6, record_size);
    for network in IPV6_NETWORKS {
        let addr = network.split('/').next().unwrap();
        writer.insert(network, map(&[("ip", string(addr))]));
    }
    writer.build()
}

/// The all-types record of the decoder test database.
pub fn decoder_record() -> Value {
    map(&[
        (
            "array",
            Value::Array(vec![Value::Uint64(1), Value::Uint64(2), Value::Uint64(3)]),
        ),
        ("boolean", Value::Bool(true)),
        ("bytes", Value::Bytes(vec![0x00, 0x00, 0x00, 0x2a])),
        ("double", Value::Double(42.123456)),
        ("float", Value::Float(1.1)),
        ("int32", Value::Int32(-268_435_456)),
        (
            "map",
            map(&[(
                "mapX",
                map(&[
                    (
                        "arrayX",
                        Value::Array(vec![
                            Value::Uint64(7),
                            Value::Uint64(8),
                            Value::Uint64(9),
                        ]),
                    ),
                    ("utf8_stringX", string("hello")),
                ]),
            )]),
        ),
        (
            "uint128",
            Value::Uint128(1_329_227_995_784_915_872_903_807_060_280_344_576),
        ),
        ("uint16", Value::Uint16(100)),
        ("uint32", Value::Uint32(0x1000_0000)),
        ("uint64", Value::Uint64(0x1000_0000_0000_0000)),
        ("utf8_string", string("unicode! ☯ - ♫")),
    ])
}

/// Database mirroring the canonical decoder test fixture: the all-types
/// record at 1.1.1.0/24 in an IPv6 tree.
pub fn decoder_db() -> Vec<u8> {
    let mut writer = MmdbWriter::new(6, 24);
    writer.insert("1.1.1.0/24", decoder_record());
    writer.build()
}
