#![no_main]
use geotrie::{DataValue, Reader};
use libfuzzer_sys::fuzz_target;
use std::sync::OnceLock;

#[path = "../../tests/common/mod.rs"]
mod common;

static PARTS: OnceLock<(Vec<u8>, Vec<u8>)> = OnceLock::new();

// Arbitrary bytes spliced in as the data section of an otherwise valid
// database: decoding must report corruption, never panic or hang.
fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let (tree, metadata) = PARTS.get_or_init(|| {
        let mut tree = common::TreeBuilder::new(4);
        tree.insert("10.0.0.0".parse().unwrap(), 8, 0);
        let (tree_bytes, node_count) = tree.build(24);
        let metadata = common::encode_value(&common::metadata_value(4, 24, node_count));
        (tree_bytes, metadata)
    });

    let db = common::assemble(tree, data, metadata);
    let Ok(reader) = Reader::from_bytes(db) else {
        return;
    };

    let mut value: Option<DataValue> = None;
    let _ = reader.decode(0, &mut value);

    let mut value: Option<DataValue> = None;
    let _ = reader.lookup("10.1.2.3".parse().unwrap(), &mut value);
});
