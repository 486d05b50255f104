#![no_main]
use geotrie::{DataValue, Reader};
use libfuzzer_sys::fuzz_target;

// Arbitrary bytes treated as a whole database file: opening must either
// fail cleanly or produce a reader whose queries never panic.
fuzz_target!(|data: &[u8]| {
    let Ok(reader) = Reader::from_bytes(data.to_vec()) else {
        return;
    };

    for address in ["1.2.3.4", "255.255.255.255", "::1:2:3:4", "2001:db8::1"] {
        let mut result: Option<DataValue> = None;
        let _ = reader.lookup(address.parse().unwrap(), &mut result);
        let _ = reader.lookup_offset(address.parse().unwrap());
    }

    if let Ok(networks) = reader.networks() {
        for item in networks.take(1_000) {
            if item.is_err() {
                break;
            }
        }
    }
});
