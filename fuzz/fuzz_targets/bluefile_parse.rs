//! Fuzz target for BLUE header parsing.
//!
//! Tests:
//! - Arbitrary bytes never panic the parser
//! - Anything that parses re-encodes and parses to the same geometry

#![no_main]

use libfuzzer_sys::fuzz_target;
use sigdata_storage::bluefile::parse;

fuzz_target!(|data: &[u8]| {
    let Ok(file) = parse(data) else {
        return;
    };

    // Reading every atom must stay in bounds
    let view = file.view();
    for i in 0..view.len_atoms().min(4096) {
        assert!(view.read_atom(i).is_ok(), "atom {} out of bounds", i);
    }

    // Main keywords may exceed the HCB once re-rendered; only check what encodes
    if let Ok(bytes) = file.to_bytes() {
        let again = parse(&bytes).expect("re-encoded file must parse");
        assert_eq!(again.header().geometry(), file.header().geometry());
        assert_eq!(again.data(), file.data());
    }
});
