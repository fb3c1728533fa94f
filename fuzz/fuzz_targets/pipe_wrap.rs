//! Fuzz target for pipe wrap-around behavior.
//!
//! Tests:
//! - Fill/drain ordering when elements straddle the end of the store
//! - All-or-nothing fills at every cursor position
//! - Byte conservation between readable and writable space

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sigdata::{derive_geometry, CapacityPolicy, FormatDescriptor, Layout, Pipe, PipeConfig};
use std::collections::VecDeque;

const CODES: [&str; 8] = ["SP", "SB", "SI", "SF", "SD", "CB", "CF", "CD"];

/// Fuzz input for wrap-around testing
#[derive(Debug, Arbitrary)]
struct WrapInput {
    /// Index into the format list
    format: u8,
    /// Atoms per row (1-8)
    subsize: u8,
    /// Store size in bytes (1-256)
    capacity: u8,
    /// Operations to perform
    operations: Vec<WrapOp>,
}

#[derive(Debug, Clone, Arbitrary)]
enum WrapOp {
    /// Fill this many elements
    Fill { count: u8 },
    /// Drain up to this many elements and verify order
    Drain { max: u8 },
    /// Discard everything
    Reset,
}

fuzz_target!(|input: WrapInput| {
    let code = CODES[input.format as usize % CODES.len()];
    let Ok(format) = FormatDescriptor::resolve(code) else {
        return;
    };
    let subsize = u64::from(input.subsize % 8) + 1;
    let Ok(geometry) = derive_geometry(format, Layout::Matrix, 0, subsize) else {
        return;
    };
    let config = PipeConfig::new(u64::from(input.capacity) + 1)
        .with_policy(CapacityPolicy::OddRemainder);
    let Ok(mut pipe) = Pipe::new(&geometry, config) else {
        return;
    };

    let per_element = geometry.scalars_per_element();
    let packed = format.is_packed();
    let mut next = 0u64;
    let mut expected: VecDeque<f64> = VecDeque::new();

    for op in input.operations.iter().take(200) {
        match op {
            WrapOp::Fill { count } => {
                let count = *count as usize;
                let source: Vec<f64> = (0..count * per_element)
                    .map(|i| {
                        let v = next + i as u64;
                        if packed { (v % 2) as f64 } else { (v % 100) as f64 }
                    })
                    .collect();
                let before = (pipe.write_cursor(), pipe.available_to_read());
                if pipe.fill(&source, count).is_ok() {
                    expected.extend(source.iter().copied());
                    next += source.len() as u64;
                } else {
                    assert_eq!(before, (pipe.write_cursor(), pipe.available_to_read()));
                }
            }
            WrapOp::Drain { max } => {
                for value in pipe.drain_to_vec(*max as usize) {
                    assert_eq!(Some(value), expected.pop_front());
                }
            }
            WrapOp::Reset => {
                pipe.reset();
                expected.clear();
            }
        }

        assert_eq!(
            pipe.available_to_read() + pipe.available_to_write(),
            pipe.capacity()
        );
        assert_eq!(pipe.readable_elements() * per_element, expected.len());
    }
});
