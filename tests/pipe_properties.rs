//! Pipe properties checked through the public API.
//!
//! Covers ordered round trips under randomized fill/drain interleavings,
//! byte conservation, all-or-nothing fills and short reads.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sigdata::{derive_geometry, CapacityPolicy, DataError, FormatDescriptor, Geometry, Layout};
use sigdata::{Pipe, PipeConfig};
use std::collections::VecDeque;

fn geometry(code: &str, layout: Layout, subsize: u64) -> Geometry {
    derive_geometry(FormatDescriptor::resolve(code).unwrap(), layout, 0, subsize).unwrap()
}

/// Representable test value for scalar `i` of a format.
fn sample(code: &str, i: usize) -> f64 {
    match &code[1..] {
        "P" => (i % 3 == 0) as u8 as f64,
        "B" => (i % 200) as f64 - 100.0,
        "O" => (i % 250) as f64,
        "U" | "V" => (i % 60_000) as f64,
        "F" | "D" => i as f64 * 0.25 - 7.0,
        _ => (i % 30_000) as f64 - 15_000.0,
    }
}

/// Drive a pipe with random fills and drains and check that the drained stream is
/// exactly the filled stream.
fn randomized_round_trip(
    code: &str,
    layout: Layout,
    subsize: u64,
    capacity: u64,
    policy: CapacityPolicy,
    seed: u64,
) {
    let geometry = geometry(code, layout, subsize);
    let mut pipe = Pipe::new(&geometry, PipeConfig::new(capacity).with_policy(policy)).unwrap();
    let per_element = geometry.scalars_per_element();
    let mut rng = StdRng::seed_from_u64(seed);

    let mut next = 0usize;
    let mut expected: VecDeque<f64> = VecDeque::new();
    let mut drained = 0usize;

    for _ in 0..400 {
        assert_eq!(
            pipe.available_to_read() + pipe.available_to_write(),
            pipe.capacity()
        );

        if rng.gen_bool(0.55) {
            let count = rng.gen_range(0..=pipe.writable_elements() + 1);
            let source: Vec<f64> = (next..next + count * per_element)
                .map(|i| sample(code, i))
                .collect();

            let before = (pipe.write_cursor(), pipe.read_cursor(), pipe.available_to_read());
            match pipe.fill(&source, count) {
                Ok(()) => {
                    expected.extend(source.iter().copied());
                    next += source.len();
                }
                Err(DataError::PipeFull { .. }) => {
                    assert_eq!(
                        before,
                        (pipe.write_cursor(), pipe.read_cursor(), pipe.available_to_read())
                    );
                }
                Err(e) => panic!("unexpected error: {}", e),
            }
        } else {
            let max = rng.gen_range(0..8);
            let available = pipe.readable_elements();
            let out = pipe.drain_to_vec(max);
            assert_eq!(out.len(), max.min(available) * per_element);
            for value in out {
                assert_eq!(Some(value), expected.pop_front(), "{} scalar {}", code, drained);
                drained += 1;
            }
        }
    }

    let rest = pipe.drain_to_vec(usize::MAX);
    assert_eq!(rest, expected.into_iter().collect::<Vec<_>>());
    assert!(pipe.is_empty());
}

#[test]
fn test_round_trip_every_scalar_type() {
    for (i, code) in ["SP", "SB", "SO", "SI", "SU", "SL", "SV", "SX", "SF", "SD"]
        .into_iter()
        .enumerate()
    {
        randomized_round_trip(code, Layout::Flat, 1, 64, CapacityPolicy::Strict, i as u64);
    }
}

#[test]
fn test_round_trip_complex_formats() {
    for (i, code) in ["CB", "CI", "CL", "CF", "CD"].into_iter().enumerate() {
        randomized_round_trip(code, Layout::Flat, 1, 96, CapacityPolicy::Strict, 100 + i as u64);
    }
}

#[test]
fn test_round_trip_matrix_rows_with_odd_remainder() {
    randomized_round_trip("CF", Layout::Matrix, 4, 80, CapacityPolicy::OddRemainder, 7);
    randomized_round_trip("SI", Layout::Matrix, 3, 100, CapacityPolicy::OddRemainder, 8);
    randomized_round_trip("SP", Layout::Matrix, 5, 3, CapacityPolicy::OddRemainder, 9);
}

#[test]
fn test_real_float_fill_then_partial_drain() {
    let mut pipe = Pipe::new(&geometry("SF", Layout::Flat, 1), PipeConfig::new(16)).unwrap();

    pipe.fill(&[1.0, 2.0], 2).unwrap();
    assert_eq!(pipe.available_to_read(), 8);

    let mut dest = [0.0; 4];
    assert_eq!(pipe.drain(&mut dest, 4), 2);
    assert_eq!(&dest[..2], &[1.0, 2.0]);
    assert_eq!(pipe.available_to_read(), 0);
}

#[test]
fn test_complex_float_full_pipe() {
    let mut pipe = Pipe::new(&geometry("CF", Layout::Flat, 1), PipeConfig::new(16)).unwrap();

    pipe.fill(&[1.0, 2.0, 3.0, 4.0], 2).unwrap();
    let err = pipe.fill(&[5.0, 6.0], 1).unwrap_err();
    assert!(err.is_recoverable());
    assert_eq!(pipe.available_to_read(), 16);

    let mut dest = [0.0; 2];
    assert_eq!(pipe.drain(&mut dest, 1), 1);
    assert_eq!(dest, [1.0, 2.0]);

    pipe.fill(&[5.0, 6.0], 1).unwrap();
    assert_eq!(pipe.available_to_read(), 16);
    assert_eq!(pipe.drain_to_vec(2), vec![3.0, 4.0, 5.0, 6.0]);
}

#[test]
fn test_matrix_capacity_policies() {
    let rows = geometry("CF", Layout::Matrix, 4);

    assert!(matches!(
        Pipe::new(&rows, PipeConfig::new(80)),
        Err(DataError::MisalignedCapacity { .. })
    ));

    let mut pipe = Pipe::new(
        &rows,
        PipeConfig::new(80).with_policy(CapacityPolicy::OddRemainder),
    )
    .unwrap();
    let row = [0.5; 8];

    pipe.fill(&row, 1).unwrap();
    pipe.fill(&row, 1).unwrap();
    assert_eq!((pipe.available_to_read(), pipe.available_to_write()), (64, 16));
    assert!(pipe.fill(&row, 1).is_err());

    pipe.drain_to_vec(1);
    assert_eq!((pipe.available_to_read(), pipe.available_to_write()), (32, 48));

    pipe.fill(&row, 1).unwrap();
    assert_eq!((pipe.available_to_read(), pipe.available_to_write()), (64, 16));
    assert_eq!(pipe.write_cursor(), 16);
}

#[test]
fn test_short_read_never_fails() {
    let mut pipe = Pipe::new(&geometry("SD", Layout::Flat, 1), PipeConfig::new(64)).unwrap();
    pipe.fill(&[1.0, 2.0, 3.0], 3).unwrap();

    let mut dest = [0.0; 16];
    assert_eq!(pipe.drain(&mut dest, 10), 3);
    assert_eq!(pipe.drain(&mut dest, 10), 0);
    assert_eq!(pipe.drain(&mut dest, 0), 0);
}

#[tokio::test]
async fn test_taps_follow_fills() {
    let mut pipe = Pipe::new(&geometry("CI", Layout::Flat, 1), PipeConfig::new(64)).unwrap();
    let mut every = pipe.register_tap("every".to_string(), 1).unwrap();
    let mut tenth = pipe.register_tap("tenth".to_string(), 10).unwrap();

    for i in 0..12 {
        pipe.fill(&[f64::from(i), -f64::from(i)], 1).unwrap();
        pipe.drain_to_vec(1);
    }

    let mut seen = 0;
    while let Ok(frame) = every.try_recv() {
        assert_eq!(frame.len(), 2);
        seen += 1;
    }
    // Channel holds the default 16 frames, so nothing was dropped.
    assert_eq!(seen, 12);

    assert_eq!(&tenth.recv().await.unwrap()[..], &[0.0, 0.0]);
    assert_eq!(&tenth.recv().await.unwrap()[..], &[10.0, -10.0]);

    let taps = pipe.list_taps();
    assert_eq!(taps.len(), 2);
    assert!(taps.iter().all(|(_, _, dropped)| *dropped == 0));
}
