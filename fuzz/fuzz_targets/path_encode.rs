//! Fuzz target for object path encoding.
//!
//! Any root and segment list must either encode to a valid object path or
//! fail cleanly, and distinct segment lists must never share a path.

#![no_main]

use arbitrary::Arbitrary;
use devicemgrd::path;
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    root: String,
    first: Vec<String>,
    second: Vec<String>,
}

fuzz_target!(|input: FuzzInput| {
    for segment in input.first.iter().chain(&input.second) {
        if let Some(escaped) = path::escape_segment(segment) {
            assert!(escaped.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_'));
        }
    }

    let a = path::encode(&input.root, input.first.as_slice());
    let b = path::encode(&input.root, input.second.as_slice());
    if let (Ok(a), Ok(b)) = (a, b) {
        if input.first != input.second {
            assert_ne!(a, b);
        }
    }
});
