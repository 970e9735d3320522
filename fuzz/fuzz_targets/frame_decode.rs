//! Fuzz target for Frame::decode
//!
//! Feeds arbitrary bytes to the protobuf frame decoder to find:
//! - Parser crashes or panics
//! - Frames that decode but cannot be re-encoded
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use parley_proto::Frame;

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = Frame::decode(data) {
        // Anything we accept, we must be able to send back
        let bytes = frame.to_bytes().expect("decoded frame must re-encode");
        let again = Frame::decode(&bytes).expect("re-encoded frame must decode");
        assert_eq!(frame, again);
    }
});
