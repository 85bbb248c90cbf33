//! Fuzz target: `codec::decode`
//!
//! Drives arbitrary text into the envelope classifier and asserts that it
//! never panics and that anything it accepts re-encodes and decodes to an
//! envelope of the same shape and id.
//!
//! cargo fuzz run fuzz_envelope_decode

#![no_main]

use libfuzzer_sys::fuzz_target;
use postbridge::rpc::codec::{decode, encode};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(envelope) = decode(text) else {
        return;
    };

    assert!(
        envelope.id().is_some() || envelope.method().is_some(),
        "accepted envelope must be routable"
    );
    let again = encode(&envelope).expect("accepted envelope must encode");
    let back = decode(&again).expect("re-decode");
    assert_eq!(back.kind_name(), envelope.kind_name());
    assert_eq!(back.id(), envelope.id());
    assert_eq!(back.method(), envelope.method());
});
