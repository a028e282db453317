//! Fuzz target for wire message decoding
//!
//! Arbitrary bytes must decode to a message or an error, never a panic.

#![no_main]

use ivy_core::WireMessage;
use ivy_core::frame::DEFAULT_MAX_FRAME_SIZE;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = WireMessage::decode(data, DEFAULT_MAX_FRAME_SIZE) {
        // Anything accepted survives a second trip through the codec
        let encoded = message.encode().expect("decoded message encodes");
        let again = WireMessage::decode(&encoded, DEFAULT_MAX_FRAME_SIZE)
            .expect("re-encoded message decodes");
        assert_eq!(again, message);
    }
});
