//! Fuzz test for peer ID parsing
//!
//! Discovery hands us peer IDs as untrusted strings.

#![no_main]

use ivy_core::PeerId;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(peer_id) = PeerId::parse(s) {
        // Accepted IDs are canonical
        assert_eq!(peer_id.as_str(), s);
        assert_eq!(peer_id.as_str().len(), 44);
    }
});
