//! Fuzz target for discovery datagram parsing

#![no_main]

use ivy_discovery::DiscoveryMessage;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = DiscoveryMessage::from_bytes(data);
});
