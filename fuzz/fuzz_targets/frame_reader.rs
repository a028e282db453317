//! Fuzz target for the frame reader
//!
//! Feeds arbitrary streams to `read_frame` until it reports an error.

#![no_main]

use ivy_core::frame::read_frame;
use libfuzzer_sys::fuzz_target;

const MAX_FRAME: usize = 64 * 1024;

fuzz_target!(|data: &[u8]| {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");

    runtime.block_on(async {
        let mut reader = data;
        while let Ok(payload) = read_frame(&mut reader, MAX_FRAME).await {
            assert!(payload.len() <= MAX_FRAME);
        }
    });
});
