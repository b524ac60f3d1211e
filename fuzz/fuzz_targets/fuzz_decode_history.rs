#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // The decoder must reject or roundtrip arbitrary bytes without panicking
    if let Ok(store) = elspot::history::MovingAverageStore::from_bytes(data) {
        let _ = store.mean();
        let _ = store.to_bytes();
    }
});
