#![no_main]

use libfuzzer_sys::fuzz_target;

use totembus::tunnel::{pack_into, FrameStream};

// Unpacking arbitrary ATT payloads must never panic, and whatever parses must
// survive a repack/reparse cycle.
fuzz_target!(|payload: &[u8]| {
    let frames: Vec<_> = FrameStream::new(payload)
        .take_while(|record| record.is_ok())
        .map(|record| record.unwrap())
        .collect();

    let mut repacked = Vec::new();
    for frame in &frames {
        pack_into(frame, &mut repacked);
    }

    let reparsed: Vec<_> = FrameStream::new(&repacked)
        .map(|record| record.expect("repacked records parse"))
        .collect();
    assert_eq!(frames.len(), reparsed.len());
    for (a, b) in frames.iter().zip(reparsed.iter()) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.len, b.len);
    }
});
