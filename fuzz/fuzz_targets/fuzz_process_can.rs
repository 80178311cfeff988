#![no_main]

use libfuzzer_sys::fuzz_target;

use totembus::{CanFrame, TotemBus};

// Arbitrary record sequences must never panic the engine or leak a slot.
fuzz_target!(|records: Vec<(u32, Vec<u8>)>| {
    let mut bus = TotemBus::new(Box::new(|_: &CanFrame| true));

    for (id, payload) in records {
        let payload = &payload[..payload.len().min(8)];
        let _ = bus.process_can(id, payload);
    }
});
