#![no_main]

use libfuzzer_sys::fuzz_target;

use totembus::{Command, Data, FrameReader, FrameWriter, ReadOutcome, Value};

// Every record the builder accepts must survive the writer/reader round trip.
fuzz_target!(|input: (bool, Option<u8>, Command, Value, u8, u16)| {
    let (bit, byte, command, value, number, serial) = input;

    let mut data = Data::new();
    data.set_bit(bit);
    if let Some(byte) = byte {
        data.set_byte(byte);
    }
    let accepted = match &command {
        Command::None => Ok(()),
        Command::Int(cmd) => data.set_command_int(*cmd),
        Command::Str(name) => data.set_command_str(name),
    }
    .and(match &value {
        Value::None => Ok(()),
        Value::Int(val) => data.set_value_int(*val),
        Value::Str(bytes) => data.set_value_str(bytes),
    });
    if accepted.is_err() {
        return;
    }

    let serial = serial & 0x7FFF;
    let mut writer = FrameWriter::new(&data, number, serial, true);
    let mut reader = FrameReader::new(0x1_0000);

    let mut outcome = ReadOutcome::Pending;
    while let Some(frame) = writer.next_frame() {
        outcome = reader.accept(&frame).expect("writer output accepted");
    }

    assert_eq!(outcome, ReadOutcome::Received);
    let info = reader.take().expect("completed record");
    assert_eq!(info.number, number);
    assert_eq!(info.serial, serial);
    assert_eq!(info.data, data);
});
