#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::{CanFrame, CanId, Data, Flags, PacketType, ProtocolError, Value};

/// Default reassembly buffer capacity per reader slot.
pub const READER_BUFFER: usize = 1000;

/// Outcome of feeding one transport record into a reader.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ReadOutcome {
    /// The record was consumed, the message is not complete yet
    Pending,
    /// A message completed; take it with [FrameReader::take]
    Received,
}

/// A completed message with its source address.
#[derive(Clone, Debug, PartialEq)]
pub struct PacketInfo {
    pub number: u8,
    pub serial: u16,
    pub request: bool,
    pub data: Data,
}

impl PacketInfo {
    /// Gets whether the record carried no payload fields (a ping).
    pub fn is_ping(&self) -> bool {
        self.data.is_empty()
    }
}

// Header state carried between the first record and its continuations
#[derive(Clone, Debug)]
struct Partial {
    number: u8,
    serial: u16,
    request: bool,
    flags: Flags,
    byte: Option<u8>,
    cmd_len: usize,
    val_len: usize,
    data_size: usize,
}

/// Stateful reassembler for the records of one source module.
///
/// The reader is an explicit state machine: idle, collecting continuations, or poisoned.
/// A protocol error poisons the slot, which then silently discards `CompoundExt` records
/// until a fresh first record arrives. A completed message stays owned by the reader until
/// the engine takes it; records arriving in that window are rejected with
/// [ProtocolError::DataInUse].
pub struct FrameReader {
    buf: Vec<u8>,
    fill: usize,
    partial: Option<Partial>,
    completed: Option<PacketInfo>,
    discard_extended: bool,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new(READER_BUFFER)
    }
}

impl FrameReader {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
            fill: 0,
            partial: None,
            completed: None,
            discard_extended: false,
        }
    }

    /// Drops all reassembly state.
    pub fn clear(&mut self) {
        self.fill = 0;
        self.partial = None;
        self.completed = None;
        self.discard_extended = false;
    }

    /// Gets whether a reassembly is in progress.
    pub fn is_used(&self) -> bool {
        self.partial.is_some()
    }

    /// Gets whether the in-progress reassembly belongs to the source in `id`.
    pub fn for_module(&self, id: u32) -> bool {
        match &self.partial {
            Some(partial) => {
                partial.number == CanId::read_number(id)
                    && partial.serial == CanId::read_serial(id)
            }
            None => false,
        }
    }

    /// Takes the completed message, freeing the slot.
    pub fn take(&mut self) -> Option<PacketInfo> {
        self.completed.take()
    }

    /// Feeds one transport record.
    pub fn accept(&mut self, frame: &CanFrame) -> Result<ReadOutcome, ProtocolError> {
        self.accept_raw(frame.id, frame.payload())
    }

    /// Feeds one transport record given as a raw identifier and payload.
    pub fn accept_raw(&mut self, id: u32, payload: &[u8]) -> Result<ReadOutcome, ProtocolError> {
        if !CanId::is_v2(id) {
            return Err(ProtocolError::UnknownVersion);
        }

        if self.discard_extended {
            if CanId::packet_type(id) == PacketType::CompoundExt {
                return Ok(ReadOutcome::Pending);
            }
            self.discard_extended = false;
        }

        if self.completed.is_some() {
            return Err(ProtocolError::DataInUse);
        }

        match self.process(id, payload) {
            Ok(ReadOutcome::Received) => {
                self.reset_stream();
                Ok(ReadOutcome::Received)
            }
            Ok(ReadOutcome::Pending) => Ok(ReadOutcome::Pending),
            Err(err) => {
                self.discard_extended = true;
                self.reset_stream();
                Err(err)
            }
        }
    }

    fn reset_stream(&mut self) {
        self.fill = 0;
        self.partial = None;
    }

    fn process(&mut self, id: u32, payload: &[u8]) -> Result<ReadOutcome, ProtocolError> {
        let rest: &[u8];

        if self.partial.is_none() {
            let number = CanId::read_number(id);
            let serial = CanId::read_serial(id);
            let request = CanId::read_request(id);

            if (id & crate::CAN_ID_RTR) != 0 {
                self.completed = Some(PacketInfo {
                    number,
                    serial,
                    request,
                    data: Data::new(),
                });
                return Ok(ReadOutcome::Received);
            }

            match CanId::packet_type(id) {
                PacketType::Basic => return self.read_basic(payload, number, serial, request),
                PacketType::Compound => {
                    let (partial, consumed) =
                        parse_compound_header(payload, number, serial, request)
                            .ok_or(ProtocolError::CompoundDecode)?;
                    self.partial = Some(partial);
                    rest = &payload[consumed..];
                }
                _ => return Err(ProtocolError::ExtensionUnexpected),
            }
        } else {
            if CanId::packet_type(id) != PacketType::CompoundExt {
                return Err(ProtocolError::ExtensionMissing);
            }
            // A continuation from the opposite direction is not ours to consume
            if self.partial.as_ref().map(|p| p.request) != Some(CanId::read_request(id)) {
                return Ok(ReadOutcome::Pending);
            }
            rest = payload;
        }

        if self.fill + rest.len() > self.buf.len() {
            return Err(ProtocolError::BufferOverflow);
        }
        self.buf[self.fill..self.fill + rest.len()].copy_from_slice(rest);
        self.fill += rest.len();

        let data_size = self.partial.as_ref().map(|p| p.data_size).unwrap_or(0);
        if self.fill == data_size {
            self.finish()
        } else if self.fill > data_size {
            Err(ProtocolError::PayloadOverflow)
        } else {
            Ok(ReadOutcome::Pending)
        }
    }

    fn read_basic(
        &mut self,
        payload: &[u8],
        number: u8,
        serial: u16,
        request: bool,
    ) -> Result<ReadOutcome, ProtocolError> {
        let size_ex = match payload.len() {
            5 => false,
            8 => true,
            _ => return Err(ProtocolError::BasicDecode),
        };

        let command = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let value = if size_ex {
            i32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]])
        } else {
            payload[4] as i8 as i32
        };

        let mut data = Data::new();
        data.command = crate::Command::Int(command);
        data.value = Value::Int(value);
        data.size_ex = size_ex;

        self.completed = Some(PacketInfo {
            number,
            serial,
            request,
            data,
        });

        Ok(ReadOutcome::Received)
    }

    fn finish(&mut self) -> Result<ReadOutcome, ProtocolError> {
        let partial = match self.partial.take() {
            Some(partial) => partial,
            None => return Err(ProtocolError::PayloadUnderflow),
        };

        let mut cursor = Cursor::new(&self.buf[..self.fill]);
        let mut data = Data::new();
        data.bit = partial.flags.bit();
        data.byte = partial.byte;
        data.size_ex = partial.flags.size_ex();

        if partial.flags.cmd_int() {
            let cmd = cursor.le(4).ok_or(ProtocolError::PayloadUnderflow)?;
            data.command = crate::Command::Int(cmd);
        }
        if partial.flags.val_int() {
            let bytes = if partial.flags.size_ex() { 4 } else { 1 };
            let raw = cursor.le(bytes).ok_or(ProtocolError::PayloadUnderflow)?;
            let value = if partial.flags.size_ex() {
                raw as i32
            } else {
                raw as u8 as i8 as i32
            };
            data.value = Value::Int(value);
        }
        if partial.flags.cmd_str() {
            let bytes = cursor
                .string(partial.cmd_len)
                .ok_or(ProtocolError::PayloadUnderflow)?;
            data.command = crate::Command::Str(bytes.to_vec());
        }
        if partial.flags.val_str() {
            let bytes = cursor
                .string(partial.val_len)
                .ok_or(ProtocolError::PayloadUnderflow)?;
            data.value = Value::Str(bytes.to_vec());
        }

        self.completed = Some(PacketInfo {
            number: partial.number,
            serial: partial.serial,
            request: partial.request,
            data,
        });

        Ok(ReadOutcome::Received)
    }
}

fn parse_compound_header(
    payload: &[u8],
    number: u8,
    serial: u16,
    request: bool,
) -> Option<(Partial, usize)> {
    let mut cursor = Cursor::new(payload);

    let flags = Flags::from(cursor.le(1)? as u8);
    let len_bytes = if flags.size_ex() { 2 } else { 1 };

    let byte = if flags.byte_tag() {
        Some(cursor.le(1)? as u8)
    } else {
        None
    };
    let cmd_len = if flags.cmd_str() {
        cursor.le(len_bytes)? as usize
    } else {
        0
    };
    let val_len = if flags.val_str() {
        cursor.le(len_bytes)? as usize
    } else {
        0
    };

    let data_size = if flags.extends() {
        cursor.le(len_bytes)? as usize
    } else {
        payload.len() - cursor.pos
    };

    let consumed = cursor.pos;
    Some((
        Partial {
            number,
            serial,
            request,
            flags,
            byte,
            cmd_len,
            val_len,
            data_size,
        },
        consumed,
    ))
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn le(&mut self, bytes: usize) -> Option<u32> {
        if self.pos + bytes > self.buf.len() {
            return None;
        }
        let mut value = 0u32;
        for i in 0..bytes {
            value |= (self.buf[self.pos + i] as u32) << (i * 8);
        }
        self.pos += bytes;
        Some(value)
    }

    // A wire string is `length` bytes followed by NUL
    fn string(&mut self, length: usize) -> Option<&'a [u8]> {
        if self.pos + length + 1 > self.buf.len() || self.buf[self.pos + length] != 0 {
            return None;
        }
        let bytes = &self.buf[self.pos..self.pos + length];
        self.pos += length + 1;
        Some(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{hash, Command, FrameWriter};

    fn round_trip(data: &Data, number: u8, serial: u16, request: bool) -> PacketInfo {
        let mut writer = FrameWriter::new(data, number, serial, request);
        let mut reader = FrameReader::default();

        let mut outcome = ReadOutcome::Pending;
        while let Some(frame) = writer.next_frame() {
            outcome = reader.accept(&frame).expect("frame accepted");
        }
        assert_eq!(outcome, ReadOutcome::Received);
        reader.take().expect("packet completed")
    }

    #[test]
    fn test_basic_round_trip() {
        let mut data = Data::new();
        data.set_command_int(0xdead_beef).unwrap();
        data.set_value_int(5).unwrap();

        let info = round_trip(&data, 3, 0, true);
        assert_eq!(info.number, 3);
        assert_eq!(info.serial, 0);
        assert!(info.request);
        assert_eq!(info.data, data);
    }

    #[test]
    fn test_compound_round_trip() {
        let mut data = Data::new();
        data.set_bit(true);
        data.set_byte(6);
        data.set_command_int(hash::fnv1a("battery")).unwrap();
        data.set_value_int(500).unwrap();

        let info = round_trip(&data, 4, 123, true);
        assert_eq!(info.serial, 123);
        assert_eq!(info.data, data);
    }

    #[test]
    fn test_string_round_trip() {
        let mut data = Data::new();
        data.set_command_str(b"name").unwrap();
        data.set_value_str(b"the quick brown fox jumps over the lazy dog")
            .unwrap();

        let info = round_trip(&data, 1, 0, false);
        assert_eq!(info.data.command(), &Command::Str(b"name".to_vec()));
        assert_eq!(info.data, data);
        assert!(!info.request);
    }

    #[test]
    fn test_decode_reencode_is_identical() {
        let mut data = Data::new();
        data.set_bit(true);
        data.set_byte(6);
        data.set_command_int(hash::fnv1a("battery")).unwrap();
        data.set_value_str(b"a string that spans several records")
            .unwrap();

        let mut writer = FrameWriter::new(&data, 4, 123, true);
        let mut reader = FrameReader::default();
        let mut wire = Vec::new();
        while let Some(frame) = writer.next_frame() {
            wire.push((frame.id, frame.payload().to_vec()));
            reader.accept(&frame).unwrap();
        }

        let info = reader.take().unwrap();
        let mut rewriter = FrameWriter::new(&info.data, info.number, info.serial, info.request);
        let mut rewire = Vec::new();
        while let Some(frame) = rewriter.next_frame() {
            rewire.push((frame.id, frame.payload().to_vec()));
        }

        assert_eq!(wire, rewire);
    }

    #[test]
    fn test_ping_record() {
        let mut reader = FrameReader::default();
        let frame = CanFrame::ping(4, 123, true);
        assert_eq!(reader.accept(&frame), Ok(ReadOutcome::Received));

        let info = reader.take().unwrap();
        assert!(info.is_ping());
        assert_eq!(info.number, 4);
        assert_eq!(info.serial, 123);
    }

    #[test]
    fn test_v1_frame_rejected() {
        let mut reader = FrameReader::default();
        let err = reader.accept_raw(0x8000_0803, &[0, 0, 0, 0, 0]);
        assert_eq!(err, Err(ProtocolError::UnknownVersion));
    }

    #[test]
    fn test_first_record_must_not_be_extension() {
        let mut id = CanId::base(3, 0);
        id.set_type_bits(PacketType::CompoundExt as u32);

        let mut reader = FrameReader::default();
        let err = reader.accept_raw(id.into(), &[1, 2, 3]);
        assert_eq!(err, Err(ProtocolError::ExtensionUnexpected));
    }

    #[test]
    fn test_basic_bad_length() {
        let mut id = CanId::base(3, 0);
        id.set_type_bits(PacketType::Basic as u32);

        let mut reader = FrameReader::default();
        let err = reader.accept_raw(id.into(), &[1, 2, 3]);
        assert_eq!(err, Err(ProtocolError::BasicDecode));
    }

    #[test]
    fn test_poisoned_slot_discards_extensions() {
        let mut data = Data::new();
        data.set_command_int(1).unwrap();
        data.set_value_str(&[b'x'; 40]).unwrap();

        let mut writer = FrameWriter::new(&data, 3, 0, true);
        let frames: Vec<_> = core::iter::from_fn(|| writer.next_frame()).collect();
        assert!(frames.len() > 2);

        let mut reader = FrameReader::default();
        // Skip the first record: the continuation cannot open a message
        assert_eq!(
            reader.accept(&frames[1]),
            Err(ProtocolError::ExtensionUnexpected)
        );
        // Remaining continuations are silently discarded
        for frame in &frames[2..] {
            assert_eq!(reader.accept(frame), Ok(ReadOutcome::Pending));
        }
        // A fresh first record recovers the slot
        let mut small = Data::new();
        small.set_command_int(2).unwrap();
        small.set_value_int(1).unwrap();
        let mut writer = FrameWriter::new(&small, 3, 0, true);
        assert_eq!(
            reader.accept(&writer.next_frame().unwrap()),
            Ok(ReadOutcome::Received)
        );
    }

    #[test]
    fn test_missing_extension_poisons() {
        let mut data = Data::new();
        data.set_command_int(1).unwrap();
        data.set_value_str(&[b'x'; 40]).unwrap();

        let mut writer = FrameWriter::new(&data, 3, 0, true);
        let first = writer.next_frame().unwrap();

        let mut reader = FrameReader::default();
        assert_eq!(reader.accept(&first), Ok(ReadOutcome::Pending));

        // A new first record while collecting is a protocol error
        let mut small = Data::new();
        small.set_command_int(2).unwrap();
        small.set_value_int(1).unwrap();
        let mut writer = FrameWriter::new(&small, 3, 0, true);
        let basic = writer.next_frame().unwrap();
        assert_eq!(reader.accept(&basic), Err(ProtocolError::ExtensionMissing));
    }

    #[test]
    fn test_buffer_overflow() {
        let mut data = Data::new();
        data.set_command_int(1).unwrap();
        data.set_value_str(&[b'x'; 64]).unwrap();

        let mut writer = FrameWriter::new(&data, 3, 0, true);
        let mut reader = FrameReader::new(16);

        let mut result = Ok(ReadOutcome::Pending);
        while let Some(frame) = writer.next_frame() {
            result = reader.accept(&frame);
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result, Err(ProtocolError::BufferOverflow));
    }

    #[test]
    fn test_completed_data_in_use() {
        let mut data = Data::new();
        data.set_command_int(1).unwrap();
        data.set_value_int(2).unwrap();

        let mut writer = FrameWriter::new(&data, 3, 0, true);
        let frame = writer.next_frame().unwrap();

        let mut reader = FrameReader::default();
        assert_eq!(reader.accept(&frame), Ok(ReadOutcome::Received));
        assert_eq!(reader.accept(&frame), Err(ProtocolError::DataInUse));

        reader.take().unwrap();
        assert_eq!(reader.accept(&frame), Ok(ReadOutcome::Received));
    }

    #[test]
    fn test_missing_nul_is_underflow() {
        // Hand-built compound record claiming a 2-byte string without its terminator
        let mut id = CanId::base(3, 0);
        id.set_type_bits(PacketType::Compound as u32);
        id.set_request(true);

        // flags: ValStr, valStrLen=2, then "XY" and a non-NUL byte
        let payload = [0b0000_1000, 0x02, b'X', b'Y', 0x07];
        let mut reader = FrameReader::default();
        let err = reader.accept_raw(id.into(), &payload);
        assert_eq!(err, Err(ProtocolError::PayloadUnderflow));
    }
}
