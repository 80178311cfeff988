use crate::{CanFrame, CanId, Command, Data, PacketType, Value};

const FRAME_CAPACITY: usize = 8;

// Streaming order of the payload fields behind the Compound header
const FIELD_CMD_INT: usize = 0;
const FIELD_VAL_INT: usize = 1;
const FIELD_CMD_STR: usize = 2;
const FIELD_VAL_STR: usize = 3;
const FIELD_DONE: usize = 4;

/// Serialises one [Data] record into successive 8-byte transport records.
///
/// The first record is `Basic` when the payload is exactly a command hash plus an integer
/// value, `Compound` otherwise. A Compound message that does not fit one record continues
/// in `CompoundExt` records; the writer keeps a per-field resume offset so that partial
/// writes across record boundaries stay consistent.
///
/// ```rust
/// use totembus::{Data, FrameWriter};
///
/// let mut data = Data::new();
/// data.set_command_int(0xdead_beef).unwrap();
/// data.set_value_int(5).unwrap();
///
/// let mut writer = FrameWriter::new(&data, 3, 0, true);
/// let frame = writer.next_frame().unwrap();
/// assert_eq!(frame.payload(), &[0xef, 0xbe, 0xad, 0xde, 0x05]);
/// assert!(writer.next_frame().is_none());
/// ```
pub struct FrameWriter<'a> {
    data: &'a Data,
    id: CanId,
    started: bool,
    field: usize,
    offset: usize,
}

impl<'a> FrameWriter<'a> {
    pub fn new(data: &'a Data, number: u8, serial: u16, request: bool) -> Self {
        let mut id = CanId::base(number, serial);
        id.set_request(request);

        Self {
            data,
            id,
            started: false,
            field: FIELD_CMD_INT,
            offset: 0,
        }
    }

    /// Gets whether the identifier carries the request flag.
    pub fn is_request(&self) -> bool {
        self.id.request()
    }

    /// Produces the next transport record, or `None` once the record is exhausted.
    pub fn next_frame(&mut self) -> Option<CanFrame> {
        if !self.started {
            self.started = true;
            return Some(self.first_frame());
        }

        if self.field == FIELD_DONE {
            return None;
        }

        let mut buf = [0u8; FRAME_CAPACITY];
        let len = self.stream_fields(&mut buf, 0);
        if len == 0 {
            self.field = FIELD_DONE;
            return None;
        }

        Some(self.frame(PacketType::CompoundExt, &buf, len))
    }

    fn first_frame(&mut self) -> CanFrame {
        let mut buf = [0u8; FRAME_CAPACITY];

        if self.is_basic() {
            let mut pos = 0;
            for field in [FIELD_CMD_INT, FIELD_VAL_INT] {
                for offset in 0..self.field_len(field) {
                    buf[pos] = self.field_byte(field, offset);
                    pos += 1;
                }
            }
            self.field = FIELD_DONE;
            return self.frame(PacketType::Basic, &buf, pos);
        }

        let mut flags = self.data.flags();
        let len_bytes = if self.data.size_ex() { 2 } else { 1 };
        let payload = self.data.payload_size();

        let mut pos = 1;
        if let Some(byte) = self.data.byte() {
            buf[pos] = byte;
            pos += 1;
        }
        if let Command::Str(cmd) = self.data.command() {
            pos += put_le(&mut buf[pos..], cmd.len() as u32, len_bytes);
        }
        if let Value::Str(val) = self.data.value() {
            pos += put_le(&mut buf[pos..], val.len() as u32, len_bytes);
        }

        // Header done; announce the total size only when the payload spills over
        if FRAME_CAPACITY - pos < payload {
            flags.set_extends(true);
            pos += put_le(&mut buf[pos..], payload as u32, len_bytes);
        }
        buf[0] = flags.into();

        let len = self.stream_fields(&mut buf, pos);
        self.frame(PacketType::Compound, &buf, len)
    }

    // Basic applies iff exactly {CmdInt, ValInt} are set, SizeEx aside
    fn is_basic(&self) -> bool {
        !self.data.bit()
            && self.data.byte().is_none()
            && self.data.command().is_int()
            && self.data.value().is_int()
    }

    fn stream_fields(&mut self, buf: &mut [u8; FRAME_CAPACITY], start: usize) -> usize {
        let mut pos = start;

        while self.field < FIELD_DONE && pos < FRAME_CAPACITY {
            if self.offset >= self.field_len(self.field) {
                self.field += 1;
                self.offset = 0;
                continue;
            }
            buf[pos] = self.field_byte(self.field, self.offset);
            pos += 1;
            self.offset += 1;
        }

        // Flush trailing empty fields so an exactly-filled record is the last one
        while self.field < FIELD_DONE && self.field_len(self.field) == self.offset {
            self.field += 1;
            self.offset = 0;
        }

        pos
    }

    fn field_len(&self, field: usize) -> usize {
        match field {
            FIELD_CMD_INT => match self.data.command() {
                Command::Int(_) => 4,
                _ => 0,
            },
            FIELD_VAL_INT => match self.data.value() {
                Value::Int(_) => {
                    if self.data.size_ex() {
                        4
                    } else {
                        1
                    }
                }
                _ => 0,
            },
            FIELD_CMD_STR => match self.data.command() {
                Command::Str(s) => s.len() + 1,
                _ => 0,
            },
            FIELD_VAL_STR => match self.data.value() {
                Value::Str(s) => s.len() + 1,
                _ => 0,
            },
            _ => 0,
        }
    }

    fn field_byte(&self, field: usize, offset: usize) -> u8 {
        match field {
            FIELD_CMD_INT => match self.data.command() {
                Command::Int(cmd) => (cmd >> (offset * 8)) as u8,
                _ => 0,
            },
            FIELD_VAL_INT => match self.data.value() {
                Value::Int(value) => ((*value as u32) >> (offset * 8)) as u8,
                _ => 0,
            },
            FIELD_CMD_STR => match self.data.command() {
                Command::Str(s) => s.get(offset).copied().unwrap_or(0),
                _ => 0,
            },
            FIELD_VAL_STR => match self.data.value() {
                Value::Str(s) => s.get(offset).copied().unwrap_or(0),
                _ => 0,
            },
            _ => 0,
        }
    }

    fn frame(&self, packet_type: PacketType, buf: &[u8; FRAME_CAPACITY], len: usize) -> CanFrame {
        let mut id = self.id;
        id.set_type_bits(packet_type as u32);
        CanFrame::new(id.into(), &buf[..len])
    }
}

fn put_le(buf: &mut [u8], value: u32, bytes: usize) -> usize {
    for (i, slot) in buf.iter_mut().take(bytes).enumerate() {
        *slot = (value >> (i * 8)) as u8;
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash;

    #[test]
    fn test_basic_write() {
        let mut data = Data::new();
        data.set_command_int(0xdead_beef).unwrap();
        data.set_value_int(5).unwrap();

        let mut writer = FrameWriter::new(&data, 3, 0, true);
        let frame = writer.next_frame().unwrap();

        assert_eq!(frame.id, 0x8000_0103);
        assert_eq!(frame.payload(), &[0xef, 0xbe, 0xad, 0xde, 0x05]);
        assert!(writer.next_frame().is_none());
    }

    #[test]
    fn test_basic_wide_value() {
        let mut data = Data::new();
        data.set_command_int(1).unwrap();
        data.set_value_int(7842).unwrap();

        let mut writer = FrameWriter::new(&data, 4, 123, false);
        let frame = writer.next_frame().unwrap();

        // 4-byte command then 4-byte value, little-endian
        assert_eq!(
            frame.payload(),
            &[0x01, 0x00, 0x00, 0x00, 0xa2, 0x1e, 0x00, 0x00]
        );
        assert_eq!(CanId::packet_type(frame.id), PacketType::Basic);
        assert!(!CanId::read_request(frame.id));
        assert_eq!(CanId::read_serial(frame.id), 123);
    }

    #[test]
    fn test_compound_write_string_extends() {
        let mut data = Data::new();
        data.set_command_int(hash::fnv1a("name")).unwrap();
        data.set_value_str(b"X4").unwrap();

        let mut writer = FrameWriter::new(&data, 4, 7, true);

        let first = writer.next_frame().unwrap();
        assert_eq!(first.id, 0x8001_c304);
        assert_eq!(CanId::packet_type(first.id), PacketType::Compound);
        // CmdInt|ValStr with Extends: 2 header bytes leave 6 for a 7-byte payload
        assert_eq!(
            first.payload(),
            &[0b0001_1001, 0x02, 0x07, 0xe6, 0xbd, 0x39, 0x8d, b'X']
        );

        let second = writer.next_frame().unwrap();
        assert_eq!(CanId::packet_type(second.id), PacketType::CompoundExt);
        assert_eq!(second.payload(), &[b'4', 0x00]);

        assert!(writer.next_frame().is_none());
    }

    #[test]
    fn test_compound_read_record() {
        let mut data = Data::new();
        data.set_bit(true);
        data.set_value_int(hash::fnv1a("battery") as i32).unwrap();

        let mut writer = FrameWriter::new(&data, 4, 0, true);
        let frame = writer.next_frame().unwrap();

        // Bit|ValInt|SizeEx header, then the 4-byte hash as the value
        assert_eq!(frame.payload(), &[0b1000_0110, 0x8e, 0x0c, 0x6a, 0xfd]);
        assert!(writer.next_frame().is_none());
    }

    #[test]
    fn test_subscribe_is_compound() {
        let mut data = Data::new();
        data.set_byte(6);
        data.set_command_int(hash::fnv1a("battery")).unwrap();
        data.set_value_int(500).unwrap();

        let mut writer = FrameWriter::new(&data, 4, 0, true);
        let frame = writer.next_frame().unwrap();

        assert_eq!(CanId::packet_type(frame.id), PacketType::Compound);
        // Byte|CmdInt|ValInt|SizeEx|Extends header, tag byte; the 8-byte payload spills
        assert_eq!(frame.payload()[..2], [0b0101_0111, 6]);
    }

    #[test]
    fn test_long_string_streams_in_order() {
        let mut data = Data::new();
        data.set_command_int(1).unwrap();
        data.set_value_str(b"abcdefghijklmnopqrstuvwxyz").unwrap();

        let mut writer = FrameWriter::new(&data, 1, 0, true);

        let mut wire = Vec::new();
        let mut frames = 0;
        while let Some(frame) = writer.next_frame() {
            if frames > 0 {
                assert_eq!(CanId::packet_type(frame.id), PacketType::CompoundExt);
            }
            wire.extend_from_slice(frame.payload());
            frames += 1;
        }

        // flags, valStrLen, total size, then the streamed fields
        assert_eq!(wire[0], 0b0001_1001);
        assert_eq!(wire[1], 26);
        assert_eq!(wire[2], 4 + 26 + 1);
        assert_eq!(&wire[3..7], &[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(&wire[7..33], b"abcdefghijklmnopqrstuvwxyz");
        assert_eq!(wire[33], 0);
        assert_eq!(wire.len(), 34);
        assert_eq!(frames, 5);
    }
}
