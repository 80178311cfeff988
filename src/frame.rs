use crate::std;
use std::fmt;

/// Extended-identifier marker, always set on v2 frames for legacy v1 compatibility.
pub const CAN_ID_EXTENDED: u32 = 0x8000_0000;
/// Remote-transmission-request marker; an RTR record with no payload is a ping.
pub const CAN_ID_RTR: u32 = 0x4000_0000;
/// Request flag: the record originates from the initiator side.
pub const CAN_ID_REQUEST: u32 = 0x0000_0100;

/// Largest addressable module number.
pub const NUMBER_MAX: u32 = 0xFF;
/// Largest addressable module serial.
pub const SERIAL_MAX: u32 = 0x7FFF;

bitfield! {
    /// Extended identifier layout of a v2 transport record
    ///
    /// | bits   | field                                    |
    /// |--------|------------------------------------------|
    /// | 31     | extended-id marker (always 1 in v2)      |
    /// | 30     | RTR (1 = ping)                           |
    /// | 28..14 | serial (0 = base-id form)                |
    /// | 13..11 | reserved, zero in v2                     |
    /// | 10..9  | packet type                              |
    /// | 8      | request flag (1 = from initiator)        |
    /// | 7..0   | module number                            |
    #[derive(Clone, Copy, PartialEq)]
    pub struct CanId(u32);
    u32;
    pub extended, set_extended: 31;
    pub rtr, set_rtr: 30;
    pub serial, set_serial: 28, 14;
    pub reserved, set_reserved: 13, 11;
    pub type_bits, set_type_bits: 10, 9;
    pub request, set_request: 8;
    pub number, set_number: 7, 0;
}

impl From<u32> for CanId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<CanId> for u32 {
    fn from(id: CanId) -> Self {
        id.0
    }
}

impl From<&CanId> for u32 {
    fn from(id: &CanId) -> Self {
        id.0
    }
}

impl CanId {
    /// Builds the base identifier addressing `(number, serial)`.
    ///
    /// A zero serial uses the base-id form (serial bits left clear); the extended marker
    /// stays set either way so that v2 detection remains meaningful on the wire.
    pub fn base(number: u8, serial: u16) -> Self {
        let mut id = Self(0);
        id.set_number(number as u32);
        if serial > 0 {
            id.set_serial(serial as u32 & SERIAL_MAX);
        }
        id.set_extended(true);
        id
    }

    /// Gets whether the raw identifier carries the v2 layout.
    ///
    /// Legacy v1 frames keep payload bits in 13..11; they are rejected by the reader.
    pub fn is_v2(id: u32) -> bool {
        (id & CAN_ID_EXTENDED) != 0 && (id & 0x3800) == 0
    }

    /// Gets the packet type bits of a raw identifier.
    pub fn packet_type(id: u32) -> PacketType {
        (((id >> 9) & 0b11) as u8).into()
    }

    /// Gets the module number of a raw identifier.
    pub fn read_number(id: u32) -> u8 {
        (id & NUMBER_MAX) as u8
    }

    /// Gets the module serial of a raw identifier; standard (11-bit) identifiers have none.
    pub fn read_serial(id: u32) -> u16 {
        if (id & CAN_ID_EXTENDED) == 0 {
            return 0;
        }
        ((id & 0x1FFF_C000) >> 14) as u16
    }

    /// Gets the request flag of a raw identifier; standard identifiers are always requests.
    pub fn read_request(id: u32) -> bool {
        (id & CAN_ID_EXTENDED) == 0 || (id & CAN_ID_REQUEST) != 0
    }
}

impl fmt::Debug for CanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CanId({:#010x})", self.0)
    }
}

/// Packet type carried in identifier bits 10..9.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub enum PacketType {
    /// Single-frame command+value record
    Basic = 0b00,
    /// Self-describing first record of a message
    Compound = 0b01,
    /// Continuation record of a Compound message
    CompoundExt = 0b10,
    /// Variant to represent the reserved bit pattern
    Reserved = 0b11,
}

impl From<u8> for PacketType {
    fn from(b: u8) -> Self {
        match b & 0b11 {
            0b00 => Self::Basic,
            0b01 => Self::Compound,
            0b10 => Self::CompoundExt,
            _ => Self::Reserved,
        }
    }
}

impl From<PacketType> for u8 {
    fn from(t: PacketType) -> Self {
        t as u8
    }
}

impl From<PacketType> for &'static str {
    fn from(t: PacketType) -> Self {
        match t {
            PacketType::Basic => "Basic",
            PacketType::Compound => "Compound",
            PacketType::CompoundExt => "CompoundExt",
            PacketType::Reserved => "Reserved",
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", <&'static str>::from(*self))
    }
}

/// One 8-byte transport record with its identifier.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CanFrame {
    pub id: u32,
    pub data: [u8; 8],
    pub len: u8,
}

impl CanFrame {
    pub fn new(id: u32, data: &[u8]) -> Self {
        let mut frame = Self {
            id,
            data: [0u8; 8],
            len: data.len().min(8) as u8,
        };
        frame.data[..frame.len as usize].copy_from_slice(&data[..frame.len as usize]);
        frame
    }

    /// Builds the zero-payload RTR record used for reachability pings.
    pub fn ping(number: u8, serial: u16, request: bool) -> Self {
        let mut id = CanId::base(number, serial);
        id.set_rtr(true);
        id.set_request(request);
        Self {
            id: id.into(),
            data: [0u8; 8],
            len: 0,
        }
    }

    /// Gets the valid payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    pub fn is_extended(&self) -> bool {
        (self.id & CAN_ID_EXTENDED) != 0
    }

    pub fn is_rtr(&self) -> bool {
        (self.id & CAN_ID_RTR) != 0
    }
}

/// Gets whether a module number is addressable.
pub fn is_valid_number(number: u32) -> bool {
    number <= NUMBER_MAX
}

/// Gets whether a module serial is addressable.
pub fn is_valid_serial(serial: u32) -> bool {
    serial <= SERIAL_MAX
}
