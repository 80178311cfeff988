#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::inner_enum;

/// Maximum encoded payload size of one logical message.
pub const MAX_PAYLOAD: usize = 0xFFFF;

/// Header flags byte of a Compound record
///
/// Bit layout: `Bit(7) Byte(6) CmdStr(5) CmdInt(4) ValStr(3) ValInt(2) SizeEx(1) Extends(0)`.
///
/// `SizeEx` widens every length and integer value field from 1 to 2/4 bytes. `Extends`
/// marks a header that is followed by an explicit total-payload-size field because the
/// message continues in `CompoundExt` records.
#[derive(Clone, Copy, PartialEq)]
pub struct Flags(u8);

impl Flags {
    fn get(&self, position: u8) -> bool {
        (self.0 >> position) & 1 != 0
    }

    fn set(&mut self, position: u8, value: bool) {
        if value {
            self.0 |= 1 << position;
        } else {
            self.0 &= !(1 << position);
        }
    }

    pub fn bit(&self) -> bool {
        self.get(7)
    }

    pub fn set_bit(&mut self, value: bool) {
        self.set(7, value);
    }

    pub fn byte_tag(&self) -> bool {
        self.get(6)
    }

    pub fn set_byte_tag(&mut self, value: bool) {
        self.set(6, value);
    }

    pub fn cmd_str(&self) -> bool {
        self.get(5)
    }

    pub fn set_cmd_str(&mut self, value: bool) {
        self.set(5, value);
    }

    pub fn cmd_int(&self) -> bool {
        self.get(4)
    }

    pub fn set_cmd_int(&mut self, value: bool) {
        self.set(4, value);
    }

    pub fn val_str(&self) -> bool {
        self.get(3)
    }

    pub fn set_val_str(&mut self, value: bool) {
        self.set(3, value);
    }

    pub fn val_int(&self) -> bool {
        self.get(2)
    }

    pub fn set_val_int(&mut self, value: bool) {
        self.set(2, value);
    }

    pub fn size_ex(&self) -> bool {
        self.get(1)
    }

    pub fn set_size_ex(&mut self, value: bool) {
        self.set(1, value);
    }

    pub fn extends(&self) -> bool {
        self.get(0)
    }

    pub fn set_extends(&mut self, value: bool) {
        self.set(0, value);
    }
}

impl From<u8> for Flags {
    fn from(b: u8) -> Self {
        Self(b)
    }
}

impl From<Flags> for u8 {
    fn from(f: Flags) -> Self {
        f.0
    }
}

impl From<&Flags> for u8 {
    fn from(f: &Flags) -> Self {
        f.0
    }
}

impl crate::std::fmt::Debug for Flags {
    fn fmt(&self, f: &mut crate::std::fmt::Formatter<'_>) -> crate::std::fmt::Result {
        write!(f, "Flags({:#010b})", self.0)
    }
}

/// Command field of a payload record.
///
/// The canonical form is the 32-bit FNV-1a hash of the command name; the string form is
/// rare and only used for human-readable transport. The engine never converts between the
/// two.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub enum Command {
    #[default]
    None,
    Int(u32),
    Str(Vec<u8>),
}

inner_enum!(Command, Int, u32);
inner_enum!(Command, Str, Vec<u8>);

impl Command {
    /// Gets whether no command field is present.
    pub fn is_none(&self) -> bool {
        matches!(self, Command::None)
    }
}

/// Value field of a payload record.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub enum Value {
    #[default]
    None,
    Int(i32),
    Str(Vec<u8>),
}

inner_enum!(Value, Int, i32);
inner_enum!(Value, Str, Vec<u8>);

impl Value {
    /// Gets whether no value field is present.
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }
}

/// One logical message payload.
///
/// Built by the frame factories in [bus](crate::bus) and decoded by the
/// [FrameReader](crate::FrameReader). All fields are optional; an empty record on a
/// request is a ping. Every builder method re-checks the encoded size and rejects a
/// mutation that would push it past [MAX_PAYLOAD], leaving the record unchanged.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Data {
    pub(crate) bit: bool,
    pub(crate) byte: Option<u8>,
    pub(crate) command: Command,
    pub(crate) value: Value,
    pub(crate) size_ex: bool,
}

impl Data {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the response-required bit.
    pub fn bit(&self) -> bool {
        self.bit
    }

    /// Gets the message-type tag byte.
    pub fn byte(&self) -> Option<u8> {
        self.byte
    }

    /// Gets the command field.
    pub fn command(&self) -> &Command {
        &self.command
    }

    /// Gets the value field.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Gets whether length and integer value fields use their widened encoding.
    pub fn size_ex(&self) -> bool {
        self.size_ex
    }

    /// Gets whether the record carries no field at all (a ping once on the wire).
    pub fn is_empty(&self) -> bool {
        !self.bit && self.byte.is_none() && self.command.is_none() && self.value.is_none()
    }

    /// Sets the response-required bit.
    pub fn set_bit(&mut self, bit: bool) {
        self.bit = bit;
    }

    /// Sets the message-type tag byte. The tag lives in the header, so the payload
    /// size cannot change.
    pub fn set_byte(&mut self, byte: u8) {
        self.byte = Some(byte);
    }

    /// Sets the command field to a 32-bit hash.
    pub fn set_command_int(&mut self, command: u32) -> crate::Result<()> {
        self.try_set(Command::Int(command), self.value.clone(), self.size_ex)
    }

    /// Sets the command field to a raw name.
    pub fn set_command_str(&mut self, command: &[u8]) -> crate::Result<()> {
        let size_ex = self.size_ex || command.len() > 0xFF;
        self.try_set(Command::Str(command.to_vec()), self.value.clone(), size_ex)
    }

    /// Sets the value field to a signed integer.
    ///
    /// Values outside `[-128, 127]` switch the record to the widened encoding.
    pub fn set_value_int(&mut self, value: i32) -> crate::Result<()> {
        let size_ex = self.size_ex || !(-128..=127).contains(&value);
        self.try_set(self.command.clone(), Value::Int(value), size_ex)
    }

    /// Sets the value field to a raw string.
    pub fn set_value_str(&mut self, value: &[u8]) -> crate::Result<()> {
        let size_ex = self.size_ex || value.len() > 0xFF;
        self.try_set(self.command.clone(), Value::Str(value.to_vec()), size_ex)
    }

    /// Gets the encoded payload size: every field that follows the Compound header.
    pub fn payload_size(&self) -> usize {
        Self::size_of(&self.command, &self.value, self.size_ex)
    }

    /// Synthesizes the header flags byte. `Extends` is owned by the writer.
    pub fn flags(&self) -> Flags {
        let mut flags = Flags(0);
        flags.set_bit(self.bit);
        flags.set_byte_tag(self.byte.is_some());
        match self.command {
            Command::Int(_) => flags.set_cmd_int(true),
            Command::Str(_) => flags.set_cmd_str(true),
            Command::None => (),
        }
        match self.value {
            Value::Int(_) => flags.set_val_int(true),
            Value::Str(_) => flags.set_val_str(true),
            Value::None => (),
        }
        flags.set_size_ex(self.size_ex);
        flags
    }

    fn try_set(&mut self, command: Command, value: Value, size_ex: bool) -> crate::Result<()> {
        if Self::size_of(&command, &value, size_ex) > MAX_PAYLOAD {
            return Err(crate::Error::failure(format!(
                "encoded payload exceeds {MAX_PAYLOAD} bytes"
            )));
        }

        self.command = command;
        self.value = value;
        self.size_ex = size_ex;

        Ok(())
    }

    fn size_of(command: &Command, value: &Value, size_ex: bool) -> usize {
        let mut size = 0usize;

        match command {
            Command::Int(_) => size += 4,
            Command::Str(s) => size += s.len() + 1,
            Command::None => (),
        }
        match value {
            Value::Int(_) => size += if size_ex { 4 } else { 1 },
            Value::Str(s) => size += s.len() + 1,
            Value::None => (),
        }

        size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_data() {
        let data = Data::new();
        assert!(data.is_empty());
        assert_eq!(data.payload_size(), 0);
        assert_eq!(u8::from(data.flags()), 0);
    }

    #[test]
    fn test_flags_layout() {
        let mut data = Data::new();
        data.set_bit(true);
        data.set_command_int(0xdead_beef).unwrap();
        data.set_value_str(b"X4").unwrap();

        // Bit | CmdInt | ValStr
        assert_eq!(u8::from(data.flags()), 0b1001_1000);
    }

    #[test]
    fn test_wide_value_sets_size_ex() {
        let mut data = Data::new();
        data.set_value_int(127).unwrap();
        assert!(!data.size_ex());
        assert_eq!(data.payload_size(), 1);

        data.set_value_int(128).unwrap();
        assert!(data.size_ex());
        assert_eq!(data.payload_size(), 4);

        // Narrow values never shrink the record back
        data.set_value_int(5).unwrap();
        assert!(data.size_ex());
    }

    #[test]
    fn test_size_cap_rejected() {
        let mut data = Data::new();
        let long = vec![b'a'; MAX_PAYLOAD];
        assert!(data.set_value_str(&long).is_err());
        assert!(data.value().is_none());

        let fits = vec![b'a'; MAX_PAYLOAD - 1];
        assert!(data.set_value_str(&fits).is_ok());
        // No room left for a command on top
        assert!(data.set_command_int(1).is_err());
        assert!(data.command().is_none());
    }

    #[test]
    fn test_variant_accessors() {
        let mut data = Data::new();
        data.set_command_int(0x1234).unwrap();
        data.set_value_str(b"ok").unwrap();

        assert!(data.command().is_int());
        assert_eq!(data.command().as_int().unwrap(), &0x1234);
        assert_eq!(data.value().as_str().unwrap().as_slice(), b"ok");
        assert!(data.value().as_int().is_err());
    }
}
