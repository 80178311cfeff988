use crate::std;
use std::fmt;

use crate::{Command, PacketInfo, Value};

/// High-level classification of a completed record.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MessageType {
    /// Record did not classify; carried an unknown type tag
    Undefined = 0,
    /// Command with no argument, initiator to module
    WriteCommand = 1,
    /// Command with an integer argument
    WriteValue = 2,
    /// Command with a string argument
    WriteString = 3,
    /// Compact read: the target command rides in the value field
    ReadCommand = 4,
    /// Zero-payload reachability probe
    RequestPing = 5,
    /// Periodic delivery request; the value is the interval, -1 unsubscribes
    Subscribe = 6,
    /// Reply to a reachability probe
    ResponsePing = 7,
    /// Integer reply to a read
    ResponseValue = 8,
    /// String reply to a read
    ResponseString = 9,
    /// Positive acknowledgement of a write
    ResponseOk = 10,
    /// Negative acknowledgement, optionally carrying an error code
    ResponseFail = 11,
    /// Unsolicited integer push
    SendValue = 12,
    /// Unsolicited string push
    SendString = 13,
    /// Explicit request for an integer value
    RequestValue = 14,
    /// Explicit request for a string value
    RequestString = 15,
}

impl From<u8> for MessageType {
    fn from(b: u8) -> Self {
        match b {
            1 => Self::WriteCommand,
            2 => Self::WriteValue,
            3 => Self::WriteString,
            4 => Self::ReadCommand,
            5 => Self::RequestPing,
            6 => Self::Subscribe,
            7 => Self::ResponsePing,
            8 => Self::ResponseValue,
            9 => Self::ResponseString,
            10 => Self::ResponseOk,
            11 => Self::ResponseFail,
            12 => Self::SendValue,
            13 => Self::SendString,
            14 => Self::RequestValue,
            15 => Self::RequestString,
            _ => Self::Undefined,
        }
    }
}

impl From<MessageType> for u8 {
    fn from(m: MessageType) -> Self {
        m as u8
    }
}

impl From<MessageType> for &'static str {
    fn from(m: MessageType) -> &'static str {
        match m {
            MessageType::Undefined => "Undefined",
            MessageType::WriteCommand => "WriteCommand",
            MessageType::WriteValue => "WriteValue",
            MessageType::WriteString => "WriteString",
            MessageType::ReadCommand => "ReadCommand",
            MessageType::RequestPing => "RequestPing",
            MessageType::Subscribe => "Subscribe",
            MessageType::ResponsePing => "ResponsePing",
            MessageType::ResponseValue => "ResponseValue",
            MessageType::ResponseString => "ResponseString",
            MessageType::ResponseOk => "ResponseOk",
            MessageType::ResponseFail => "ResponseFail",
            MessageType::SendValue => "SendValue",
            MessageType::SendString => "SendString",
            MessageType::RequestValue => "RequestValue",
            MessageType::RequestString => "RequestString",
        }
    }
}

impl From<&MessageType> for &'static str {
    fn from(m: &MessageType) -> Self {
        (*m).into()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", <&'static str>::from(self))
    }
}

// Type tags honored on the wire; any other tag classifies as Undefined
const TAGGED_TYPES: [MessageType; 7] = [
    MessageType::Subscribe,
    MessageType::ResponseOk,
    MessageType::ResponseFail,
    MessageType::SendValue,
    MessageType::SendString,
    MessageType::RequestValue,
    MessageType::RequestString,
];

/// A classified message, borrowed from the completed record that produced it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Message<'a> {
    pub kind: MessageType,
    pub number: u8,
    pub serial: u16,
    pub command: u32,
    pub value: i32,
    pub string: Option<&'a [u8]>,
    pub response_req: bool,
}

impl<'a> Message<'a> {
    /// Classifies a completed record.
    pub fn classify(info: &'a PacketInfo) -> Self {
        let data = &info.data;

        let mut message = Message {
            kind: MessageType::Undefined,
            number: info.number,
            serial: info.serial,
            command: match data.command() {
                Command::Int(cmd) => *cmd,
                _ => 0,
            },
            value: 0,
            string: None,
            response_req: data.bit(),
        };

        if data.is_empty() {
            message.kind = if info.request {
                MessageType::RequestPing
            } else {
                MessageType::ResponsePing
            };
            message.response_req = info.request;
            return message;
        }

        if info.request && !data.command().is_int() && data.value().is_int() {
            message.kind = MessageType::ReadCommand;
            if let Value::Int(value) = data.value() {
                message.command = *value as u32;
            }
        } else if let Value::Int(value) = data.value() {
            message.kind = if info.request {
                MessageType::WriteValue
            } else {
                MessageType::ResponseValue
            };
            message.value = *value;
        } else if let Value::Str(string) = data.value() {
            message.kind = if info.request {
                MessageType::WriteString
            } else {
                MessageType::ResponseString
            };
            message.string = Some(string.as_slice());
        } else if info.request {
            message.kind = MessageType::WriteCommand;
        }

        if let Some(byte) = data.byte() {
            let tagged = MessageType::from(byte);
            message.kind = if TAGGED_TYPES.contains(&tagged) {
                tagged
            } else {
                MessageType::Undefined
            };
        }

        message
    }

    /// Gets the string payload interpreted as UTF-8.
    pub fn text(&self) -> crate::Result<&'a str> {
        match self.string {
            Some(bytes) => Ok(crate::std::str::from_utf8(bytes)?),
            None => Err(crate::Error::failure("message carries no string payload")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Data, FrameReader, FrameWriter, ReadOutcome};

    fn classify(data: Data, number: u8, serial: u16, request: bool) -> PacketInfo {
        let mut writer = FrameWriter::new(&data, number, serial, request);
        let mut reader = FrameReader::default();
        while let Some(frame) = writer.next_frame() {
            reader.accept(&frame).unwrap();
        }
        reader.take().unwrap()
    }

    #[test]
    fn test_ping_classification() {
        let mut reader = FrameReader::default();
        let frame = crate::CanFrame::ping(4, 0, true);
        assert_eq!(reader.accept(&frame), Ok(ReadOutcome::Received));
        let info = reader.take().unwrap();

        let message = Message::classify(&info);
        assert_eq!(message.kind, MessageType::RequestPing);
        assert!(message.response_req);

        let mut reader = FrameReader::default();
        let frame = crate::CanFrame::ping(4, 123, false);
        reader.accept(&frame).unwrap();
        let info = reader.take().unwrap();

        let message = Message::classify(&info);
        assert_eq!(message.kind, MessageType::ResponsePing);
        assert_eq!(message.serial, 123);
        assert!(!message.response_req);
    }

    #[test]
    fn test_compact_read_classification() {
        let mut data = Data::new();
        data.set_bit(true);
        data.set_value_int(crate::hash::fnv1a("battery") as i32)
            .unwrap();

        let info = classify(data, 4, 0, true);
        let message = Message::classify(&info);

        assert_eq!(message.kind, MessageType::ReadCommand);
        assert_eq!(message.command, crate::hash::fnv1a("battery"));
        assert_eq!(message.value, 0);
    }

    #[test]
    fn test_value_direction() {
        let mut data = Data::new();
        data.set_command_int(0x1111).unwrap();
        data.set_value_int(7842).unwrap();

        let request = classify(data.clone(), 4, 123, true);
        assert_eq!(Message::classify(&request).kind, MessageType::WriteValue);

        let response = classify(data, 4, 123, false);
        let message = Message::classify(&response);
        assert_eq!(message.kind, MessageType::ResponseValue);
        assert_eq!(message.value, 7842);
        assert_eq!(message.command, 0x1111);
    }

    #[test]
    fn test_string_direction() {
        let mut data = Data::new();
        data.set_command_int(0x2222).unwrap();
        data.set_value_str(b"X4").unwrap();

        let response = classify(data, 4, 7, false);
        let message = Message::classify(&response);
        assert_eq!(message.kind, MessageType::ResponseString);
        assert_eq!(message.text().unwrap(), "X4");
    }

    #[test]
    fn test_bare_write_command() {
        let mut data = Data::new();
        data.set_command_int(0x3333).unwrap();

        let info = classify(data, 4, 0, true);
        assert_eq!(Message::classify(&info).kind, MessageType::WriteCommand);
    }

    #[test]
    fn test_type_tag_overrides() {
        let mut data = Data::new();
        data.set_byte(MessageType::Subscribe.into());
        data.set_command_int(0x4444).unwrap();
        data.set_value_int(500).unwrap();

        let info = classify(data, 4, 0, true);
        let message = Message::classify(&info);
        assert_eq!(message.kind, MessageType::Subscribe);
        assert_eq!(message.value, 500);
    }

    #[test]
    fn test_unknown_tag_is_undefined() {
        let mut data = Data::new();
        // WriteValue is never carried as a wire tag
        data.set_byte(MessageType::WriteValue.into());
        data.set_command_int(0x5555).unwrap();
        data.set_value_int(1).unwrap();

        let info = classify(data, 4, 0, true);
        assert_eq!(Message::classify(&info).kind, MessageType::Undefined);
    }

    #[test]
    fn test_response_fail_tag() {
        let mut data = Data::new();
        data.set_byte(MessageType::ResponseFail.into());
        data.set_command_int(0x6666).unwrap();
        data.set_value_int(-3).unwrap();

        let info = classify(data, 4, 0, false);
        let message = Message::classify(&info);
        assert_eq!(message.kind, MessageType::ResponseFail);
        assert_eq!(message.value, -3);
    }
}
