#[cfg(not(feature = "std"))]
use alloc::{boxed::Box, vec::Vec};

use log::{debug, trace};

use crate::{
    is_valid_number, is_valid_serial, BusConfig, CanFrame, Data, Error, FrameReader, FrameWriter,
    MessageType, PacketInfo, ProtocolError, ReadOutcome, Result, BUS_LOG_TARGET,
};

/// Outbound transport sink. Returns `false` when the medium refused the record.
pub type CanSink = Box<dyn FnMut(&CanFrame) -> bool + Send>;

// Cap on reprocessing a record after its slot was poisoned mid-message
const REPROCESS_LIMIT: usize = 3;

/// An outbound message: a payload record plus its direction.
///
/// Factories mirror the protocol surface: writes, the compact read, subscriptions, pings
/// and the response forms emitted by a module-side implementation.
#[derive(Clone, Debug, PartialEq)]
pub struct BusFrame {
    pub(crate) data: Data,
    pub(crate) request: bool,
}

impl BusFrame {
    /// Command with no argument.
    pub fn write(command: u32, response_req: bool) -> Self {
        let mut data = Data::new();
        data.set_bit(response_req);
        let _ = data.set_command_int(command);
        Self {
            data,
            request: true,
        }
    }

    /// Command with an integer argument.
    pub fn write_value(command: u32, value: i32, response_req: bool) -> Self {
        let mut data = Data::new();
        data.set_bit(response_req);
        let _ = data.set_command_int(command);
        let _ = data.set_value_int(value);
        Self {
            data,
            request: true,
        }
    }

    /// Command with a string argument.
    pub fn write_string(command: u32, value: &[u8], response_req: bool) -> Result<Self> {
        let mut data = Data::new();
        data.set_bit(response_req);
        data.set_command_int(command)?;
        data.set_value_str(value)?;
        Ok(Self {
            data,
            request: true,
        })
    }

    /// Compact read: the target command rides in the value field.
    pub fn read(command: u32) -> Self {
        let mut data = Data::new();
        data.set_bit(true);
        let _ = data.set_value_int(command as i32);
        Self {
            data,
            request: true,
        }
    }

    /// Zero-payload reachability probe.
    pub fn ping() -> Self {
        Self {
            data: Data::new(),
            request: true,
        }
    }

    /// Periodic delivery request; a negative interval unsubscribes.
    pub fn subscribe(command: u32, interval: i32, response_req: bool) -> Self {
        let mut data = Data::new();
        data.set_bit(response_req);
        data.set_byte(MessageType::Subscribe.into());
        let _ = data.set_command_int(command);
        let _ = data.set_value_int(interval);
        Self {
            data,
            request: true,
        }
    }

    /// Reply to a reachability probe.
    pub fn respond_ping() -> Self {
        Self {
            data: Data::new(),
            request: false,
        }
    }

    /// Integer reply to a read.
    pub fn respond_value(command: u32, value: i32) -> Self {
        let mut data = Data::new();
        let _ = data.set_command_int(command);
        let _ = data.set_value_int(value);
        Self {
            data,
            request: false,
        }
    }

    /// String reply to a read.
    pub fn respond_string(command: u32, value: &[u8]) -> Result<Self> {
        let mut data = Data::new();
        data.set_command_int(command)?;
        data.set_value_str(value)?;
        Ok(Self {
            data,
            request: false,
        })
    }

    /// Write acknowledgement; a non-zero status rides in the value field.
    pub fn respond_status(command: u32, success: bool, status: i32) -> Self {
        let mut data = Data::new();
        data.set_byte(if success {
            MessageType::ResponseOk.into()
        } else {
            MessageType::ResponseFail.into()
        });
        let _ = data.set_command_int(command);
        if status != 0 {
            let _ = data.set_value_int(status);
        }
        Self {
            data,
            request: false,
        }
    }

    /// Unsolicited integer push.
    pub fn send_value(command: u32, value: i32) -> Self {
        let mut data = Data::new();
        data.set_byte(MessageType::SendValue.into());
        let _ = data.set_command_int(command);
        let _ = data.set_value_int(value);
        Self {
            data,
            request: true,
        }
    }

    /// Unsolicited string push.
    pub fn send_string(command: u32, value: &[u8]) -> Result<Self> {
        let mut data = Data::new();
        data.set_byte(MessageType::SendString.into());
        data.set_command_int(command)?;
        data.set_value_str(value)?;
        Ok(Self {
            data,
            request: true,
        })
    }

    /// Explicit request for an integer value.
    pub fn request_value(command: u32) -> Self {
        let mut data = Data::new();
        data.set_byte(MessageType::RequestValue.into());
        let _ = data.set_command_int(command);
        Self {
            data,
            request: true,
        }
    }

    /// Explicit request for a string value.
    pub fn request_string(command: u32) -> Self {
        let mut data = Data::new();
        data.set_byte(MessageType::RequestString.into());
        let _ = data.set_command_int(command);
        Self {
            data,
            request: true,
        }
    }

    /// Gets the payload record.
    pub fn data(&self) -> &Data {
        &self.data
    }

    /// Gets whether the frame travels initiator to module.
    pub fn is_request(&self) -> bool {
        self.request
    }
}

/// The bus engine: a pool of per-source readers plus the outbound send path.
///
/// The engine is transport-agnostic. Outbound records go through the sink supplied at
/// construction; inbound records are pushed into [process_can](Self::process_can) and
/// completed messages come back to the caller for classification and dispatch.
pub struct TotemBus {
    readers: Vec<FrameReader>,
    sink: CanSink,
}

impl TotemBus {
    pub fn new(sink: CanSink) -> Self {
        Self::with_config(&BusConfig::default(), sink)
    }

    pub fn with_config(config: &BusConfig, sink: CanSink) -> Self {
        let readers = (0..config.readers.max(1))
            .map(|_| FrameReader::new(config.reader_buffer))
            .collect();

        Self { readers, sink }
    }

    /// Drops all reassembly state.
    pub fn clear(&mut self) {
        for reader in &mut self.readers {
            reader.clear();
        }
    }

    /// Serialises and sends one outbound message to `(number, serial)`.
    ///
    /// An empty payload goes out as a single RTR ping record; everything else drives the
    /// writer to exhaustion. Transport refusals surface as a transport error after every
    /// record has been offered.
    pub fn send(&mut self, frame: &BusFrame, number: u32, serial: u32) -> Result<()> {
        if !is_valid_number(number) || !is_valid_serial(serial) {
            return Err(Error::failure(format!(
                "invalid module address: {number}:{serial}"
            )));
        }

        if frame.data.is_empty() {
            let record = CanFrame::ping(number as u8, serial as u16, frame.request);
            trace!(target: BUS_LOG_TARGET, "tx ping {}:{}", number, serial);
            if !(self.sink)(&record) {
                return Err(Error::transport("sink refused ping record"));
            }
            return Ok(());
        }

        let mut writer = FrameWriter::new(&frame.data, number as u8, serial as u16, frame.request);
        let mut refused = false;
        while let Some(record) = writer.next_frame() {
            trace!(
                target: BUS_LOG_TARGET,
                "tx record id={:#010x} len={}",
                record.id,
                record.len
            );
            if !(self.sink)(&record) {
                refused = true;
            }
        }

        if refused {
            Err(Error::transport("sink refused outbound record"))
        } else {
            Ok(())
        }
    }

    /// Feeds one inbound transport record.
    ///
    /// Returns the completed message once the source finishes its record sequence. A
    /// record from a source with no matching or free reader slot reports
    /// [ProtocolError::BufferOverflow] and is dropped. A slot poisoned mid-message is
    /// reset and the record reprocessed, bounded to [REPROCESS_LIMIT] passes.
    pub fn process_can(&mut self, id: u32, payload: &[u8]) -> Result<Option<PacketInfo>> {
        for _ in 0..=REPROCESS_LIMIT {
            let slot = match self.select_reader(id) {
                Some(slot) => slot,
                None => {
                    debug!(target: BUS_LOG_TARGET, "rx drop id={:#010x}: no reader slot", id);
                    return Err(ProtocolError::BufferOverflow.into());
                }
            };

            match self.readers[slot].accept_raw(id, payload) {
                Ok(ReadOutcome::Received) => return Ok(self.readers[slot].take()),
                Ok(ReadOutcome::Pending) => return Ok(None),
                Err(ProtocolError::ExtensionMissing) => {
                    // The slot dropped its partial message; the record opens a new one
                    debug!(
                        target: BUS_LOG_TARGET,
                        "rx id={:#010x}: interleaved first record, reprocessing",
                        id
                    );
                    continue;
                }
                Err(err) => {
                    debug!(target: BUS_LOG_TARGET, "rx error id={:#010x}: {}", id, err);
                    return Err(err.into());
                }
            }
        }

        Err(ProtocolError::ExtensionMissing.into())
    }

    fn select_reader(&self, id: u32) -> Option<usize> {
        let mut free = None;
        for (slot, reader) in self.readers.iter().enumerate() {
            if reader.for_module(id) {
                return Some(slot);
            }
            if free.is_none() && !reader.is_used() {
                free = Some(slot);
            }
        }
        free
    }
}
