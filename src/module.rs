use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::network::Registry;
use crate::{hash, inner_enum, BusFrame, Error, Message, MessageType, Result};

/// A command identifier: either a precomputed hash or a name hashed on the fly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandId(pub u32);

impl From<u32> for CommandId {
    fn from(hash: u32) -> Self {
        Self(hash)
    }
}

impl From<&str> for CommandId {
    fn from(name: &str) -> Self {
        Self(hash::fnv1a(name))
    }
}

/// Payload delivered to a module's data receiver or returned by a read.
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleData {
    command: u32,
    value: ModuleValue,
}

/// Value carried by one [ModuleData].
#[derive(Clone, Debug, PartialEq)]
pub enum ModuleValue {
    Int(i32),
    Bytes(Vec<u8>),
}

inner_enum!(ModuleValue, Int, i32);
inner_enum!(ModuleValue, Bytes, Vec<u8>);

impl ModuleData {
    pub fn new<V: Into<ModuleValue>>(command: u32, value: V) -> Self {
        Self {
            command,
            value: value.into(),
        }
    }

    /// Gets the command hash the payload answers.
    pub fn command(&self) -> u32 {
        self.command
    }

    /// Gets whether the payload answers `command`.
    pub fn is(&self, command: impl Into<CommandId>) -> bool {
        self.command == command.into().0
    }

    pub fn value(&self) -> &ModuleValue {
        &self.value
    }

    /// Gets the integer payload.
    pub fn int(&self) -> Result<i32> {
        Ok(*self.value.as_int()?)
    }

    /// Gets the string payload interpreted as UTF-8.
    pub fn text(&self) -> Result<&str> {
        Ok(std::str::from_utf8(self.value.as_bytes()?)?)
    }
}

impl From<i32> for ModuleValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<Vec<u8>> for ModuleValue {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&[u8]> for ModuleValue {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(bytes.to_vec())
    }
}

/// Receiver for asynchronous deliveries (subscriptions, async reads, pushes).
pub type DataReceiver = Box<dyn Fn(ModuleData) + Send>;

#[derive(Default)]
struct LatchState {
    command: Option<u32>,
    waiting: bool,
    success: bool,
    data: Option<ModuleData>,
}

// One-shot rendezvous: armed before a send, completed by the dispatch thread on a
// matching command, or timed out by the parked caller
#[derive(Default)]
struct ResponseLatch {
    state: Mutex<LatchState>,
    cond: Condvar,
}

impl ResponseLatch {
    fn arm(&self, command: u32) {
        let mut state = self.state.lock().unwrap();
        state.command = Some(command);
        state.waiting = true;
        state.success = false;
        state.data = None;
    }

    // Returns whether the latch consumed the response
    fn complete(&self, command: u32, success: bool, data: Option<ModuleData>) -> bool {
        let mut state = self.state.lock().unwrap();
        if !state.waiting || state.command != Some(command) {
            return false;
        }
        state.success = success;
        state.data = data;
        state.waiting = false;
        state.command = None;
        self.cond.notify_all();
        true
    }

    fn fail(&self) {
        let mut state = self.state.lock().unwrap();
        if state.waiting {
            state.success = false;
            state.waiting = false;
            state.command = None;
            self.cond.notify_all();
        }
    }

    fn wait(&self, timeout: Duration) -> (bool, Option<ModuleData>) {
        let state = self.state.lock().unwrap();
        let (mut state, _) = self
            .cond
            .wait_timeout_while(state, timeout, |s| s.waiting)
            .unwrap();
        state.waiting = false;
        state.command = None;
        (state.success, state.data.take())
    }
}

pub(crate) struct ModuleShared {
    number: AtomicU8,
    serial: AtomicU16,
    latch: ResponseLatch,
    receiver: Mutex<Option<DataReceiver>>,
}

impl ModuleShared {
    // Wildcards: number 0 accepts everything; serial 0 accepts any serial
    fn accepts(&self, number: u8, serial: u16) -> bool {
        let own_number = self.number.load(Ordering::Relaxed);
        if own_number == 0 {
            return true;
        }
        let own_serial = self.serial.load(Ordering::Relaxed);
        if own_serial != 0 && own_serial != serial {
            return false;
        }
        own_number == number
    }

    pub(crate) fn on_message(&self, message: &Message<'_>) {
        if !self.accepts(message.number, message.serial) {
            return;
        }

        match message.kind {
            MessageType::ResponseValue | MessageType::SendValue => {
                let data = ModuleData::new(message.command, message.value);
                if !self.latch.complete(message.command, true, Some(data.clone())) {
                    self.deliver(data);
                }
            }
            MessageType::ResponseString | MessageType::SendString => {
                let bytes = message.string.unwrap_or_default();
                let data = ModuleData::new(message.command, bytes);
                if !self.latch.complete(message.command, true, Some(data.clone())) {
                    self.deliver(data);
                }
            }
            MessageType::ResponseOk => {
                self.latch.complete(message.command, true, None);
            }
            _ => {
                // ResponseFail and anything unexpected fails a matching waiter
                self.latch.complete(message.command, false, None);
            }
        }
    }

    pub(crate) fn fail_latch(&self) {
        self.latch.fail();
    }

    fn deliver(&self, data: ModuleData) {
        if let Some(receiver) = self.receiver.lock().unwrap().as_ref() {
            receiver(data);
        }
    }
}

/// Control object for one addressable board module.
///
/// Pairs a `(number, serial)` address with a response latch. Synchronous operations
/// (`*_wait`) park the caller on the latch until a response carrying the same command
/// arrives or the configured 1000 ms window expires. Messages from other modules never
/// touch the latch; each module filters by its own address.
///
/// A module created against an idle [Registry] starts working the moment a connection
/// attaches to that registry.
pub struct TotemModule {
    shared: Arc<ModuleShared>,
    registry: Registry,
}

impl TotemModule {
    pub fn new(registry: &Registry, number: u8, serial: u16) -> Self {
        let shared = Arc::new(ModuleShared {
            number: AtomicU8::new(number),
            serial: AtomicU16::new(serial),
            latch: ResponseLatch::default(),
            receiver: Mutex::new(None),
        });
        registry.register(shared.clone());

        Self {
            shared,
            registry: registry.clone(),
        }
    }

    /// Installs the receiver for asynchronous deliveries.
    pub fn attach_on_data<F>(&self, receiver: F)
    where
        F: Fn(ModuleData) + Send + 'static,
    {
        *self.shared.receiver.lock().unwrap() = Some(Box::new(receiver));
    }

    pub fn number(&self) -> u8 {
        self.shared.number.load(Ordering::Relaxed)
    }

    pub fn serial(&self) -> u16 {
        self.shared.serial.load(Ordering::Relaxed)
    }

    pub fn set_number(&self, number: u8) {
        self.shared.number.store(number, Ordering::Relaxed);
    }

    pub fn set_serial(&self, serial: u16) {
        self.shared.serial.store(serial, Ordering::Relaxed);
    }

    /// Hashes a command name.
    pub fn hash_cmd(command: &str) -> u32 {
        hash::fnv1a(command)
    }

    /// Hashes a board model name.
    pub fn hash_model(model: &str) -> u16 {
        hash::fnv1a16(model)
    }

    /// Probes this module for reachability.
    pub fn is_connected(&self) -> bool {
        match self.registry.network() {
            Some(network) => network.is_module_connected(self.number(), self.serial()),
            None => false,
        }
    }

    /// Sends a command with no argument.
    pub fn write(&self, command: impl Into<CommandId>) -> Result<()> {
        self.send(BusFrame::write(command.into().0, false))
    }

    /// Sends a command and waits for its acknowledgement.
    pub fn write_wait(&self, command: impl Into<CommandId>) -> Result<()> {
        let command = command.into().0;
        self.transfer_ack(BusFrame::write(command, true), command)
    }

    /// Sends a command with an integer argument.
    pub fn write_value(&self, command: impl Into<CommandId>, value: i32) -> Result<()> {
        self.send(BusFrame::write_value(command.into().0, value, false))
    }

    /// Sends a command with an integer argument and waits for its acknowledgement.
    pub fn write_value_wait(&self, command: impl Into<CommandId>, value: i32) -> Result<()> {
        let command = command.into().0;
        self.transfer_ack(BusFrame::write_value(command, value, true), command)
    }

    /// Sends a command with a string argument.
    pub fn write_string(&self, command: impl Into<CommandId>, value: &[u8]) -> Result<()> {
        self.send(BusFrame::write_string(command.into().0, value, false)?)
    }

    /// Sends a command with a string argument and waits for its acknowledgement.
    pub fn write_string_wait(&self, command: impl Into<CommandId>, value: &[u8]) -> Result<()> {
        let command = command.into().0;
        self.transfer_ack(BusFrame::write_string(command, value, true)?, command)
    }

    /// Sends four signed bytes packed big-endian into one 32-bit value.
    pub fn write_packed(&self, command: impl Into<CommandId>, values: [i8; 4]) -> Result<()> {
        self.send(BusFrame::write_value(
            command.into().0,
            pack_quad(values),
            false,
        ))
    }

    /// Sends four packed signed bytes and waits for the acknowledgement.
    pub fn write_packed_wait(&self, command: impl Into<CommandId>, values: [i8; 4]) -> Result<()> {
        let command = command.into().0;
        self.transfer_ack(
            BusFrame::write_value(command, pack_quad(values), true),
            command,
        )
    }

    /// Sends three signed bytes packed into the low bytes of one 32-bit value.
    pub fn write_packed3(&self, command: impl Into<CommandId>, values: [i8; 3]) -> Result<()> {
        self.write_packed(command, [0, values[0], values[1], values[2]])
    }

    /// Requests a value; the response arrives at the data receiver.
    pub fn read(&self, command: impl Into<CommandId>) -> Result<()> {
        if self.shared.receiver.lock().unwrap().is_none() {
            return Err(Error::failure("read without a data receiver"));
        }
        self.send(BusFrame::read(command.into().0))
    }

    /// Requests a value and waits for it.
    pub fn read_wait(&self, command: impl Into<CommandId>) -> Result<ModuleData> {
        let command = command.into().0;
        let network = self.network()?;

        self.shared.latch.arm(command);
        network.send_frame(
            &BusFrame::read(command),
            self.number() as u32,
            self.serial() as u32,
        )?;

        match self.shared.latch.wait(network.config().response_timeout()) {
            (true, Some(data)) => Ok(data),
            (true, None) => Err(Error::failure("response carried no payload")),
            (false, _) => Err(Error::timeout(format!(
                "no response for command {command:#010x}"
            ))),
        }
    }

    /// Requests periodic delivery of a value to the data receiver.
    pub fn subscribe(&self, command: impl Into<CommandId>, interval_ms: i32) -> Result<()> {
        if self.shared.receiver.lock().unwrap().is_none() {
            return Err(Error::failure("subscribe without a data receiver"));
        }
        self.send(BusFrame::subscribe(command.into().0, interval_ms, false))
    }

    /// Requests periodic delivery and waits for the acknowledgement.
    pub fn subscribe_wait(&self, command: impl Into<CommandId>, interval_ms: i32) -> Result<()> {
        if self.shared.receiver.lock().unwrap().is_none() {
            return Err(Error::failure("subscribe without a data receiver"));
        }
        let command = command.into().0;
        self.transfer_ack(BusFrame::subscribe(command, interval_ms, true), command)
    }

    /// Stops a periodic delivery.
    pub fn unsubscribe(&self, command: impl Into<CommandId>) -> Result<()> {
        self.send(BusFrame::subscribe(command.into().0, -1, false))
    }

    /// Stops a periodic delivery and waits for the acknowledgement.
    pub fn unsubscribe_wait(&self, command: impl Into<CommandId>) -> Result<()> {
        let command = command.into().0;
        self.transfer_ack(BusFrame::subscribe(command, -1, true), command)
    }

    fn network(&self) -> Result<Arc<crate::network::NetworkShared>> {
        self.registry
            .network()
            .ok_or_else(|| Error::transport("no connection serves this module"))
    }

    fn send(&self, frame: BusFrame) -> Result<()> {
        let network = self.network()?;
        network.send_frame(&frame, self.number() as u32, self.serial() as u32)
    }

    fn transfer_ack(&self, frame: BusFrame, command: u32) -> Result<()> {
        let network = self.network()?;

        self.shared.latch.arm(command);
        network.send_frame(&frame, self.number() as u32, self.serial() as u32)?;

        match self.shared.latch.wait(network.config().response_timeout()) {
            (true, _) => Ok(()),
            (false, _) => Err(Error::timeout(format!(
                "no acknowledgement for command {command:#010x}"
            ))),
        }
    }
}

impl Drop for TotemModule {
    fn drop(&mut self) {
        self.registry.unregister(&self.shared);
    }
}

fn pack_quad(values: [i8; 4]) -> i32 {
    (((values[0] as u8 as u32) << 24)
        | ((values[1] as u8 as u32) << 16)
        | ((values[2] as u8 as u32) << 8)
        | (values[3] as u8 as u32)) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{CanLink, Network};
    use crate::{CanFrame, CanId, Data, FrameReader};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Instant;

    // Decodes outbound records back into classified messages for assertions
    fn decode(records: &[CanFrame]) -> Vec<(MessageType, u32, i32)> {
        let mut reader = FrameReader::default();
        let mut out = Vec::new();
        for record in records {
            if reader.accept(record) == Ok(crate::ReadOutcome::Received) {
                let info = reader.take().unwrap();
                let message = Message::classify(&info);
                out.push((message.kind, message.command, message.value));
            }
        }
        out
    }

    fn channel_link() -> (Box<dyn CanLink>, mpsc::Receiver<CanFrame>) {
        let (tx, rx) = mpsc::channel();
        let link = Box::new(move |frame: &CanFrame| tx.send(*frame).is_ok());
        (link, rx)
    }

    fn collect_for(rx: &mpsc::Receiver<CanFrame>, window: Duration) -> Vec<CanFrame> {
        let deadline = Instant::now() + window;
        let mut records = Vec::new();
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            match rx.recv_timeout(remaining) {
                Ok(frame) => records.push(frame),
                Err(_) => break,
            }
        }
        records
    }

    #[test]
    fn test_write_goes_out_as_request() {
        let registry = Registry::new();
        let (link, rx) = channel_link();
        let network = Network::new(link);
        network.attach(&registry);

        let module = TotemModule::new(&registry, 4, 0);
        module.write_value("indicate", 3).unwrap();

        let records = collect_for(&rx, Duration::from_millis(500));
        assert!(!records.is_empty());
        assert!(CanId::read_request(records[0].id));
        assert_eq!(
            decode(&records),
            vec![(MessageType::WriteValue, hash::fnv1a("indicate"), 3)]
        );
    }

    #[test]
    fn test_detached_module_cannot_send() {
        let registry = Registry::new();
        let module = TotemModule::new(&registry, 4, 0);
        let err = module.write("led").unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::Transport);
    }

    #[test]
    fn test_read_wait_round_trip() {
        let registry = Registry::new();
        let (link, rx) = channel_link();
        let network = Network::new(link);
        network.attach(&registry);

        let module = TotemModule::new(&registry, 4, 0);

        let shared = network_handle(&network);
        let responder = thread::spawn(move || {
            // Answer the read once it shows up on the wire
            thread::sleep(Duration::from_millis(20));
            let mut data = Data::new();
            data.set_command_int(hash::fnv1a("battery")).unwrap();
            data.set_value_int(7842).unwrap();
            let mut writer = crate::FrameWriter::new(&data, 4, 123, false);
            while let Some(frame) = writer.next_frame() {
                shared(&frame);
            }
        });

        // The compact read rides the command hash in the value field
        let result = module.read_wait("battery");
        responder.join().unwrap();

        let records = collect_for(&rx, Duration::from_millis(200));
        let decoded = decode(&records);
        assert_eq!(decoded[0].0, MessageType::ReadCommand);
        assert_eq!(decoded[0].1, hash::fnv1a("battery"));

        let data = result.unwrap();
        assert!(data.is("battery"));
        assert_eq!(data.int().unwrap(), 7842);
    }

    // Feeds records straight back into the network's receive path
    fn network_handle(network: &Network) -> impl Fn(&CanFrame) + Send + 'static {
        let shared = network.shared();
        move |frame: &CanFrame| shared.process_can(frame.id, frame.payload())
    }

    #[test]
    fn test_write_wait_succeeds_on_ok() {
        let registry = Registry::new();
        let (link, _rx) = channel_link();
        let network = Network::new(link);
        network.attach(&registry);

        let module = TotemModule::new(&registry, 4, 123);
        let feed = network_handle(&network);

        let command = hash::fnv1a("led");
        let acker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let frame = BusFrame::respond_status(command, true, 0);
            let mut writer = crate::FrameWriter::new(&frame.data, 4, 123, false);
            while let Some(record) = writer.next_frame() {
                feed(&record);
            }
        });

        module.write_value_wait("led", 1).unwrap();
        acker.join().unwrap();
    }

    #[test]
    fn test_write_wait_fails_on_response_fail() {
        let registry = Registry::new();
        let (link, _rx) = channel_link();
        let network = Network::new(link);
        network.attach(&registry);

        let module = TotemModule::new(&registry, 4, 123);
        let feed = network_handle(&network);

        let command = hash::fnv1a("led");
        let nacker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let frame = BusFrame::respond_status(command, false, -3);
            let mut writer = crate::FrameWriter::new(&frame.data, 4, 123, false);
            while let Some(record) = writer.next_frame() {
                feed(&record);
            }
        });

        assert!(module.write_value_wait("led", 1).is_err());
        nacker.join().unwrap();
    }

    #[test]
    fn test_latch_ignores_other_commands() {
        let latch = ResponseLatch::default();
        latch.arm(0x1111);
        assert!(!latch.complete(0x2222, true, None));
        assert!(latch.complete(0x1111, true, None));
        // One-shot: a second completion finds the latch disarmed
        assert!(!latch.complete(0x1111, true, None));
    }

    #[test]
    fn test_module_filter() {
        let shared = ModuleShared {
            number: AtomicU8::new(4),
            serial: AtomicU16::new(0),
            latch: ResponseLatch::default(),
            receiver: Mutex::new(None),
        };
        // serial 0 accepts any serial of the right number
        assert!(shared.accepts(4, 123));
        assert!(shared.accepts(4, 0));
        assert!(!shared.accepts(5, 123));

        shared.serial.store(7, Ordering::Relaxed);
        assert!(shared.accepts(4, 7));
        assert!(!shared.accepts(4, 8));

        // number 0 is the receive-path wildcard
        shared.number.store(0, Ordering::Relaxed);
        assert!(shared.accepts(9, 1000));
    }

    #[test]
    fn test_subscription_delivery() {
        let registry = Registry::new();
        let (link, _rx) = channel_link();
        let network = Network::new(link);
        network.attach(&registry);

        let module = TotemModule::new(&registry, 4, 0);
        let (data_tx, data_rx) = mpsc::channel();
        module.attach_on_data(move |data| {
            data_tx.send(data).unwrap();
        });

        module.subscribe("battery", 500).unwrap();

        // An unsolicited value delivery lands at the receiver
        let feed = network_handle(&network);
        let frame = BusFrame::respond_value(hash::fnv1a("battery"), 7900);
        let mut writer = crate::FrameWriter::new(&frame.data, 4, 123, false);
        while let Some(record) = writer.next_frame() {
            feed(&record);
        }

        let data = data_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(data.is("battery"));
        assert_eq!(data.int().unwrap(), 7900);
    }

    #[test]
    fn test_fail_waiters_wakes_parked_caller() {
        let registry = Registry::new();
        let (link, _rx) = channel_link();
        let network = Network::new(link);
        network.attach(&registry);

        let module = Arc::new(TotemModule::new(&registry, 4, 0));
        let registry_clone = registry.clone();

        let waiter = {
            let module = module.clone();
            thread::spawn(move || module.write_value_wait("led", 1))
        };

        thread::sleep(Duration::from_millis(30));
        let start = Instant::now();
        registry_clone.fail_waiters();
        let result = waiter.join().unwrap();

        assert!(result.is_err());
        // Woken by the failure, not by the 1000 ms timeout
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
