use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::module::ModuleShared;
use crate::{BusConfig, BusFrame, CanFrame, Message, MessageType, Result, TotemBus, BUS_LOG_TARGET};

// Sender task wake tick: an idle drain loop re-checks shutdown at this period
const SENDER_TICK: Duration = Duration::from_millis(250);

/// Outbound transport driven by the background sender.
///
/// One implementation writes a CAN controller, another writes the TX characteristic of
/// the BLE tunnel. Returning `false` records a failed send; the engine never retries.
pub trait CanLink: Send {
    fn write(&mut self, frame: &CanFrame) -> bool;
}

impl<F> CanLink for F
where
    F: FnMut(&CanFrame) -> bool + Send,
{
    fn write(&mut self, frame: &CanFrame) -> bool {
        self(frame)
    }
}

/// Observer invoked when an unsolicited ping response reveals a module.
pub type ModuleFoundHook = Box<dyn Fn(u8, u16) + Send>;

/// Explicit module context.
///
/// Modules are created against a registry; a network that attaches to the registry serves
/// every module in it, and modules created before any connection exists simply wait in a
/// registry with no network. Detaching hands them back to that idle state.
#[derive(Clone, Default)]
pub struct Registry {
    pub(crate) inner: Arc<RegistryInner>,
}

#[derive(Default)]
pub(crate) struct RegistryInner {
    modules: Mutex<Vec<Arc<ModuleShared>>>,
    network: Mutex<Weak<NetworkShared>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the number of modules currently registered.
    pub fn len(&self) -> usize {
        self.inner.modules.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gets whether a network currently serves this registry.
    pub fn is_attached(&self) -> bool {
        self.inner.network.lock().unwrap().upgrade().is_some()
    }

    /// Completes every armed response latch with failure.
    ///
    /// Used on disconnect so that parked callers wake instead of riding out their
    /// timeouts.
    pub fn fail_waiters(&self) {
        for module in self.snapshot() {
            module.fail_latch();
        }
    }

    pub(crate) fn register(&self, module: Arc<ModuleShared>) {
        self.inner.modules.lock().unwrap().push(module);
    }

    pub(crate) fn unregister(&self, module: &Arc<ModuleShared>) {
        self.inner
            .modules
            .lock()
            .unwrap()
            .retain(|m| !Arc::ptr_eq(m, module));
    }

    pub(crate) fn network(&self) -> Option<Arc<NetworkShared>> {
        self.inner.network.lock().unwrap().upgrade()
    }

    // Strong references are collected under the lock, dispatch happens outside it
    pub(crate) fn snapshot(&self) -> Vec<Arc<ModuleShared>> {
        self.inner.modules.lock().unwrap().clone()
    }
}

#[derive(Default)]
struct PingState {
    armed: bool,
    number: u8,
    // -1 matches any serial
    serial: i32,
    detected: bool,
}

// One-shot rendezvous between is_connected and the dispatch thread
#[derive(Default)]
struct PingMonitor {
    state: Mutex<PingState>,
    cond: Condvar,
}

impl PingMonitor {
    fn arm(&self, number: u8, serial: i32) {
        let mut state = self.state.lock().unwrap();
        state.armed = true;
        state.number = number;
        state.serial = serial;
        state.detected = false;
    }

    fn disarm(&self) {
        let mut state = self.state.lock().unwrap();
        state.armed = false;
    }

    // Consumes a ping response while armed; a matching one flips the monitor
    fn offer(&self, number: u8, serial: u16) -> bool {
        let mut state = self.state.lock().unwrap();
        if !state.armed {
            return false;
        }
        if !state.detected
            && state.number == number
            && (state.serial == -1 || state.serial == serial as i32)
        {
            state.detected = true;
            self.cond.notify_all();
        }
        true
    }

    fn wait(&self, timeout: Duration) -> bool {
        let state = self.state.lock().unwrap();
        let (state, _) = self
            .cond
            .wait_timeout_while(state, timeout, |s| !s.detected)
            .unwrap();
        state.detected
    }
}

pub(crate) struct NetworkShared {
    bus: Mutex<TotemBus>,
    ping: PingMonitor,
    registry: Mutex<Weak<RegistryInner>>,
    found_hook: Mutex<Option<ModuleFoundHook>>,
    config: BusConfig,
}

impl NetworkShared {
    pub(crate) fn config(&self) -> &BusConfig {
        &self.config
    }

    pub(crate) fn send_frame(&self, frame: &BusFrame, number: u32, serial: u32) -> Result<()> {
        self.bus.lock().unwrap().send(frame, number, serial)
    }

    pub(crate) fn is_module_connected(&self, number: u8, serial: u16) -> bool {
        let filter = if serial == 0 { -1 } else { serial as i32 };
        self.ping.arm(number, filter);

        for attempt in 0..self.config.ping_retries.max(1) {
            trace!(
                target: BUS_LOG_TARGET,
                "ping {}:{} attempt {}",
                number,
                serial,
                attempt + 1
            );
            if let Err(err) = self.send_frame(&BusFrame::ping(), number as u32, serial as u32) {
                debug!(target: BUS_LOG_TARGET, "ping send failed: {err}");
            }
            if self.ping.wait(self.config.ping_timeout()) {
                self.ping.disarm();
                return true;
            }
        }

        self.ping.disarm();
        false
    }

    pub(crate) fn process_can(&self, id: u32, payload: &[u8]) {
        let completed = self.bus.lock().unwrap().process_can(id, payload);
        match completed {
            Ok(Some(info)) => {
                let message = Message::classify(&info);
                self.dispatch(&message);
            }
            Ok(None) => (),
            Err(err) => debug!(target: BUS_LOG_TARGET, "rx dropped: {err}"),
        }
    }

    fn dispatch(&self, message: &Message<'_>) {
        if message.kind == MessageType::ResponsePing {
            if self.ping.offer(message.number, message.serial) {
                return;
            }
            if let Some(hook) = self.found_hook.lock().unwrap().as_ref() {
                hook(message.number, message.serial);
            }
            return;
        }

        if let Some(registry) = self.registry.lock().unwrap().upgrade() {
            let registry = Registry { inner: registry };
            for module in registry.snapshot() {
                module.on_message(message);
            }
        }
    }
}

/// The coordination layer above one engine instance.
///
/// Owns the outbound queue and its background sender, the ping monitor used for
/// reachability probes, and the fan-out of received messages to the registry it serves.
pub struct Network {
    shared: Arc<NetworkShared>,
    running: Arc<AtomicBool>,
    sender: Option<thread::JoinHandle<()>>,
}

impl Network {
    pub fn new(link: Box<dyn CanLink>) -> Self {
        Self::with_config(BusConfig::default(), link)
    }

    pub fn with_config(config: BusConfig, mut link: Box<dyn CanLink>) -> Self {
        let (queue_tx, queue_rx) = mpsc::sync_channel::<CanFrame>(config.queue_depth.max(1));

        // The writer enqueues; a full queue records the frame as refused
        let sink = Box::new(move |frame: &CanFrame| queue_tx.try_send(*frame).is_ok());
        let bus = TotemBus::with_config(&config, sink);

        let running = Arc::new(AtomicBool::new(true));
        let sender_running = running.clone();
        let sender = thread::Builder::new()
            .name("totembus-send".into())
            .spawn(move || {
                while sender_running.load(Ordering::Relaxed) {
                    match queue_rx.recv_timeout(SENDER_TICK) {
                        Ok(frame) => {
                            if !link.write(&frame) {
                                warn!(
                                    target: BUS_LOG_TARGET,
                                    "transport refused record id={:#010x}",
                                    frame.id
                                );
                            }
                        }
                        Err(mpsc::RecvTimeoutError::Timeout) => (),
                        Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .expect("spawn sender task");

        Self {
            shared: Arc::new(NetworkShared {
                bus: Mutex::new(bus),
                ping: PingMonitor::default(),
                registry: Mutex::new(Weak::new()),
                found_hook: Mutex::new(None),
                config,
            }),
            running,
            sender: Some(sender),
        }
    }

    /// Claims a registry: every module in it is now served by this network.
    pub fn attach(&self, registry: &Registry) {
        *registry.inner.network.lock().unwrap() = Arc::downgrade(&self.shared);
        *self.shared.registry.lock().unwrap() = Arc::downgrade(&registry.inner);
    }

    /// Hands the served modules back to their idle registry and fails their waiters.
    pub fn detach(&self) {
        let registry = self.shared.registry.lock().unwrap().upgrade();
        if let Some(inner) = registry {
            let registry = Registry { inner };
            *registry.inner.network.lock().unwrap() = Weak::new();
            registry.fail_waiters();
        }
        *self.shared.registry.lock().unwrap() = Weak::new();
    }

    /// Installs the observer for unsolicited ping responses.
    pub fn on_module_found(&self, hook: ModuleFoundHook) {
        *self.shared.found_hook.lock().unwrap() = Some(hook);
    }

    /// Sends one outbound message to `(number, serial)`.
    pub fn send_frame(&self, frame: &BusFrame, number: u32, serial: u32) -> Result<()> {
        self.shared.send_frame(frame, number, serial)
    }

    /// Feeds one inbound transport record from the medium.
    pub fn process_can(&self, id: u32, payload: &[u8]) {
        self.shared.process_can(id, payload)
    }

    /// Feeds one inbound record.
    pub fn process_frame(&self, frame: &CanFrame) {
        self.shared.process_can(frame.id, frame.payload())
    }

    /// Probes a module for reachability with up to `ping_retries` pings.
    pub fn is_connected(&self, number: u8, serial: u16) -> bool {
        self.shared.is_module_connected(number, serial)
    }

    pub(crate) fn shared(&self) -> Arc<NetworkShared> {
        self.shared.clone()
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        self.detach();
        self.running.store(false, Ordering::Relaxed);
        if let Some(sender) = self.sender.take() {
            let _ = sender.join();
        }
    }
}
