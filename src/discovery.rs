use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::network::{CanLink, Network, Registry};
use crate::tunnel::{pack_frame, FrameStream};
use crate::{BusConfig, CanFrame};

/// Service advertised by connectable boards and carrying the CAN tunnel.
pub const CAN_SERVICE_UUID: &str = "bae50001-a471-446a-bc43-4b0a60512636";
/// Write characteristic: packed records host to board.
pub const CAN_TX_UUID: &str = "bae50002-a471-446a-bc43-4b0a60512636";
/// Notify characteristic: packed records board to host.
pub const CAN_RX_UUID: &str = "bae50003-a471-446a-bc43-4b0a60512636";
/// ATT MTU requested after connecting.
pub const GATT_MTU: u16 = 517;

// Manufacturer data: 2-byte vendor prefix, then the packed board record
const MANUF_LEN: usize = 2 + 6;
const MANUF_LEN_LEGACY: usize = 2 + 5;
// Board number assumed for the legacy 5-byte record
const LEGACY_BOARD_NUMBER: u8 = 3;

/// Board identity carried in the advertisement manufacturer record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct BoardRecord {
    /// 24-bit appearance colour
    pub color: u32,
    /// Folded model-name hash
    pub model: u16,
    /// Board number on the bus
    pub number: u8,
}

/// Parses a manufacturer data payload, vendor prefix included.
///
/// The legacy record omits the board number; those boards are all number 3.
pub fn parse_manufacturer_data(data: &[u8]) -> Option<BoardRecord> {
    let number = match data.len() {
        MANUF_LEN => data[7],
        MANUF_LEN_LEGACY => LEGACY_BOARD_NUMBER,
        _ => return None,
    };

    Some(BoardRecord {
        color: u32::from_le_bytes([data[2], data[3], data[4], 0]),
        model: u16::from_le_bytes([data[5], data[6]]),
        number,
    })
}

/// One advertisement observation handed to the scanner by the BLE stack.
#[derive(Clone, Debug, Default)]
pub struct Advertisement {
    pub address: String,
    pub address_type: u8,
    pub name: Option<String>,
    pub manufacturer_data: Option<Vec<u8>>,
    pub services: Vec<String>,
}

/// A fully discovered board: manufacturer record and name both observed.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct AdvertisedDevice {
    pub address: String,
    pub address_type: u8,
    pub name: String,
    pub record: BoardRecord,
}

#[derive(Default)]
struct DeviceState {
    address: String,
    address_type: u8,
    name: Option<String>,
    record: Option<BoardRecord>,
}

impl DeviceState {
    fn ready(&self) -> Option<AdvertisedDevice> {
        Some(AdvertisedDevice {
            address: self.address.clone(),
            address_type: self.address_type,
            name: self.name.clone()?,
            record: self.record?,
        })
    }
}

#[derive(Default)]
struct ScanState {
    devices: Vec<DeviceState>,
    scanning: bool,
}

/// Discovery registry fed by BLE advertisement callbacks.
///
/// Devices are keyed by address and updated in place; a device becomes observable only
/// once both its manufacturer record and its name have been seen. [stop](Self::stop)
/// drops all results and wakes every waiter empty-handed.
#[derive(Clone, Default)]
pub struct Scanner {
    shared: Arc<ScannerShared>,
}

#[derive(Default)]
struct ScannerShared {
    state: Mutex<ScanState>,
    cond: Condvar,
}

impl Scanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a scan as running; observations are only accepted while scanning.
    pub fn start(&self) {
        self.shared.state.lock().unwrap().scanning = true;
    }

    /// Ends the scan, drops all results and wakes every waiter.
    pub fn stop(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.scanning = false;
        state.devices.clear();
        self.shared.cond.notify_all();
    }

    pub fn is_scanning(&self) -> bool {
        self.shared.state.lock().unwrap().scanning
    }

    /// Feeds one advertisement observation.
    ///
    /// New devices are accepted only when they advertise the CAN service; known devices
    /// update their fields in place on every observation.
    pub fn on_advertisement(&self, adv: &Advertisement) {
        let mut state = self.shared.state.lock().unwrap();
        if !state.scanning {
            return;
        }

        let known = state.devices.iter().any(|d| d.address == adv.address);
        if !known {
            let advertises_service = adv
                .services
                .iter()
                .any(|uuid| uuid.eq_ignore_ascii_case(CAN_SERVICE_UUID));
            if !advertises_service {
                return;
            }
            state.devices.push(DeviceState {
                address: adv.address.clone(),
                address_type: adv.address_type,
                ..DeviceState::default()
            });
        }

        let device = state
            .devices
            .iter_mut()
            .find(|d| d.address == adv.address)
            .expect("device present");

        if let Some(data) = adv.manufacturer_data.as_deref() {
            if let Some(record) = parse_manufacturer_data(data) {
                device.record = Some(record);
            }
        }
        if let Some(name) = adv.name.as_deref() {
            device.name = Some(name.to_string());
        }

        if device.ready().is_some() {
            self.shared.cond.notify_all();
        }
    }

    /// Gets every fully discovered device.
    pub fn devices(&self) -> Vec<AdvertisedDevice> {
        let state = self.shared.state.lock().unwrap();
        state.devices.iter().filter_map(|d| d.ready()).collect()
    }

    /// Waits for a board matching `number` and/or `name`; `None` filters match anything.
    ///
    /// Starts the scan if it is not already running. Returns `None` on timeout or when
    /// the scan is stopped. A match ends the scan.
    pub fn find_board(
        &self,
        number: Option<u8>,
        name: Option<&str>,
        timeout: Duration,
    ) -> Option<AdvertisedDevice> {
        self.find_where(timeout, |device| {
            if let Some(number) = number {
                if device.record.number != number {
                    return false;
                }
            }
            if let Some(name) = name {
                if device.name != name {
                    return false;
                }
            }
            true
        })
    }

    /// Waits for the board at a specific address.
    pub fn find_address(&self, address: &str, timeout: Duration) -> Option<AdvertisedDevice> {
        self.find_where(timeout, |device| device.address.eq_ignore_ascii_case(address))
    }

    fn find_where(
        &self,
        timeout: Duration,
        matches: impl Fn(&AdvertisedDevice) -> bool,
    ) -> Option<AdvertisedDevice> {
        let deadline = Instant::now() + timeout;

        let mut state = self.shared.state.lock().unwrap();
        state.scanning = true;

        loop {
            if let Some(found) = state
                .devices
                .iter()
                .filter_map(|d| d.ready())
                .find(&matches)
            {
                state.scanning = false;
                state.devices.clear();
                return Some(found);
            }
            if !state.scanning {
                return None;
            }

            let remaining = deadline.checked_duration_since(Instant::now())?;
            let (next, timed_out) = self.shared.cond.wait_timeout(state, remaining).unwrap();
            state = next;
            if timed_out.timed_out() {
                state.scanning = false;
                return None;
            }
        }
    }
}

/// Transport half of one GATT tunnel: the glue layer writes the TX characteristic.
pub trait GattLink: Send {
    fn write_tx(&mut self, payload: &[u8]) -> bool;
}

impl<F> GattLink for F
where
    F: FnMut(&[u8]) -> bool + Send,
{
    fn write_tx(&mut self, payload: &[u8]) -> bool {
        self(payload)
    }
}

struct GattCanLink {
    link: Box<dyn GattLink>,
}

impl CanLink for GattCanLink {
    fn write(&mut self, frame: &CanFrame) -> bool {
        self.link.write_tx(&pack_frame(frame))
    }
}

/// One connected board: a dedicated engine bound to a GATT tunnel.
///
/// The glue layer opens the GATT client (stop scanning, require [CAN_SERVICE_UUID] with
/// its TX/RX characteristics, subscribe to RX notifications, request [GATT_MTU]), then
/// hands the write half in as a [GattLink] and routes every RX notification into
/// [on_notify](Self::on_notify). Opening claims the registry; dropping the connection
/// hands the modules back and fails their in-flight waiters.
pub struct Connection {
    network: Network,
}

impl Connection {
    pub fn open(link: Box<dyn GattLink>, registry: &Registry) -> Self {
        Self::with_config(BusConfig::default(), link, registry)
    }

    pub fn with_config(config: BusConfig, link: Box<dyn GattLink>, registry: &Registry) -> Self {
        let network = Network::with_config(config, Box::new(GattCanLink { link }));
        network.attach(registry);
        Self { network }
    }

    /// Gets the network serving this connection.
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Feeds one RX notification payload; it may pack several records.
    pub fn on_notify(&self, payload: &[u8]) {
        for record in FrameStream::new(payload) {
            match record {
                Ok(frame) => self.network.process_frame(&frame),
                Err(err) => {
                    debug!("tunnel payload dropped: {err}");
                    break;
                }
            }
        }
    }

    /// Tears the connection down, failing every in-flight waiter.
    pub fn disconnect(self) {}
}
