#![cfg_attr(not(feature = "std"), no_std)]

//! # TotemBUS Protocol
//!
//! This crate implements the TotemBUS command/response protocol used by Totem robotics
//! control boards, and the coordination layer that sits on top of it.
//!
//! The protocol is a length-prefixed, typed framing layered over 8-byte CAN-style records.
//! Commands are identified by a 32-bit FNV-1a hash of their name and carry an optional
//! integer or string argument. A message that does not fit a single record continues in
//! `CompoundExt` records which a [FrameReader](crate::FrameReader) reassembles per source
//! module.
//!
//! The crate is split in two layers:
//!
//! * The codec layer ([`data`], [`frame`], [`writer`], [`reader`], [`message`], [`bus`],
//!   [`tunnel`]) is `no-std` compatible and carries no I/O. It turns a [Data](crate::Data)
//!   record into transport frames and back, and classifies completed records into
//!   [Message](crate::Message) values.
//! * The coordination layer ([`network`], [`module`], [`motor`], [`discovery`],
//!   [`labboard`], behind the `std` feature) owns the background sender, the ping
//!   monitor, per-module response latches and the BLE discovery registry.
//!
//! The engine never touches a medium directly: all outbound records go through a
//! caller-supplied sink, and inbound records are pushed into
//! [TotemBus::process_can](crate::TotemBus::process_can) by whichever transport delivers
//! them (a CAN driver or the BLE GATT tunnel).
//!
//! ## Using with `std`
//!
//! The `std` feature is enabled by default. For a codec-only build:
//!
//! ```toml
//! totembus = { version = "0.3", default-features = false }
//! ```

#[cfg(not(feature = "std"))]
#[macro_use(format, vec)]
extern crate alloc;

#[macro_use(bitfield)]
extern crate bitfield;

#[cfg(not(feature = "std"))]
pub(crate) use core as std;
#[cfg(feature = "std")]
pub(crate) use std;

/// Bus engine: reader pool, frame factories and the send path
pub mod bus;
/// Runtime configuration records
pub mod config;
/// Message payload record and its builder
pub mod data;
/// Library error types
pub mod error;
/// Transport frame and identifier layout
pub mod frame;
/// Command and model name hashes
pub mod hash;
/// Logging convenience helpers
pub mod logging;
mod macros;
/// Classified messages delivered to the upstream layer
pub mod message;
/// Per-source frame reassembly
pub mod reader;
/// BLE GATT tunnel record codec
pub mod tunnel;
/// Frame serialisation of a payload record
pub mod writer;

pub use bus::*;
pub use config::*;
pub use data::*;
pub use frame::*;
pub use hash::*;
pub use logging::*;
pub use message::*;
pub use reader::*;
pub use tunnel::*;
pub use writer::*;

/// Board discovery records and the GATT-tunnelled connection
#[cfg(feature = "std")]
pub mod discovery;
/// Line-oriented serial surface of the lab board
#[cfg(feature = "std")]
pub mod labboard;
/// Module control objects and response latches
#[cfg(feature = "std")]
pub mod module;
/// Drive/turn motor mixer with per-wheel calibration
#[cfg(feature = "std")]
pub mod motor;
/// Outbound queue, ping monitor and module registry
#[cfg(feature = "std")]
pub mod network;

#[cfg(feature = "std")]
pub use discovery::*;
#[cfg(feature = "std")]
pub use labboard::*;
#[cfg(feature = "std")]
pub use module::*;
#[cfg(feature = "std")]
pub use motor::*;
#[cfg(feature = "std")]
pub use network::*;

pub use crate::error::{Error, ErrorCode, ProtocolError, Result};
