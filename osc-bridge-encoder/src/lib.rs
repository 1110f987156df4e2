//! OSC bridge for a Modbus-RTU rotary encoder.
//!
//! Clients talk OSC over UDP; the bridge answers on the client's return
//! address and pushes monitor samples there at the requested interval.
//!
//! # Addresses
//!
//! ```text
//! /whoami
//! /encoder/{set_zero, start_monitor, stop_monitor, read_position, read_speed,
//!           connect, list_monitors}
//! /system/status
//! /gpio <high|low|toggle|pulse|read> [pin] [duration]
//! ```
//!
//! Replies go to `/{device}/...`, failures to `/{device}/error`.
//!
//! # Layers
//!
//! - [`link`] and [`supervisor`] own the serial Modbus link and its health
//! - [`poller`] and [`encoder`] turn register values into [`encoder::Sample`]s
//! - [`monitor`] runs one polling task per client session
//! - [`command`] and [`dispatcher`] are the OSC command surface
//! - [`gpio`] drives the digital output and input lines
//! - [`bridge`] wires everything onto a `BridgeRunner`

pub mod bridge;
pub mod command;
pub mod config;
pub mod dispatcher;
pub mod encoder;
pub mod error;
pub mod format;
pub mod gpio;
pub mod link;
pub mod monitor;
pub mod poller;
pub mod registers;
pub mod simulated;
pub mod supervisor;

pub use bridge::EncoderBridge;
pub use config::EncoderBridgeConfig;
