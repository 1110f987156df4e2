//! OSC Bridge Framework
//!
//! Common abstractions for building device bridges that serve many OSC
//! clients over UDP.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeRunner`] for managing bridge lifecycle (socket, receive loop, shutdown)
//! - [`MessageHandler`] as the seam where a bridge plugs in its command handling
//! - [`SessionRegistry`] for per-client sessions and their monitor handles
//! - [`HeartbeatBroadcaster`] for liveness broadcast and session expiry
//! - [`OscTransmitter`] for sending replies and pushed data
//! - [`BridgeArgs`] for common CLI argument parsing
//! - [`BridgeStatus`] for standardized status reporting
//!
//! # Example
//!
//! ```ignore
//! use osc_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse_with_default("mybridge.json5");
//!     let config = MyBridgeConfig::load(&args.config)?;
//!
//!     let mut runner = BridgeRunner::new_with_args("mybridge", config, Some(&args)).await?;
//!     runner.serve(Arc::new(MyHandler::new(runner.transmitter(), runner.registry())));
//!     runner.start_heartbeat();
//!
//!     // Run until Ctrl+C
//!     runner.run().await
//! }
//! ```

mod args;
mod config;
mod error;
mod heartbeat;
pub mod packet;
mod runner;
pub mod session;
mod status;
mod transmitter;

pub use args::BridgeArgs;
pub use config::{BridgeConfig, HeartbeatConfig, MIN_INTERVAL, SessionConfig, interval_from_secs};
pub use error::{BridgeError, Result};
pub use heartbeat::HeartbeatBroadcaster;
pub use runner::{BridgeRunner, MessageHandler, receive_loop};
pub use session::{
    Emission, Fingerprint, MonitorHandle, MonitorInfo, Session, SessionKey, SessionRegistry,
    UnknownTask,
};
pub use status::{BridgeStatus, STATUS_PATH};
pub use transmitter::{OscTransmitter, TransmitStats};

// Re-export commonly used types from osc-bridge-common
pub use osc_bridge_common::{LinkState, LoggingConfig, OscConfig, OutputFormat};

// Re-export the OSC types handlers work with
pub use rosc::{OscMessage, OscType};
