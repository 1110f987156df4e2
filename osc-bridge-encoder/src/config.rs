//! Configuration for the encoder bridge.

use std::collections::HashSet;
use std::time::Duration;

use osc_bridge_common::{DEFAULT_DEVICE_NAME, LoggingConfig, OscConfig, OutputFormat};
use osc_bridge_framework::{
    BridgeConfig, BridgeError, HeartbeatConfig, Result, SessionConfig, interval_from_secs,
};
use serde::{Deserialize, Serialize};

/// Complete bridge configuration.
///
/// Every section has defaults, so an empty document is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderBridgeConfig {
    /// Device name, the first segment of every reply address.
    #[serde(default = "default_device_name")]
    pub device_name: String,

    /// OSC endpoint settings
    #[serde(default)]
    pub osc: OscConfig,

    /// Serial line settings
    #[serde(default)]
    pub serial: SerialConfig,

    /// Modbus slave and retry policy
    #[serde(default)]
    pub modbus: ModbusConfig,

    /// Encoder geometry and thresholds
    #[serde(default)]
    pub encoder: EncoderConfig,

    /// Monitor task defaults
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Digital I/O
    #[serde(default)]
    pub gpio: GpioConfig,

    /// Client session liveness
    #[serde(default)]
    pub session: SessionConfig,

    /// Heartbeat broadcast
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_device_name() -> String {
    DEFAULT_DEVICE_NAME.to_string()
}

impl Default for EncoderBridgeConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            osc: OscConfig::default(),
            serial: SerialConfig::default(),
            modbus: ModbusConfig::default(),
            encoder: EncoderConfig::default(),
            monitor: MonitorConfig::default(),
            gpio: GpioConfig::default(),
            session: SessionConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Serial line parameters for the RTU link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM1")
    #[serde(default = "default_serial_port")]
    pub port: String,
    /// Baud rate (default: 9600)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Data bits (default: 8)
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// Parity: "none", "even", or "odd" (default: "none")
    #[serde(default = "default_parity")]
    pub parity: String,
    /// Stop bits: 1 or 2 (default: 1)
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// Per-exchange timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Use the in-process simulated encoder instead of the serial port
    #[serde(default)]
    pub simulate: bool,
}

fn default_serial_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    500
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: default_parity(),
            stop_bits: default_stop_bits(),
            timeout_ms: default_timeout_ms(),
            simulate: false,
        }
    }
}

impl SerialConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Modbus slave address and link supervision policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusConfig {
    /// Modbus slave ID (1-247)
    #[serde(default = "default_slave_address")]
    pub slave_address: u8,
    /// Connect attempts per reconnect cycle
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Pause between attempts within a cycle
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: f64,
    /// Pause between background attempts once a cycle is exhausted
    #[serde(default = "default_background_retry_interval")]
    pub background_retry_interval_secs: f64,
    /// Exchange attempts per register call
    #[serde(default = "default_call_attempts")]
    pub call_attempts: u32,
    /// Backoff unit between exchange attempts
    #[serde(default = "default_call_backoff_ms")]
    pub call_backoff_ms: u64,
    /// Consecutive failures before the link is reported degraded
    #[serde(default = "default_degrade_after")]
    pub degrade_after: u32,
    /// Consecutive failures before the link is torn down
    #[serde(default = "default_disconnect_after")]
    pub disconnect_after: u32,
    /// Idle time after which the health probe runs
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: f64,
    /// Register read by the handshake and health probe
    #[serde(default = "default_probe_register")]
    pub probe_register: u16,
}

fn default_slave_address() -> u8 {
    1
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_interval() -> f64 {
    5.0
}

fn default_background_retry_interval() -> f64 {
    60.0
}

fn default_call_attempts() -> u32 {
    3
}

fn default_call_backoff_ms() -> u64 {
    100
}

fn default_degrade_after() -> u32 {
    3
}

fn default_disconnect_after() -> u32 {
    6
}

fn default_health_check_interval() -> f64 {
    30.0
}

fn default_probe_register() -> u16 {
    crate::registers::DEVICE_ADDRESS
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            slave_address: default_slave_address(),
            max_retries: default_max_retries(),
            retry_interval_secs: default_retry_interval(),
            background_retry_interval_secs: default_background_retry_interval(),
            call_attempts: default_call_attempts(),
            call_backoff_ms: default_call_backoff_ms(),
            degrade_after: default_degrade_after(),
            disconnect_after: default_disconnect_after(),
            health_check_interval_secs: default_health_check_interval(),
            probe_register: default_probe_register(),
        }
    }
}

impl ModbusConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs_f64(self.retry_interval_secs)
    }

    pub fn background_retry_interval(&self) -> Duration {
        Duration::from_secs_f64(self.background_retry_interval_secs)
    }

    pub fn call_backoff(&self) -> Duration {
        Duration::from_millis(self.call_backoff_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs_f64(self.health_check_interval_secs)
    }
}

/// Encoder geometry and interpretation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Counts per revolution
    #[serde(default = "default_resolution")]
    pub resolution: u32,
    /// Speed sampling window configured on the device
    #[serde(default = "default_sampling_time_ms")]
    pub sampling_time_ms: u32,
    /// Below this |rpm| the encoder is reported stopped
    #[serde(default = "default_stop_threshold_rpm")]
    pub stop_threshold_rpm: f64,
    /// Angle jump treated as a lap wrap; half the resolution when unset
    #[serde(default)]
    pub wrap_threshold: Option<u32>,
    /// Write `sampling_time_ms` to the device at startup instead of only
    /// checking it
    #[serde(default)]
    pub write_sampling_time: bool,
}

fn default_resolution() -> u32 {
    4096
}

fn default_sampling_time_ms() -> u32 {
    100
}

fn default_stop_threshold_rpm() -> f64 {
    1.0
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            resolution: default_resolution(),
            sampling_time_ms: default_sampling_time_ms(),
            stop_threshold_rpm: default_stop_threshold_rpm(),
            wrap_threshold: None,
            write_sampling_time: false,
        }
    }
}

impl EncoderConfig {
    /// Effective wrap detection threshold.
    pub fn wrap_threshold(&self) -> u32 {
        self.wrap_threshold.unwrap_or(self.resolution / 2)
    }
}

/// Monitor task defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Interval used when `start_monitor` carries none
    #[serde(default = "default_monitor_interval")]
    pub default_interval_secs: f64,
    /// Format new sessions start with
    #[serde(default)]
    pub default_format: OutputFormat,
    /// Minimum spacing of link-unavailable notices per task
    #[serde(default = "default_degraded_notice")]
    pub degraded_notice_secs: f64,
    /// Consecutive non-link failures that end a task
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
}

fn default_monitor_interval() -> f64 {
    0.5
}

fn default_degraded_notice() -> f64 {
    5.0
}

fn default_max_consecutive_errors() -> u32 {
    5
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            default_interval_secs: default_monitor_interval(),
            default_format: OutputFormat::default(),
            degraded_notice_secs: default_degraded_notice(),
            max_consecutive_errors: default_max_consecutive_errors(),
        }
    }
}

impl MonitorConfig {
    pub fn degraded_notice(&self) -> Duration {
        Duration::from_secs_f64(self.degraded_notice_secs)
    }
}

/// GPIO driver selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpioBackend {
    /// In-memory pins
    #[default]
    Simulated,
    /// Linux `/sys/class/gpio`
    Sysfs,
}

/// Digital I/O pins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpioConfig {
    #[serde(default)]
    pub backend: GpioBackend,
    /// GPIO numbers addressed by index in `/gpio` commands
    #[serde(default = "default_output_pins")]
    pub output_pins: Vec<u32>,
    /// GPIO number read by `/gpio read`
    #[serde(default = "default_input_pin")]
    pub input_pin: u32,
    /// Pulse length when `/gpio pulse` carries none
    #[serde(default = "default_pulse_secs")]
    pub default_pulse_secs: f64,
}

fn default_output_pins() -> Vec<u32> {
    vec![17, 27, 22]
}

fn default_input_pin() -> u32 {
    18
}

fn default_pulse_secs() -> f64 {
    0.5
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            backend: GpioBackend::default(),
            output_pins: default_output_pins(),
            input_pin: default_input_pin(),
            default_pulse_secs: default_pulse_secs(),
        }
    }
}

fn positive(value: f64, name: &str) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(BridgeError::validation(format!("{} must be > 0", name)))
    }
}

impl BridgeConfig for EncoderBridgeConfig {
    fn osc(&self) -> &OscConfig {
        &self.osc
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn device_name(&self) -> &str {
        &self.device_name
    }

    fn session(&self) -> &SessionConfig {
        &self.session
    }

    fn heartbeat(&self) -> &HeartbeatConfig {
        &self.heartbeat
    }

    fn default_format(&self) -> OutputFormat {
        self.monitor.default_format
    }

    fn validate(&self) -> Result<()> {
        self.validate_common()?;

        let serial = &self.serial;
        match serial.parity.to_lowercase().as_str() {
            "none" | "even" | "odd" => {}
            _ => {
                return Err(BridgeError::validation(format!(
                    "invalid parity '{}' (use none, even, or odd)",
                    serial.parity
                )));
            }
        }
        if !matches!(serial.stop_bits, 1 | 2) {
            return Err(BridgeError::validation("serial.stop_bits must be 1 or 2"));
        }
        if !(5..=8).contains(&serial.data_bits) {
            return Err(BridgeError::validation("serial.data_bits must be 5-8"));
        }
        if serial.baud_rate == 0 || serial.timeout_ms == 0 {
            return Err(BridgeError::validation(
                "serial.baud_rate and serial.timeout_ms must be > 0",
            ));
        }

        let modbus = &self.modbus;
        if !(1..=247).contains(&modbus.slave_address) {
            return Err(BridgeError::validation("modbus.slave_address must be 1-247"));
        }
        if modbus.max_retries == 0 || modbus.call_attempts == 0 {
            return Err(BridgeError::validation(
                "modbus.max_retries and modbus.call_attempts must be > 0",
            ));
        }
        if modbus.degrade_after == 0 || modbus.degrade_after > modbus.disconnect_after {
            return Err(BridgeError::validation(
                "modbus.degrade_after must be between 1 and modbus.disconnect_after",
            ));
        }
        interval_from_secs(modbus.retry_interval_secs, "modbus.retry_interval_secs")?;
        interval_from_secs(
            modbus.background_retry_interval_secs,
            "modbus.background_retry_interval_secs",
        )?;
        interval_from_secs(
            modbus.health_check_interval_secs,
            "modbus.health_check_interval_secs",
        )?;

        let encoder = &self.encoder;
        if encoder.resolution < 2 || encoder.resolution > u32::from(u16::MAX) + 1 {
            return Err(BridgeError::validation(
                "encoder.resolution must be between 2 and 65536",
            ));
        }
        if encoder.sampling_time_ms == 0 {
            return Err(BridgeError::validation("encoder.sampling_time_ms must be > 0"));
        }
        positive(encoder.stop_threshold_rpm, "encoder.stop_threshold_rpm")?;
        let wrap = encoder.wrap_threshold();
        if wrap == 0 || wrap >= encoder.resolution {
            return Err(BridgeError::validation(
                "encoder.wrap_threshold must be between 1 and resolution - 1",
            ));
        }

        interval_from_secs(self.monitor.default_interval_secs, "monitor.default_interval_secs")?;
        interval_from_secs(self.monitor.degraded_notice_secs, "monitor.degraded_notice_secs")?;
        if self.monitor.max_consecutive_errors == 0 {
            return Err(BridgeError::validation(
                "monitor.max_consecutive_errors must be > 0",
            ));
        }

        if self.gpio.output_pins.is_empty() {
            return Err(BridgeError::validation("gpio.output_pins cannot be empty"));
        }
        let unique: HashSet<_> = self.gpio.output_pins.iter().collect();
        if unique.len() != self.gpio.output_pins.len() {
            return Err(BridgeError::validation("gpio.output_pins contains duplicates"));
        }
        interval_from_secs(self.gpio.default_pulse_secs, "gpio.default_pulse_secs")?;

        Ok(())
    }
}
