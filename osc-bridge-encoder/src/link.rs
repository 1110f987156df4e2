//! Serial link and Modbus-RTU register transport.
//!
//! The supervisor talks to the device only through [`RegisterTransport`],
//! opened by a [`Connector`]. The RTU implementation owns the serial port;
//! framing and CRC come from the `tokio-modbus` RTU codec.

use async_trait::async_trait;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;

use crate::config::SerialConfig;
use crate::error::TransportError;

/// One open link to the device. Exchanges are never interleaved: the
/// supervisor holds the transport exclusively for each call.
#[async_trait]
pub trait RegisterTransport: Send {
    /// Read `count` holding registers starting at `address`.
    async fn read_holding(&mut self, address: u16, count: u16)
    -> Result<Vec<u16>, TransportError>;

    /// Write a single holding register.
    async fn write_single(&mut self, address: u16, value: u16) -> Result<(), TransportError>;
}

/// Opens transports. Called for every reconnect attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn RegisterTransport>, TransportError>;

    /// Short description for logs (port path, "simulated", ...).
    fn describe(&self) -> String;
}

/// Connects to the encoder over a serial port.
#[derive(Debug, Clone)]
pub struct RtuConnector {
    serial: SerialConfig,
    slave: u8,
}

impl RtuConnector {
    pub fn new(serial: SerialConfig, slave: u8) -> Self {
        Self { serial, slave }
    }

    fn builder(&self) -> tokio_serial::SerialPortBuilder {
        let parity = match self.serial.parity.to_lowercase().as_str() {
            "even" => tokio_serial::Parity::Even,
            "odd" => tokio_serial::Parity::Odd,
            _ => tokio_serial::Parity::None,
        };

        let stop_bits = match self.serial.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };

        let data_bits = match self.serial.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };

        tokio_serial::new(&self.serial.port, self.serial.baud_rate)
            .parity(parity)
            .stop_bits(stop_bits)
            .data_bits(data_bits)
            .timeout(self.serial.timeout())
    }
}

#[async_trait]
impl Connector for RtuConnector {
    async fn connect(&self) -> Result<Box<dyn RegisterTransport>, TransportError> {
        let serial = tokio_serial::SerialStream::open(&self.builder()).map_err(|e| {
            TransportError::Io(std::io::Error::other(format!(
                "serial open {} failed: {}",
                self.serial.port, e
            )))
        })?;

        let ctx = rtu::attach_slave(serial, Slave(self.slave));
        Ok(Box::new(RtuTransport { ctx }))
    }

    fn describe(&self) -> String {
        format!(
            "{} @ {} baud, slave {}",
            self.serial.port, self.serial.baud_rate, self.slave
        )
    }
}

/// An attached Modbus-RTU client context.
pub struct RtuTransport {
    ctx: Context,
}

fn transport_error(err: tokio_modbus::Error) -> TransportError {
    match err {
        tokio_modbus::Error::Transport(e) if e.kind() == std::io::ErrorKind::TimedOut => {
            TransportError::Timeout
        }
        tokio_modbus::Error::Transport(e) => TransportError::Io(e),
        other => TransportError::Protocol(other.to_string()),
    }
}

#[async_trait]
impl RegisterTransport for RtuTransport {
    async fn read_holding(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        self.ctx
            .read_holding_registers(address, count)
            .await
            .map_err(transport_error)?
            .map_err(|e| TransportError::Exception(format!("{:?}", e)))
    }

    async fn write_single(&mut self, address: u16, value: u16) -> Result<(), TransportError> {
        self.ctx
            .write_single_register(address, value)
            .await
            .map_err(transport_error)?
            .map_err(|e| TransportError::Exception(format!("{:?}", e)))
    }
}
