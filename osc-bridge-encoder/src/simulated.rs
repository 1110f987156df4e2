//! In-process encoder used when no serial hardware is available.
//!
//! Serves the same register map as the device. Each position read while
//! spinning advances the angle by one sampling window of the configured
//! speed, so successive readings are deterministic.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::TransportError;
use crate::link::{Connector, RegisterTransport};
use crate::registers;

#[derive(Debug)]
struct SimState {
    position: u32,
    speed: i16,
    resolution: u32,
    sampling_time_ms: u16,
    slave: u8,
    offline: bool,
    unresponsive: bool,
    /// Bumped when the cable is "pulled", invalidating open transports.
    generation: u64,
    connects: u64,
    exchanges: u64,
}

/// Shared handle to a simulated encoder. Clones control the same device.
#[derive(Debug, Clone)]
pub struct SimulatedEncoder {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedEncoder {
    pub fn new(resolution: u32, sampling_time_ms: u32, slave: u8) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                position: 0,
                speed: 0,
                resolution,
                sampling_time_ms: u16::try_from(sampling_time_ms).unwrap_or(u16::MAX),
                slave,
                offline: false,
                unresponsive: false,
                generation: 0,
                connects: 0,
                exchanges: 0,
            })),
        }
    }

    /// Set the raw speed in counts per sampling window.
    pub async fn set_speed(&self, speed: i16) {
        self.state.lock().await.speed = speed;
    }

    /// Set the raw position register. Values at or above the resolution
    /// emulate a corrupt reading.
    pub async fn set_position(&self, position: u32) {
        self.state.lock().await.position = position;
    }

    pub async fn position(&self) -> u32 {
        self.state.lock().await.position
    }

    /// Emulate pulling (`true`) or reseating (`false`) the cable.
    pub async fn set_offline(&self, offline: bool) {
        let mut state = self.state.lock().await;
        if offline && !state.offline {
            state.generation += 1;
        }
        state.offline = offline;
    }

    /// Stop answering requests without dropping the link.
    pub async fn set_unresponsive(&self, unresponsive: bool) {
        self.state.lock().await.unresponsive = unresponsive;
    }

    /// Successful connects so far.
    pub async fn connects(&self) -> u64 {
        self.state.lock().await.connects
    }

    /// Register exchanges answered so far.
    pub async fn exchanges(&self) -> u64 {
        self.state.lock().await.exchanges
    }
}

#[async_trait]
impl Connector for SimulatedEncoder {
    async fn connect(&self) -> Result<Box<dyn RegisterTransport>, TransportError> {
        let mut state = self.state.lock().await;
        if state.offline {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "simulated encoder is offline",
            )));
        }
        state.connects += 1;
        Ok(Box::new(SimulatedTransport {
            state: self.state.clone(),
            generation: state.generation,
        }))
    }

    fn describe(&self) -> String {
        "simulated encoder".to_string()
    }
}

struct SimulatedTransport {
    state: Arc<Mutex<SimState>>,
    generation: u64,
}

impl SimulatedTransport {
    /// Check the link and count the exchange. Hangs while unresponsive.
    async fn begin(&self) -> Result<tokio::sync::MutexGuard<'_, SimState>, TransportError> {
        let state = self.state.lock().await;
        if state.offline || state.generation != self.generation {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "simulated cable disconnected",
            )));
        }
        if state.unresponsive {
            drop(state);
            std::future::pending::<()>().await;
            return Err(TransportError::Timeout);
        }
        Ok(state)
    }
}

fn illegal_address(address: u16) -> TransportError {
    TransportError::Exception(format!("IllegalDataAddress (0x{:04X})", address))
}

#[async_trait]
impl RegisterTransport for SimulatedTransport {
    async fn read_holding(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let mut state = self.begin().await?;
        state.exchanges += 1;

        let mut values = Vec::with_capacity(usize::from(count));
        for register in address..address.saturating_add(count) {
            let value = match register {
                registers::POSITION => {
                    let current = state.position;
                    if state.speed != 0 && state.position < state.resolution {
                        let res = i64::from(state.resolution);
                        let next = (i64::from(state.position) + i64::from(state.speed)).rem_euclid(res);
                        state.position = next as u32;
                    }
                    current as u16
                }
                registers::SPEED => registers::speed_to_register(state.speed),
                registers::DEVICE_ADDRESS => u16::from(state.slave),
                registers::RESET_ZERO => 0,
                registers::SAMPLING_TIME => state.sampling_time_ms,
                other => return Err(illegal_address(other)),
            };
            values.push(value);
        }
        Ok(values)
    }

    async fn write_single(&mut self, address: u16, value: u16) -> Result<(), TransportError> {
        let mut state = self.begin().await?;
        state.exchanges += 1;

        match address {
            registers::RESET_ZERO if value == 1 => state.position = 0,
            registers::RESET_ZERO => {}
            registers::SAMPLING_TIME => state.sampling_time_ms = value,
            other => return Err(illegal_address(other)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_register_map() {
        let sim = SimulatedEncoder::new(4096, 100, 7);
        sim.set_position(1024).await;
        sim.set_speed(-16).await;

        let mut link = sim.connect().await.unwrap();
        assert_eq!(link.read_holding(registers::DEVICE_ADDRESS, 1).await.unwrap(), vec![7]);
        assert_eq!(link.read_holding(registers::SPEED, 1).await.unwrap(), vec![0xFFF0]);
        assert_eq!(link.read_holding(registers::SAMPLING_TIME, 1).await.unwrap(), vec![100]);
        assert!(matches!(
            link.read_holding(0x0042, 1).await,
            Err(TransportError::Exception(_))
        ));
    }

    #[tokio::test]
    async fn test_position_advances_and_wraps() {
        let sim = SimulatedEncoder::new(4096, 100, 1);
        sim.set_position(4090).await;
        sim.set_speed(10).await;

        let mut link = sim.connect().await.unwrap();
        assert_eq!(link.read_holding(registers::POSITION, 1).await.unwrap(), vec![4090]);
        assert_eq!(link.read_holding(registers::POSITION, 1).await.unwrap(), vec![4]);
    }

    #[tokio::test]
    async fn test_reset_zero_write() {
        let sim = SimulatedEncoder::new(4096, 100, 1);
        sim.set_position(300).await;
        let mut link = sim.connect().await.unwrap();
        link.write_single(registers::RESET_ZERO, 1).await.unwrap();
        assert_eq!(sim.position().await, 0);
    }

    #[tokio::test]
    async fn test_offline_breaks_open_links() {
        let sim = SimulatedEncoder::new(4096, 100, 1);
        let mut link = sim.connect().await.unwrap();

        sim.set_offline(true).await;
        assert!(matches!(
            link.read_holding(registers::POSITION, 1).await,
            Err(TransportError::Io(_))
        ));
        assert!(sim.connect().await.is_err());

        sim.set_offline(false).await;
        // The old link stays dead; a new one works.
        assert!(link.read_holding(registers::POSITION, 1).await.is_err());
        let mut fresh = sim.connect().await.unwrap();
        assert!(fresh.read_holding(registers::POSITION, 1).await.is_ok());
        assert_eq!(sim.connects().await, 2);
    }
}
