//! Digital output and input lines.
//!
//! `/gpio` commands address outputs by index into the configured pin list.
//! The controller never touches the encoder link, so GPIO commands are not
//! queued behind register calls.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{GpioBackend, GpioConfig};
use crate::error::GpioFault;

/// Pin driver.
#[async_trait]
pub trait DigitalIo: Send + Sync + 'static {
    /// Prepare a pin as output (`true`) or input.
    async fn setup(&self, pin: u32, output: bool) -> Result<(), GpioFault>;
    async fn write(&self, pin: u32, high: bool) -> Result<(), GpioFault>;
    async fn read(&self, pin: u32) -> Result<bool, GpioFault>;
}

/// In-memory pin table.
#[derive(Debug, Default)]
pub struct SimulatedIo {
    pins: Mutex<HashMap<u32, bool>>,
}

impl SimulatedIo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive an input pin from the outside.
    pub async fn set_input(&self, pin: u32, high: bool) {
        self.pins.lock().await.insert(pin, high);
    }
}

#[async_trait]
impl DigitalIo for SimulatedIo {
    async fn setup(&self, pin: u32, _output: bool) -> Result<(), GpioFault> {
        self.pins.lock().await.entry(pin).or_insert(false);
        Ok(())
    }

    async fn write(&self, pin: u32, high: bool) -> Result<(), GpioFault> {
        self.pins.lock().await.insert(pin, high);
        Ok(())
    }

    async fn read(&self, pin: u32) -> Result<bool, GpioFault> {
        Ok(self.pins.lock().await.get(&pin).copied().unwrap_or(false))
    }
}

/// Linux sysfs GPIO (`/sys/class/gpio`).
#[derive(Debug, Clone)]
pub struct SysfsIo {
    root: PathBuf,
}

impl SysfsIo {
    pub fn new() -> Self {
        Self::with_root("/sys/class/gpio")
    }

    /// Use another sysfs root (tests).
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{}", pin))
    }
}

impl Default for SysfsIo {
    fn default() -> Self {
        Self::new()
    }
}

fn io_fault(pin: u32) -> impl FnOnce(std::io::Error) -> GpioFault {
    move |source| GpioFault::Io { pin, source }
}

#[async_trait]
impl DigitalIo for SysfsIo {
    async fn setup(&self, pin: u32, output: bool) -> Result<(), GpioFault> {
        if !tokio::fs::try_exists(self.pin_dir(pin))
            .await
            .map_err(io_fault(pin))?
        {
            tokio::fs::write(self.root.join("export"), pin.to_string())
                .await
                .map_err(io_fault(pin))?;
        }
        let direction = if output { "out" } else { "in" };
        tokio::fs::write(self.pin_dir(pin).join("direction"), direction)
            .await
            .map_err(io_fault(pin))
    }

    async fn write(&self, pin: u32, high: bool) -> Result<(), GpioFault> {
        let value = if high { "1" } else { "0" };
        tokio::fs::write(self.pin_dir(pin).join("value"), value)
            .await
            .map_err(io_fault(pin))
    }

    async fn read(&self, pin: u32) -> Result<bool, GpioFault> {
        let value = tokio::fs::read_to_string(self.pin_dir(pin).join("value"))
            .await
            .map_err(io_fault(pin))?;
        Ok(value.trim() == "1")
    }
}

/// Result of an output operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinState {
    pub index: usize,
    pub gpio: u32,
    pub high: bool,
}

/// Tracked level of one output. `generation` moves on every write, so a
/// pulse timer can tell whether its pulse is still the latest one.
#[derive(Debug, Clone, Copy, Default)]
struct Output {
    high: bool,
    generation: u64,
}

/// Maps pin indices to GPIO numbers and tracks output state.
#[derive(Clone)]
pub struct GpioController {
    io: Arc<dyn DigitalIo>,
    outputs: Vec<u32>,
    input: u32,
    states: Arc<Mutex<Vec<Output>>>,
}

impl GpioController {
    pub fn new(io: Arc<dyn DigitalIo>, config: &GpioConfig) -> Self {
        Self {
            io,
            outputs: config.output_pins.clone(),
            input: config.input_pin,
            states: Arc::new(Mutex::new(vec![Output::default(); config.output_pins.len()])),
        }
    }

    /// Build the controller for the configured backend.
    pub fn from_config(config: &GpioConfig) -> Self {
        let io: Arc<dyn DigitalIo> = match config.backend {
            GpioBackend::Simulated => Arc::new(SimulatedIo::new()),
            GpioBackend::Sysfs => Arc::new(SysfsIo::new()),
        };
        Self::new(io, config)
    }

    /// Configure every pin and drive outputs low. Failures are logged so a
    /// missing GPIO chip never keeps the encoder bridge from starting.
    pub async fn init(&self) {
        for &pin in &self.outputs {
            let result = match self.io.setup(pin, true).await {
                Ok(()) => self.io.write(pin, false).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(error = %e, "GPIO output setup failed");
            }
        }
        if let Err(e) = self.io.setup(self.input, false).await {
            warn!(error = %e, "GPIO input setup failed");
        }
        info!(outputs = ?self.outputs, input = self.input, "GPIO ready");
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn input_pin(&self) -> u32 {
        self.input
    }

    fn gpio(&self, index: usize) -> Result<u32, GpioFault> {
        self.outputs
            .get(index)
            .copied()
            .ok_or(GpioFault::OutOfRange {
                index,
                available: self.outputs.len(),
            })
    }

    /// Drive an output and return the generation of the write.
    async fn drive(&self, index: usize, high: Option<bool>) -> Result<(PinState, u64), GpioFault> {
        let gpio = self.gpio(index)?;
        let mut states = self.states.lock().await;
        let output = &mut states[index];
        let high = high.unwrap_or(!output.high);
        self.io.write(gpio, high).await?;
        output.high = high;
        output.generation += 1;
        Ok((PinState { index, gpio, high }, output.generation))
    }

    pub async fn set(&self, index: usize, high: bool) -> Result<PinState, GpioFault> {
        let (state, _) = self.drive(index, Some(high)).await?;
        debug!(index, gpio = state.gpio, high, "GPIO set");
        Ok(state)
    }

    pub async fn toggle(&self, index: usize) -> Result<PinState, GpioFault> {
        let (state, _) = self.drive(index, None).await?;
        debug!(index, gpio = state.gpio, high = state.high, "GPIO toggled");
        Ok(state)
    }

    /// Set the pin high and return at once; a timer task drives it low
    /// after `duration` unless the pin was written again in the meantime.
    pub async fn pulse(&self, index: usize, duration: Duration) -> Result<PinState, GpioFault> {
        let (state, generation) = self.drive(index, Some(true)).await?;
        debug!(index, gpio = state.gpio, ?duration, "GPIO pulse");

        let controller = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if let Err(e) = controller.end_pulse(index, generation).await {
                warn!(index, error = %e, "Failed to end GPIO pulse");
            }
        });

        Ok(state)
    }

    async fn end_pulse(&self, index: usize, generation: u64) -> Result<(), GpioFault> {
        let gpio = self.gpio(index)?;
        let mut states = self.states.lock().await;
        let output = &mut states[index];
        if output.generation != generation {
            debug!(index, gpio, "GPIO pulse superseded");
            return Ok(());
        }
        self.io.write(gpio, false).await?;
        output.high = false;
        output.generation += 1;
        Ok(())
    }

    /// Tracked state of an output.
    pub async fn state(&self, index: usize) -> Result<bool, GpioFault> {
        self.gpio(index)?;
        Ok(self.states.lock().await[index].high)
    }

    pub async fn read_input(&self) -> Result<bool, GpioFault> {
        self.io.read(self.input).await
    }
}
