//! Encoder reads through the supervised link.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::encoder::{EncoderModel, Sample};
use crate::error::{LinkError, PollError};
use crate::registers;
use crate::supervisor::ConnectionSupervisor;

/// Reads the encoder registers and feeds the shared [`EncoderModel`].
///
/// The model lock is held across both register reads so concurrent polls
/// from different monitors update the lap state in reading order.
pub struct EncoderPoller {
    link: Arc<ConnectionSupervisor>,
    model: Mutex<EncoderModel>,
}

impl EncoderPoller {
    pub fn new(link: Arc<ConnectionSupervisor>, model: EncoderModel) -> Self {
        Self {
            link,
            model: Mutex::new(model),
        }
    }

    pub fn link(&self) -> &Arc<ConnectionSupervisor> {
        &self.link
    }

    /// Take a fresh reading.
    pub async fn poll(&self) -> Result<Sample, PollError> {
        let mut model = self.model.lock().await;

        let position = u32::from(first(self.link.read_holding(registers::POSITION, 1).await?)?);
        let speed = first(self.link.read_holding(registers::SPEED, 1).await?)?;

        let limit = model.resolution();
        if position >= limit {
            return Err(PollError::InvalidReading {
                register: registers::POSITION,
                value: position,
                limit,
            });
        }

        let sample = model.update(position, registers::speed_from_register(speed));
        debug!(
            angle = sample.angle,
            rpm = sample.rpm,
            laps = sample.laps,
            "Encoder sample"
        );
        Ok(sample)
    }

    /// Zero the angle at the current position.
    ///
    /// Takes a fresh reading first so the offset is never a stale position.
    pub async fn set_zero(&self, reset_laps: bool) -> Result<Sample, PollError> {
        self.poll().await?;
        let sample = self.model.lock().await.set_zero(reset_laps);
        info!(raw = sample.raw_angle, reset_laps, "Zero offset set");
        Ok(sample)
    }

    /// The last reading, without touching the link.
    pub async fn current_sample(&self) -> Sample {
        self.model.lock().await.current_sample()
    }

    /// Make the device's speed sampling window match `sampling_time_ms`,
    /// which the rpm conversion assumes.
    ///
    /// With `write` the register is set; otherwise it is only read and a
    /// mismatch is logged. Returns the device's value.
    pub async fn sync_sampling_time(
        &self,
        sampling_time_ms: u32,
        write: bool,
    ) -> Result<u16, LinkError> {
        let expected = u16::try_from(sampling_time_ms).unwrap_or(u16::MAX);
        if write {
            self.link.write_single(registers::SAMPLING_TIME, expected).await?;
            info!(sampling_time_ms = expected, "Speed sampling time written");
            return Ok(expected);
        }

        let actual = self
            .link
            .read_holding(registers::SAMPLING_TIME, 1)
            .await?
            .first()
            .copied()
            .unwrap_or_default();
        if actual != expected {
            warn!(
                device = actual,
                configured = expected,
                "Device speed sampling time differs from configuration; rpm will be scaled wrong"
            );
        }
        Ok(actual)
    }
}

fn first(values: Vec<u16>) -> Result<u16, PollError> {
    values
        .first()
        .copied()
        .ok_or_else(|| LinkError::DeviceException("empty register response".to_string()).into())
}
