//! Interpretation of raw encoder registers.
//!
//! [`EncoderModel`] turns raw position and speed readings into a
//! [`Sample`]: angle relative to the zero offset, rpm, direction and a
//! signed lap count. It holds no I/O; callers feed it validated readings.

use osc_bridge_common::current_timestamp_secs;
use osc_bridge_framework::Fingerprint;
use serde::Serialize;

use crate::config::EncoderConfig;
use crate::registers;

/// Rotation direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Reverse,
    #[default]
    Stopped,
    Forward,
}

impl Direction {
    /// Wire value: -1, 0 or 1.
    pub fn as_i32(&self) -> i32 {
        match self {
            Direction::Reverse => -1,
            Direction::Stopped => 0,
            Direction::Forward => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Reverse => "reverse",
            Direction::Stopped => "stopped",
            Direction::Forward => "forward",
        }
    }
}

/// One interpreted reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    /// Seconds since epoch.
    pub timestamp: f64,
    pub direction: Direction,
    /// Degrees from the zero offset, `0.0..360.0`.
    pub angle: f64,
    pub rpm: f64,
    pub laps: i64,
    pub raw_angle: u16,
    pub raw_speed: i16,
}

impl Sample {
    /// Content identity used for duplicate suppression. Angle and rpm are
    /// compared at 0.01 resolution; the timestamp is ignored.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&(
            self.direction,
            (self.angle * 100.0).round() as i64,
            (self.rpm * 100.0).round() as i64,
            self.laps,
        ))
    }

    /// Lap count as an OSC int, saturating at the `i32` range.
    pub fn laps_i32(&self) -> i32 {
        i32::try_from(self.laps).unwrap_or(if self.laps < 0 { i32::MIN } else { i32::MAX })
    }
}

/// Encoder state: zero offset, lap count and the last reading.
#[derive(Debug, Clone)]
pub struct EncoderModel {
    resolution: u32,
    sampling_time_ms: u32,
    stop_threshold_rpm: f64,
    wrap_threshold: u32,
    offset: u32,
    laps: i64,
    previous: Option<u32>,
    raw_angle: u32,
    raw_speed: i16,
    timestamp: f64,
}

impl EncoderModel {
    pub fn new(config: &EncoderConfig) -> Self {
        Self {
            resolution: config.resolution,
            sampling_time_ms: config.sampling_time_ms,
            stop_threshold_rpm: config.stop_threshold_rpm,
            wrap_threshold: config.wrap_threshold(),
            offset: 0,
            laps: 0,
            previous: None,
            raw_angle: 0,
            raw_speed: 0,
            timestamp: 0.0,
        }
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Feed a reading. `raw_angle` must be below the resolution.
    pub fn update(&mut self, raw_angle: u32, raw_speed: i16) -> Sample {
        if let Some(previous) = self.previous {
            let delta = i64::from(raw_angle) - i64::from(previous);
            if delta.abs() > i64::from(self.wrap_threshold) {
                // A large negative jump is a forward crossing of zero.
                if delta < 0 {
                    self.laps += 1;
                } else {
                    self.laps -= 1;
                }
            }
        }

        self.previous = Some(raw_angle);
        self.raw_angle = raw_angle;
        self.raw_speed = raw_speed;
        self.timestamp = current_timestamp_secs();
        self.current_sample()
    }

    /// Make the current position the zero angle. Laps are kept unless
    /// `reset_laps` is set.
    pub fn set_zero(&mut self, reset_laps: bool) -> Sample {
        self.offset = self.raw_angle;
        if reset_laps {
            self.laps = 0;
        }
        self.current_sample()
    }

    /// The last reading, interpreted with the current offset.
    pub fn current_sample(&self) -> Sample {
        let rpm = registers::rpm(self.raw_speed, self.resolution, self.sampling_time_ms);
        let relative = (i64::from(self.raw_angle) - i64::from(self.offset))
            .rem_euclid(i64::from(self.resolution)) as u32;

        Sample {
            timestamp: self.timestamp,
            direction: self.direction_for(rpm),
            angle: registers::degrees(relative, self.resolution),
            rpm,
            laps: self.laps,
            raw_angle: self.raw_angle as u16,
            raw_speed: self.raw_speed,
        }
    }

    fn direction_for(&self, rpm: f64) -> Direction {
        if rpm.abs() < self.stop_threshold_rpm {
            Direction::Stopped
        } else if rpm > 0.0 {
            Direction::Forward
        } else {
            Direction::Reverse
        }
    }
}
