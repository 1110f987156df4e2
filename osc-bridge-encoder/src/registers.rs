//! Encoder holding-register map and raw value conversions.
//!
//! All registers are read with function 0x03 and written with 0x06.

/// Single-turn position, `0..resolution`.
pub const POSITION: u16 = 0x0000;

/// Angular speed, signed 16-bit counts per sampling window.
pub const SPEED: u16 = 0x0003;

/// Device slave address. Stable, so it doubles as the health-probe register.
pub const DEVICE_ADDRESS: u16 = 0x0004;

/// Writing 1 zeroes the device's own position counter.
pub const RESET_ZERO: u16 = 0x0008;

/// Speed sampling window in milliseconds.
pub const SAMPLING_TIME: u16 = 0x000A;

/// Interpret a speed register as two's complement.
pub fn speed_from_register(raw: u16) -> i16 {
    raw as i16
}

/// Encode a signed speed into its register representation.
pub fn speed_to_register(speed: i16) -> u16 {
    speed as u16
}

/// Revolutions per minute for a raw speed reading.
pub fn rpm(raw_speed: i16, resolution: u32, sampling_time_ms: u32) -> f64 {
    let revolutions = f64::from(raw_speed) / f64::from(resolution);
    revolutions / (f64::from(sampling_time_ms) / 60_000.0)
}

/// Degrees for a position count.
pub fn degrees(position: u32, resolution: u32) -> f64 {
    f64::from(position) * 360.0 / f64::from(resolution)
}
