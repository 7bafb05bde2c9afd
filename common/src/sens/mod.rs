//! Environmental sensors that can be attached to the testbench.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::bus::BusError;
use crate::hw::ads1115::Ads1115Error;

pub mod bme280;
pub mod ds18b20;
pub mod jt103;
pub mod lm75;
pub mod shtc3;
pub mod stemma;

/// Sensor result type.
pub type Result<T> = std::result::Result<T, SensorError>;

/// Errors raised while reading a sensor.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor bus error")]
    Bus(#[from] BusError),
    #[error("thermistor ADC error")]
    Adc(#[from] Ads1115Error),
    #[error("sensor I/O error")]
    Io(#[from] io::Error),
    /// Checksum sent by the sensor does not match the data.
    #[error("CRC mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    Crc {
        expected: u8,
        actual: u8,
    },
    /// The chip identifies as something else.
    #[error("unexpected chip id 0x{actual:02X} (expected 0x{expected:02X})")]
    ChipId {
        expected: u8,
        actual: u8,
    },
    /// A value the conversion cannot handle.
    #[error("invalid raw reading {0}")]
    InvalidRaw(i64),
    /// Not one of the selectable settings.
    #[error("invalid {what}: {value}")]
    InvalidSetting {
        what: &'static str,
        value: f64,
    },
    /// Measurement did not finish in time.
    #[error("sensor measurement timed out")]
    Timeout,
    /// One-wire slave never produced a valid reading.
    #[error("no valid reading from {}", .0.display())]
    Unreadable(PathBuf),
}
