//! Adafruit STEMMA capacitive soil sensor (Seesaw firmware).
//!
//! Seesaw registers are addressed by a module base and a function register.
//! A read writes both bytes, waits for the firmware to prepare the answer and
//! then reads the value, most significant byte first.

use std::thread;
use std::time::Duration;

use log::debug;

use crate::bus::{Bus, Device};
use crate::sens::{Result, SensorError};

mod register {
    pub const STATUS_BASE: u8 = 0x00;
    pub const STATUS_TEMP: u8 = 0x04;
    pub const TOUCH_BASE: u8 = 0x0F;
    pub const TOUCH_CHANNEL: u8 = 0x10;
}

pub const DEFAULT_ADDRESS: u8 = 0x36;

/// Time the firmware needs between request and answer.
const READ_DELAY: Duration = Duration::from_millis(5);

/// Largest valid capacitance count; the firmware answers 0xFFFF while busy.
pub const MOISTURE_MAX: u16 = 4095;

const MOISTURE_ATTEMPTS: usize = 3;

/// Degrees Celsius from the 32-bit 16.16 fixed point temperature word.
pub fn raw_to_celsius(raw: u32) -> f64 {
    (raw & 0x3FFF_FFFF) as f64 / 65536.0
}

/// One reading of both channels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Measurement {
    pub celsius: f64,
    /// Capacitance count, 0 (dry) to 4095.
    pub moisture: u16,
}

/// Driver for the STEMMA soil sensor.
#[derive(Debug)]
pub struct Stemma {
    device: Device,
    delay: Duration,
}

impl Stemma {
    pub fn new(bus: &Bus, address: u8) -> Stemma {
        Stemma {
            device: bus.device(address),
            delay: READ_DELAY,
        }
    }

    /// Change the wait between request and answer.
    pub fn with_delay(mut self, delay: Duration) -> Stemma {
        self.delay = delay;
        self
    }

    pub fn temperature(&self) -> Result<f64> {
        let mut data = [0u8; 4];
        self.read(register::STATUS_BASE, register::STATUS_TEMP, &mut data)?;
        Ok(raw_to_celsius(u32::from_be_bytes(data)))
    }

    /// Capacitance count of the sensor; retried while the firmware is busy.
    pub fn moisture(&self) -> Result<u16> {
        let mut raw = u16::MAX;
        for _ in 0..MOISTURE_ATTEMPTS {
            let mut data = [0u8; 2];
            self.read(register::TOUCH_BASE, register::TOUCH_CHANNEL, &mut data)?;
            raw = u16::from_be_bytes(data);
            if raw <= MOISTURE_MAX {
                return Ok(raw);
            }
            debug!("STEMMA 0x{:02X} busy (0x{:04X})", self.device.address(), raw);
        }

        Err(SensorError::InvalidRaw(raw as i64))
    }

    pub fn measure(&self) -> Result<Measurement> {
        Ok(Measurement {
            celsius: self.temperature()?,
            moisture: self.moisture()?,
        })
    }

    fn read(&self, base: u8, function: u8, buffer: &mut [u8]) -> Result<()> {
        self.device.write_bytes(&[base, function])?;
        thread::sleep(self.delay);
        self.device.read_bytes(buffer)?;
        Ok(())
    }
}
