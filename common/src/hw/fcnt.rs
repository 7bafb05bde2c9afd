//! Frequency counter implemented on an auxiliary MCU.

use log::debug;
use thiserror::Error;

use crate::bus::{Bus, BusError, Device};

#[allow(unused)]
mod register {
    pub const CONFIG: u8 = 0x00;
    pub const LSB: u8    = 0x01;
    pub const MSB: u8    = 0x02;
    pub const XMSB: u8   = 0x03;
}

/// Address the counter firmware answers on.
pub const DEFAULT_ADDRESS: u8 = 0x24;

const RESET_BIT: u8 = 7;
const READY_BIT: u8 = 6;
const SAMPLING_SHIFT: u8 = 4;
const RESOLUTION_SHIFT: u8 = 2;
const CHANNEL_SHIFT: u8 = 0;

/// Frequency counter result type.
pub type Result<T> = std::result::Result<T, FcntError>;

/// Errors raised by the frequency counter driver.
#[derive(Debug, Error)]
pub enum FcntError {
    #[error("frequency counter bus error")]
    Bus(#[from] BusError),
    /// No measurement completed yet.
    #[error("frequency measurement not ready")]
    NotReady,
    /// Resolution field holds the reserved value 0.
    #[error("frequency counter resolution not configured")]
    NoResolution,
    #[error("frequency counter has no channel {0}")]
    InvalidChannel(u8),
}

/// Number of gate periods averaged per measurement.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Sampling {
    X1,
    X3,
    X5,
    X10,
}

impl Sampling {
    fn code(self) -> u8 {
        self as u8
    }

    fn from_code(code: u8) -> Sampling {
        match code & 0b11 {
            0 => Sampling::X1,
            1 => Sampling::X3,
            2 => Sampling::X5,
            _ => Sampling::X10,
        }
    }
}

/// Unit of the reported value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Resolution {
    Hz,
    Khz,
    Mhz,
}

impl Resolution {
    fn code(self) -> u8 {
        match self {
            Resolution::Hz => 1,
            Resolution::Khz => 2,
            Resolution::Mhz => 3,
        }
    }

    fn from_code(code: u8) -> Option<Resolution> {
        match code & 0b11 {
            1 => Some(Resolution::Hz),
            2 => Some(Resolution::Khz),
            3 => Some(Resolution::Mhz),
            _ => None,
        }
    }

    /// Hertz per count.
    pub fn multiplier(self) -> f64 {
        match self {
            Resolution::Hz => 1.0,
            Resolution::Khz => 1_000.0,
            Resolution::Mhz => 1_000_000.0,
        }
    }

    /// Bytes of the value register in use.
    pub fn width(self) -> usize {
        match self {
            Resolution::Hz => 3,
            Resolution::Khz => 2,
            Resolution::Mhz => 1,
        }
    }
}

/// Decoded configuration register.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Config {
    /// A measurement is available.
    pub ready: bool,
    pub sampling: Sampling,
    /// `None` while the counter is unconfigured.
    pub resolution: Option<Resolution>,
    /// Input channel 0 to 3.
    pub channel: u8,
}

impl From<u8> for Config {
    fn from(raw: u8) -> Config {
        Config {
            ready: raw & (1 << READY_BIT) != 0,
            sampling: Sampling::from_code(raw >> SAMPLING_SHIFT),
            resolution: Resolution::from_code(raw >> RESOLUTION_SHIFT),
            channel: (raw >> CHANNEL_SHIFT) & 0b11,
        }
    }
}

/// A completed measurement.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frequency {
    /// Counts in units of `resolution`.
    pub value: u32,
    pub resolution: Resolution,
}

impl Frequency {
    /// Value in hertz.
    pub fn hz(&self) -> f64 {
        self.value as f64 * self.resolution.multiplier()
    }
}

/// Driver for the frequency counter.
#[derive(Debug)]
pub struct Fcnt {
    device: Device,
}

impl Fcnt {
    pub fn new(bus: &Bus, address: u8) -> Fcnt {
        Fcnt {
            device: bus.device(address),
        }
    }

    /// Decoded configuration register.
    pub fn config(&self) -> Result<Config> {
        Ok(Config::from(self.device.read_u8(register::CONFIG)?))
    }

    pub fn is_ready(&self) -> Result<bool> {
        self.config().map(|c| c.ready)
    }

    /// Latest measurement.
    pub fn frequency(&self) -> Result<Frequency> {
        let config = self.config()?;
        if !config.ready {
            return Err(FcntError::NotReady);
        }
        let resolution = config.resolution.ok_or(FcntError::NoResolution)?;

        let mut value = self.device.read_u8(register::LSB)? as u32;
        if resolution.width() >= 2 {
            value |= (self.device.read_u8(register::MSB)? as u32) << 8;
        }
        if resolution.width() >= 3 {
            value |= (self.device.read_u8(register::XMSB)? as u32) << 16;
        }
        debug!("FCNT channel {}: {} x {:?}", config.channel, value, resolution);

        Ok(Frequency { value, resolution })
    }

    /// Select input channel 0 to 3.
    pub fn set_channel(&self, channel: u8) -> Result<()> {
        if channel > 3 {
            return Err(FcntError::InvalidChannel(channel));
        }
        self.update(0b11, CHANNEL_SHIFT, channel)
    }

    pub fn set_resolution(&self, resolution: Resolution) -> Result<()> {
        self.update(0b11, RESOLUTION_SHIFT, resolution.code())
    }

    pub fn set_sampling(&self, sampling: Sampling) -> Result<()> {
        self.update(0b11, SAMPLING_SHIFT, sampling.code())
    }

    /// Restart the counter firmware's measurement.
    pub fn reset(&self) -> Result<()> {
        self.update(0b1, RESET_BIT, 1)
    }

    fn update(&self, mask: u8, shift: u8, value: u8) -> Result<()> {
        let old = self.device.read_u8(register::CONFIG)?;
        let new = (old & !(mask << shift)) | ((value & mask) << shift);
        self.device.write_u8(register::CONFIG, new)?;
        Ok(())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::bus::mock::{MockBus, RegisterFile, Shared};

    fn fixture(config: u8) -> (Fcnt, Shared<RegisterFile>) {
        let regs = Shared::new(RegisterFile::bytes()
                               .with(register::CONFIG, config as u16)
                               .with(register::LSB, 0x34)
                               .with(register::MSB, 0x12)
                               .with(register::XMSB, 0x01));
        let bus = Bus::new(1, MockBus::new().attach(DEFAULT_ADDRESS, regs.clone()));
        (Fcnt::new(&bus, DEFAULT_ADDRESS), regs)
    }

    #[test]
    pub fn config_decoding() {
        let config = Config::from(0b0110_1010);
        assert!(config.ready);
        assert_eq!(config.sampling, Sampling::X5);
        assert_eq!(config.resolution, Some(Resolution::Khz));
        assert_eq!(config.channel, 2);
    }

    #[test]
    pub fn value_width_follows_resolution() {
        let (fcnt, _regs) = fixture(0b0100_0100);
        assert_eq!(fcnt.frequency().unwrap().value, 0x01_1234);

        let (fcnt, _regs) = fixture(0b0100_1000);
        let freq = fcnt.frequency().unwrap();
        assert_eq!(freq.value, 0x1234);
        assert!((freq.hz() - 4_660_000.0).abs() < 1e-6);

        let (fcnt, _regs) = fixture(0b0100_1100);
        assert_eq!(fcnt.frequency().unwrap().value, 0x34);
    }

    #[test]
    pub fn not_ready() {
        let (fcnt, _regs) = fixture(0b0000_0100);
        assert!(matches!(fcnt.frequency(), Err(FcntError::NotReady)));

        let (fcnt, _regs) = fixture(0b0100_0000);
        assert!(matches!(fcnt.frequency(), Err(FcntError::NoResolution)));
    }

    #[test]
    pub fn setters_modify_single_field() {
        let (fcnt, regs) = fixture(0b0100_0101);
        fcnt.set_channel(3).unwrap();
        fcnt.set_sampling(Sampling::X10).unwrap();
        fcnt.set_resolution(Resolution::Mhz).unwrap();
        fcnt.reset().unwrap();

        assert_eq!(regs.lock().get(register::CONFIG), 0b1111_1111);
        assert!(fcnt.set_channel(4).is_err());
    }
}
