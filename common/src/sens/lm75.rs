//! LM75 digital temperature sensor.

use std::convert::TryFrom;

use crate::bus::{Bus, Device};
use crate::sens::{Result, SensorError};

#[allow(unused)]
mod register {
    pub const TEMPERATURE: u8 = 0x00;
    pub const CONFIG: u8      = 0x01;
    pub const HYSTERESIS: u8  = 0x02;
    pub const OVERTEMP: u8    = 0x03;
}

/// Address with A0 to A2 grounded.
pub const DEFAULT_ADDRESS: u8 = 0x48;

/// Consecutive faults before OS trips.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FaultQueue {
    One,
    Two,
    Four,
    Six,
}

impl FaultQueue {
    fn code(self) -> u8 {
        self as u8
    }

    fn from_code(code: u8) -> FaultQueue {
        match code & 0b11 {
            0 => FaultQueue::One,
            1 => FaultQueue::Two,
            2 => FaultQueue::Four,
            _ => FaultQueue::Six,
        }
    }
}

impl TryFrom<u8> for FaultQueue {
    type Error = SensorError;

    fn try_from(faults: u8) -> Result<FaultQueue> {
        match faults {
            1 => Ok(FaultQueue::One),
            2 => Ok(FaultQueue::Two),
            4 => Ok(FaultQueue::Four),
            6 => Ok(FaultQueue::Six),
            _ => Err(SensorError::InvalidSetting { what: "fault queue", value: faults as f64 }),
        }
    }
}

/// Configuration register flags.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Config {
    pub shutdown: bool,
    /// OS output in interrupt rather than comparator mode.
    pub interrupt_mode: bool,
    /// OS output active high.
    pub active_high: bool,
    pub fault_queue: FaultQueue,
}

impl From<u8> for Config {
    fn from(raw: u8) -> Config {
        Config {
            shutdown: raw & 0b001 != 0,
            interrupt_mode: raw & 0b010 != 0,
            active_high: raw & 0b100 != 0,
            fault_queue: FaultQueue::from_code(raw >> 3),
        }
    }
}

impl From<Config> for u8 {
    fn from(config: Config) -> u8 {
        (config.shutdown as u8)
            | (config.interrupt_mode as u8) << 1
            | (config.active_high as u8) << 2
            | config.fault_queue.code() << 3
    }
}

/// Temperature register to degrees Celsius.
pub fn raw_to_celsius(raw: i16) -> f64 {
    raw as f64 / 256.0
}

/// Degrees Celsius to temperature register contents.
pub fn celsius_to_raw(celsius: f64) -> i16 {
    (celsius * 256.0) as i16
}

/// Driver for the LM75.
#[derive(Debug)]
pub struct Lm75 {
    device: Device,
}

impl Lm75 {
    pub fn new(bus: &Bus, address: u8) -> Lm75 {
        Lm75 {
            device: bus.device(address),
        }
    }

    pub fn temperature(&self) -> Result<f64> {
        self.read_celsius(register::TEMPERATURE)
    }

    pub fn hysteresis(&self) -> Result<f64> {
        self.read_celsius(register::HYSTERESIS)
    }

    pub fn overtemperature(&self) -> Result<f64> {
        self.read_celsius(register::OVERTEMP)
    }

    pub fn set_hysteresis(&self, celsius: f64) -> Result<()> {
        self.write_celsius(register::HYSTERESIS, celsius)
    }

    pub fn set_overtemperature(&self, celsius: f64) -> Result<()> {
        self.write_celsius(register::OVERTEMP, celsius)
    }

    pub fn config(&self) -> Result<Config> {
        Ok(Config::from(self.device.read_u8(register::CONFIG)?))
    }

    pub fn set_config(&self, config: Config) -> Result<()> {
        self.device.write_u8(register::CONFIG, config.into())?;
        Ok(())
    }

    fn read_celsius(&self, register: u8) -> Result<f64> {
        Ok(raw_to_celsius(self.device.read_i16(register)?))
    }

    fn write_celsius(&self, register: u8, celsius: f64) -> Result<()> {
        self.device.write_u16(register, celsius_to_raw(celsius) as u16)?;
        Ok(())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::bus::mock::{MockBus, RegisterFile, Shared};

    #[test]
    pub fn conversion() {
        assert_eq!(raw_to_celsius(0x1900), 25.0);
        assert_eq!(raw_to_celsius(0x0080), 0.5);
        assert_eq!(raw_to_celsius(0xE700u16 as i16), -25.0);
        assert_eq!(celsius_to_raw(80.0), 0x5000);
        assert_eq!(celsius_to_raw(-0.5), 0xFF80u16 as i16);
    }

    #[test]
    pub fn config_flags() {
        let config = Config {
            shutdown: false,
            interrupt_mode: true,
            active_high: false,
            fault_queue: FaultQueue::Four,
        };
        assert_eq!(u8::from(config), 0b1_0010);
        assert_eq!(Config::from(0b1_0010), config);
        assert_eq!(FaultQueue::try_from(6).unwrap(), FaultQueue::Six);
        assert!(FaultQueue::try_from(3).is_err());
    }

    #[test]
    pub fn thresholds_round_trip_through_chip() {
        let regs = Shared::new(RegisterFile::words().with(register::TEMPERATURE, 0x1680));
        let bus = Bus::new(1, MockBus::new().attach(DEFAULT_ADDRESS, regs.clone()));
        let lm75 = Lm75::new(&bus, DEFAULT_ADDRESS);

        assert_eq!(lm75.temperature().unwrap(), 22.5);
        lm75.set_overtemperature(75.0).unwrap();
        lm75.set_hysteresis(-10.0).unwrap();
        assert_eq!(lm75.overtemperature().unwrap(), 75.0);
        assert_eq!(lm75.hysteresis().unwrap(), -10.0);
        assert_eq!(regs.lock().get(register::OVERTEMP), 0x4B00);

        lm75.set_config(Config::from(0b0000_0001)).unwrap();
        assert!(lm75.config().unwrap().shutdown);
    }
}
