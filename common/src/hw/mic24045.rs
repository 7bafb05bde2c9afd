/*! Support for the MIC24045 programmable buck converter.

The output voltage is an 8-bit code mapped piecewise onto 0.64 V to 5.25 V:

| code      | voltage                        |
|-----------|--------------------------------|
| 0..=128   | 0.640 V + code × 5 mV          |
| 129..=195 | 1.29 V + (code − 129) × 10 mV  |
| 196..=244 | 1.98 V + (code − 196) × 30 mV  |
| 245..=255 | 4.75 V + (code − 245) × 50 mV  |

Voltages falling between two segments snap to the last code of the lower one.
 */

use std::convert::TryFrom;

use log::debug;
use rppal::gpio;
use thiserror::Error;

use crate::bus::{Bus, BusError, Device};
use crate::gpio::OutputLine;

/// MIC24045 register addresses.
#[allow(unused)]
mod register {
    pub const STATUS: u8   = 0x00;
    pub const SETTING1: u8 = 0x01;
    pub const SETTING2: u8 = 0x02;
    pub const VOUT: u8     = 0x03;
    pub const COMMAND: u8  = 0x04;
}

/// Factory default address.
pub const DEFAULT_ADDRESS: u8 = 0x50;

/// Lowest programmable output voltage.
pub const MIN_VOLTAGE: f64 = 0.64;
/// Highest programmable output voltage.
pub const MAX_VOLTAGE: f64 = 5.25;

/// Absorbs floating point error so grid voltages map onto their own code.
const GRID_TOLERANCE: f64 = 1e-9;

const CIFF: u8 = 0x01;

/// MIC24045 result type.
pub type Result<T> = std::result::Result<T, MicError>;

/// Errors raised by the buck converter driver.
#[derive(Debug, Error)]
pub enum MicError {
    /// Bus transfer failed.
    #[error("MIC24045 bus error")]
    Bus(#[from] BusError),
    /// Driving the enable line failed.
    #[error("MIC24045 enable line error")]
    Gpio(#[from] gpio::Error),
    /// Outside 0.64 V to 5.25 V.
    #[error("output voltage {0} V out of range (0.64 V to 5.25 V)")]
    VoltageOutOfRange(f64),
    /// Cannot step past the ends of the code range.
    #[error("output code already at limit 0x{0:02X}")]
    CodeLimit(u8),
    /// Not one of the selectable settings.
    #[error("invalid {what}: {value}")]
    InvalidSetting {
        /// Name of the setting.
        what: &'static str,
        /// Rejected value.
        value: f64,
    },
}

/// Output current limit (ILIM).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CurrentLimit {
    A2,
    A3,
    A4,
    A5,
}

impl CurrentLimit {
    fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for CurrentLimit {
    type Error = MicError;

    fn try_from(amps: u8) -> Result<CurrentLimit> {
        match amps {
            2 => Ok(CurrentLimit::A2),
            3 => Ok(CurrentLimit::A3),
            4 => Ok(CurrentLimit::A4),
            5 => Ok(CurrentLimit::A5),
            _ => Err(MicError::InvalidSetting { what: "current limit [A]", value: amps as f64 }),
        }
    }
}

/// Switching frequency (FREQ).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SwitchingFrequency {
    Khz310,
    Khz400,
    Khz500,
    Khz570,
    Khz660,
    Khz780,
    Khz970,
    Khz1200,
}

impl SwitchingFrequency {
    fn code(self) -> u8 {
        self as u8
    }
}

/// Start-up delay (SUD).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StartupDelay {
    Ms0,
    Ms0_5,
    Ms1,
    Ms2,
    Ms4,
    Ms6,
    Ms8,
    Ms10,
}

impl StartupDelay {
    fn code(self) -> u8 {
        self as u8
    }
}

/// Output voltage margin (MRG).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Margin {
    /// Nominal voltage.
    Zero,
    /// 5 % below nominal.
    Minus5,
    /// 5 % above nominal.
    Plus5,
}

impl Margin {
    fn code(self) -> u8 {
        self as u8
    }
}

/// Soft start slope (SS).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SoftStart {
    /// 0.16 V/ms.
    Slope0_16,
    /// 0.38 V/ms.
    Slope0_38,
    /// 0.76 V/ms.
    Slope0_76,
    /// 1.5 V/ms.
    Slope1_5,
}

impl SoftStart {
    fn code(self) -> u8 {
        self as u8
    }
}

/// Decoded status register.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Status {
    /// Over-current fault.
    pub over_current: bool,
    /// Thermal shutdown.
    pub thermal_shutdown: bool,
    /// Thermal warning.
    pub thermal_warning: bool,
    /// Output enabled.
    pub enabled: bool,
    /// Power good.
    pub power_good: bool,
}

impl From<u8> for Status {
    fn from(raw: u8) -> Status {
        Status {
            over_current: raw & 0x80 != 0,
            thermal_shutdown: raw & 0x40 != 0,
            thermal_warning: raw & 0x20 != 0,
            enabled: raw & 0x08 != 0,
            power_good: raw & 0x01 != 0,
        }
    }
}

/// Output voltage for a Vout code.
pub fn code_to_volt(code: u8) -> f64 {
    let code = code as f64;
    if code < 129.0 {
        0.640 + code * 0.005
    } else if code < 196.0 {
        1.29 + (code - 129.0) * 0.01
    } else if code < 245.0 {
        1.98 + (code - 196.0) * 0.03
    } else {
        4.75 + (code - 245.0) * 0.05
    }
}

/// Vout code for a voltage; gaps between segments snap downwards.
pub fn volt_to_code(volts: f64) -> Result<u8> {
    let code = if volts < MIN_VOLTAGE || volts > MAX_VOLTAGE + GRID_TOLERANCE || volts.is_nan() {
        return Err(MicError::VoltageOutOfRange(volts));
    } else if volts < 1.28 {
        ((volts - 0.64) / 0.005 + GRID_TOLERANCE) as u8
    } else if volts < 1.29 {
        128
    } else if volts < 1.95 {
        ((volts - 1.29) / 0.01 + GRID_TOLERANCE) as u8 + 129
    } else if volts < 1.98 {
        195
    } else if volts < 3.42 {
        ((volts - 1.98) / 0.03 + GRID_TOLERANCE) as u8 + 196
    } else if volts < 4.75 {
        244
    } else {
        ((volts - 4.75) / 0.05 + GRID_TOLERANCE) as u8 + 245
    };

    Ok(code)
}

/// Driver for the Microchip MIC24045.
pub struct Mic24045 {
    device: Device,
    enable: Box<dyn OutputLine>,
}

impl Mic24045 {
    /// Create a driver for the converter at `address`, switched by `enable`.
    ///
    /// No bus traffic happens; call [`Mic24045::init`] while the chip is
    /// reachable.
    pub fn new(bus: &Bus, address: u8, enable: Box<dyn OutputLine>) -> Mic24045 {
        Mic24045 {
            device: bus.device(address),
            enable,
        }
    }

    /// Disable the output, clear faults and apply the board defaults.
    pub fn init(&mut self) -> Result<()> {
        self.disable()?;
        self.clear_faults()?;
        self.set_current_limit(CurrentLimit::A3)?;
        self.set_frequency(SwitchingFrequency::Khz500)?;
        self.set_startup_delay(StartupDelay::Ms0)?;
        self.set_margin(Margin::Zero)?;
        self.set_soft_start(SoftStart::Slope0_16)?;
        debug!("MIC24045 0x{:02X} initialized", self.device.address());

        Ok(())
    }

    /// Drive the enable line high.
    pub fn enable(&mut self) -> Result<()> {
        self.enable.set(true)?;
        Ok(())
    }

    /// Drive the enable line low.
    pub fn disable(&mut self) -> Result<()> {
        self.enable.set(false)?;
        Ok(())
    }

    /// Level last driven onto the enable line.
    pub fn enable_requested(&self) -> bool {
        self.enable.is_set()
    }

    /// Decoded status register.
    pub fn status(&self) -> Result<Status> {
        Ok(Status::from(self.device.read_u8(register::STATUS)?))
    }

    /// The chip reports its output as enabled.
    pub fn is_enabled(&self) -> Result<bool> {
        self.status().map(|s| s.enabled)
    }

    /// The chip reports power good.
    pub fn is_power_good(&self) -> Result<bool> {
        self.status().map(|s| s.power_good)
    }

    /// Clear the latched fault flags.
    pub fn clear_faults(&self) -> Result<()> {
        self.device.write_u8(register::COMMAND, CIFF)?;
        Ok(())
    }

    /// Output current limit.
    pub fn set_current_limit(&self, limit: CurrentLimit) -> Result<()> {
        self.update(register::SETTING1, 0b11, 6, limit.code())
    }

    /// Switching frequency.
    pub fn set_frequency(&self, frequency: SwitchingFrequency) -> Result<()> {
        self.update(register::SETTING1, 0b111, 3, frequency.code())
    }

    /// Start-up delay.
    pub fn set_startup_delay(&self, delay: StartupDelay) -> Result<()> {
        self.update(register::SETTING2, 0b111, 4, delay.code())
    }

    /// Output voltage margin.
    pub fn set_margin(&self, margin: Margin) -> Result<()> {
        self.update(register::SETTING2, 0b11, 2, margin.code())
    }

    /// Soft start slope.
    pub fn set_soft_start(&self, slope: SoftStart) -> Result<()> {
        self.update(register::SETTING2, 0b11, 0, slope.code())
    }

    /// Program the raw Vout code.
    pub fn set_output_code(&self, code: u8) -> Result<()> {
        self.device.write_u8(register::VOUT, code)?;
        Ok(())
    }

    /// Program the code closest to `volts` from below.
    pub fn set_output_voltage(&self, volts: f64) -> Result<()> {
        self.set_output_code(volt_to_code(volts)?)
    }

    /// Raw Vout code.
    pub fn output_code(&self) -> Result<u8> {
        Ok(self.device.read_u8(register::VOUT)?)
    }

    /// Programmed output voltage.
    pub fn output_voltage(&self) -> Result<f64> {
        self.output_code().map(code_to_volt)
    }

    /// Step the Vout code up by one.
    pub fn increment_output(&self) -> Result<u8> {
        let code = self.output_code()?;
        let next = code.checked_add(1).ok_or(MicError::CodeLimit(code))?;
        self.set_output_code(next)?;
        Ok(next)
    }

    /// Step the Vout code down by one.
    pub fn decrement_output(&self) -> Result<u8> {
        let code = self.output_code()?;
        let next = code.checked_sub(1).ok_or(MicError::CodeLimit(code))?;
        self.set_output_code(next)?;
        Ok(next)
    }

    fn update(&self, register: u8, mask: u8, shift: u8, value: u8) -> Result<()> {
        let old = self.device.read_u8(register)?;
        let new = (old & !(mask << shift)) | ((value & mask) << shift);
        self.device.write_u8(register, new)?;
        Ok(())
    }
}

impl std::fmt::Debug for Mic24045 {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Mic24045")
            .field("device", &self.device)
            .field("enable", &self.enable.is_set())
            .finish()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::bus::mock::{MockBus, RegisterFile, Shared};
    use crate::gpio::MockLine;

    fn fixture() -> (Mic24045, Shared<RegisterFile>, MockLine) {
        let regs = Shared::new(RegisterFile::bytes().with(register::SETTING2, 0xFF));
        let bus = Bus::new(1, MockBus::new().attach(DEFAULT_ADDRESS, regs.clone()));
        let line = MockLine::new();
        let mic = Mic24045::new(&bus, DEFAULT_ADDRESS, Box::new(line.clone()));
        (mic, regs, line)
    }

    #[test]
    pub fn segment_boundaries() {
        assert!((code_to_volt(0) - 0.64).abs() < 1e-9);
        assert!((code_to_volt(128) - 1.28).abs() < 1e-9);
        assert!((code_to_volt(129) - 1.29).abs() < 1e-9);
        assert!((code_to_volt(195) - 1.95).abs() < 1e-9);
        assert!((code_to_volt(196) - 1.98).abs() < 1e-9);
        assert!((code_to_volt(244) - 3.42).abs() < 1e-9);
        assert!((code_to_volt(245) - 4.75).abs() < 1e-9);
        assert!((code_to_volt(255) - 5.25).abs() < 1e-9);
    }

    #[test]
    pub fn every_code_maps_back_onto_itself() {
        for code in 0..=255u8 {
            assert_eq!(volt_to_code(code_to_volt(code)).unwrap(), code);
        }
    }

    #[test]
    pub fn gaps_snap_down() {
        assert_eq!(volt_to_code(1.285).unwrap(), 128);
        assert_eq!(volt_to_code(1.96).unwrap(), 195);
        assert_eq!(volt_to_code(4.0).unwrap(), 244);
        assert_eq!(volt_to_code(1.5).unwrap(), 150);
        assert_eq!(volt_to_code(3.3).unwrap(), 240);
    }

    #[test]
    pub fn voltage_range() {
        assert!(volt_to_code(0.63).is_err());
        assert!(volt_to_code(5.3).is_err());
        assert!(volt_to_code(f64::NAN).is_err());
    }

    #[test]
    pub fn init_applies_defaults() {
        let (mut mic, regs, line) = fixture();
        line.clone().set(true).unwrap();
        mic.init().unwrap();

        assert!(!line.is_set());
        let regs = regs.lock();
        assert_eq!(regs.last_write(register::COMMAND), Some(0x01));
        // ILIM 3 A (01), 500 kHz (010).
        assert_eq!(regs.get(register::SETTING1), 0b0101_0000);
        // Reserved bit 7 preserved, SUD/MRG/SS cleared.
        assert_eq!(regs.get(register::SETTING2), 0b1000_0000);
    }

    #[test]
    pub fn status_flags() {
        let (mic, regs, _line) = fixture();
        regs.lock().set(register::STATUS, 0b1000_1001);

        let status = mic.status().unwrap();
        assert!(status.over_current);
        assert!(status.enabled);
        assert!(status.power_good);
        assert!(!status.thermal_shutdown);
        assert!(!status.thermal_warning);
    }

    #[test]
    pub fn stepping_stops_at_limits() {
        let (mic, regs, _line) = fixture();

        mic.set_output_voltage(3.3).unwrap();
        assert_eq!(regs.lock().get(register::VOUT), 240);
        assert_eq!(mic.increment_output().unwrap(), 241);
        assert_eq!(mic.decrement_output().unwrap(), 240);

        mic.set_output_code(0xFF).unwrap();
        assert!(matches!(mic.increment_output(), Err(MicError::CodeLimit(0xFF))));
        mic.set_output_code(0x00).unwrap();
        assert!(matches!(mic.decrement_output(), Err(MicError::CodeLimit(0x00))));
        assert!((mic.output_voltage().unwrap() - 0.64).abs() < 1e-9);
    }
}
