//! Support for the INA219 current sensor.

use std::convert::TryFrom;
use std::thread;
use std::time::Duration;

use log::debug;
use thiserror::Error;

use crate::bus::{Bus, BusError, Device};
use crate::hw::{with_field, PowerMetering};

/// INA219 register addresses.
pub mod register {
    pub const CONFIGURATION: u8 = 0x00;
    pub const SHUNT_VOLTAGE: u8 = 0x01;
    pub const BUS_VOLTAGE: u8   = 0x02;
    pub const POWER: u8         = 0x03;
    pub const CURRENT: u8       = 0x04;
    pub const CALIBRATION: u8   = 0x05;
}

/// Address with both address pins grounded.
pub const DEFAULT_ADDRESS: u8 = 0x40;

/// Writing this to the configuration register resets the chip.
const RESET: u16 = 0x8000;

/// Conversion factor when reading bus voltage (4mV per value).
const BUS_VOLTAGE_LSB: f64 = 0.004;

/// Conversion factor when reading shunt voltage (10uV per value).
const SHUNT_VOLTAGE_LSB: f64 = 0.000_01;

const BRNG_SHIFT: u8 = 13;
const PGA_SHIFT: u8 = 11;
const BADC_SHIFT: u8 = 7;
const SADC_SHIFT: u8 = 3;
const MODE_SHIFT: u8 = 0;

/// INA219 result type.
pub type Result<T> = std::result::Result<T, Ina219Error>;

/// Errors raised by the INA219 driver.
#[derive(Debug, Error)]
pub enum Ina219Error {
    /// Bus transfer failed.
    #[error("INA219 bus error")]
    Bus(#[from] BusError),
    /// Current and power need a calibration first.
    #[error("INA219 at 0x{0:02X} is not calibrated")]
    NotCalibrated(u8),
    /// Averaging only supports powers of two up to 128.
    #[error("unsupported sample count for averaging: {0}")]
    InvalidAveraging(u8),
}

/// Full-scale bus voltage (BRNG).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BusVoltageRange {
    /// 16 V.
    V16,
    /// 32 V.
    V32,
}

impl BusVoltageRange {
    fn code(self) -> u16 {
        match self {
            BusVoltageRange::V16 => 0,
            BusVoltageRange::V32 => 1,
        }
    }
}

/// Shunt voltage amplifier range (PGA).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Gain {
    /// ±40 mV.
    Mv40,
    /// ±80 mV.
    Mv80,
    /// ±160 mV.
    Mv160,
    /// ±320 mV.
    Mv320,
}

impl Gain {
    fn code(self) -> u16 {
        match self {
            Gain::Mv40 => 0,
            Gain::Mv80 => 1,
            Gain::Mv160 => 2,
            Gain::Mv320 => 3,
        }
    }
}

/// ADC resolution or 12-bit averaging (BADC/SADC).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AdcResolution {
    /// 9-bit single sample.
    Bits9,
    /// 10-bit single sample.
    Bits10,
    /// 11-bit single sample.
    Bits11,
    /// 12-bit averaged over 2^n samples (n from 0 to 7).
    Bits12 {
        /// Base two logarithm of the sample count.
        log2_samples: u8,
    },
}

impl AdcResolution {
    /// 12-bit, one sample.
    pub const BITS12: AdcResolution = AdcResolution::Bits12 { log2_samples: 0 };

    /// 12-bit conversion averaged over `samples` samples.
    pub fn averaging(samples: u8) -> Result<AdcResolution> {
        if samples == 0 || !samples.is_power_of_two() {
            return Err(Ina219Error::InvalidAveraging(samples));
        }
        Ok(AdcResolution::Bits12 { log2_samples: samples.trailing_zeros() as u8 })
    }

    fn code(self) -> u16 {
        match self {
            AdcResolution::Bits9 => 0x0,
            AdcResolution::Bits10 => 0x1,
            AdcResolution::Bits11 => 0x2,
            AdcResolution::Bits12 { log2_samples } => 0x8 | (log2_samples as u16 & 0x7),
        }
    }
}

/// Operating mode.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Mode {
    PowerDown,
    ShuntTriggered,
    BusTriggered,
    ShuntBusTriggered,
    AdcOff,
    ShuntContinuous,
    BusContinuous,
    ShuntBusContinuous,
}

impl Mode {
    fn code(self) -> u16 {
        self as u16
    }
}

/// Ranges the boards use the INA219 with (0.1 Ω shunt).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Calibration {
    /// Up to 16 V and 400 mA.
    Range16V400mA,
    /// Up to 16 V and 5 A.
    Range16V5A,
    /// Up to 32 V and 2 A.
    Range32V2A,
    /// Up to 32 V and 1 A.
    Range32V1A,
}

impl Calibration {
    /// Milliamps per current register count.
    pub fn current_lsb(self) -> f64 {
        match self {
            Calibration::Range16V400mA => 0.05,
            Calibration::Range16V5A => 0.1524,
            Calibration::Range32V2A => 0.1,
            Calibration::Range32V1A => 0.04,
        }
    }

    /// Milliwatts per power register count.
    pub fn power_lsb(self) -> f64 {
        match self {
            Calibration::Range16V400mA => 1.0,
            Calibration::Range16V5A => 3.048,
            Calibration::Range32V2A => 2.0,
            Calibration::Range32V1A => 0.8,
        }
    }

    /// Calibration register value, trunc(0.04096 / (current LSB × R shunt)).
    pub fn register_value(self) -> u16 {
        match self {
            Calibration::Range16V400mA => 8192,
            Calibration::Range16V5A => 13434,
            Calibration::Range32V2A => 4096,
            Calibration::Range32V1A => 10240,
        }
    }

    fn bus_range(self) -> BusVoltageRange {
        match self {
            Calibration::Range16V400mA | Calibration::Range16V5A => BusVoltageRange::V16,
            Calibration::Range32V2A | Calibration::Range32V1A => BusVoltageRange::V32,
        }
    }

    fn gain(self) -> Gain {
        match self {
            Calibration::Range16V400mA => Gain::Mv40,
            _ => Gain::Mv320,
        }
    }

    /// Configuration register value this calibration selects.
    pub fn configuration(self) -> u16 {
        let mut config = 0;
        config = with_field(config, 0x1, BRNG_SHIFT, self.bus_range().code());
        config = with_field(config, 0x3, PGA_SHIFT, self.gain().code());
        config = with_field(config, 0xF, BADC_SHIFT, AdcResolution::BITS12.code());
        config = with_field(config, 0xF, SADC_SHIFT, AdcResolution::BITS12.code());
        with_field(config, 0x7, MODE_SHIFT, Mode::ShuntBusContinuous.code())
    }
}

impl TryFrom<&str> for Calibration {
    type Error = String;

    fn try_from(name: &str) -> std::result::Result<Calibration, String> {
        match name {
            "16V400mA" => Ok(Calibration::Range16V400mA),
            "16V5A" => Ok(Calibration::Range16V5A),
            "32V2A" => Ok(Calibration::Range32V2A),
            "32V1A" => Ok(Calibration::Range32V1A),
            _ => Err(format!("unknown INA219 calibration '{}'", name)),
        }
    }
}

/// Flags carried in the bus voltage register.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BusStatus {
    /// A new conversion has completed (CNVR).
    pub conversion_ready: bool,
    /// Power or current calculation overflowed (OVF).
    pub overflow: bool,
}

/// Driver for the TI INA219 current sensor.
#[derive(Debug)]
pub struct Ina219 {
    device: Device,
    calibration: Option<Calibration>,
}

impl Ina219 {
    /// Create a driver for the INA219 at `address`. No bus traffic happens.
    pub fn new(bus: &Bus, address: u8) -> Ina219 {
        Ina219 {
            device: bus.device(address),
            calibration: None,
        }
    }

    /// Chip address.
    pub fn address(&self) -> u8 {
        self.device.address()
    }

    /// Active calibration, if any.
    pub fn calibration(&self) -> Option<Calibration> {
        self.calibration
    }

    /// Reset the INA219.
    pub fn reset(&mut self) -> Result<()> {
        self.device.write_u16(register::CONFIGURATION, RESET)?;
        thread::sleep(Duration::from_micros(40)); // need >=40us after reset.
        self.calibration = None;

        Ok(())
    }

    /// Program calibration and configuration for one of the board ranges.
    pub fn calibrate(&mut self, calibration: Calibration) -> Result<()> {
        self.device.write_u16(register::CALIBRATION, calibration.register_value())?;
        self.device.write_u16(register::CONFIGURATION, calibration.configuration())?;
        self.calibration = Some(calibration);
        debug!("INA219 0x{:02X} calibrated for {:?}", self.address(), calibration);

        Ok(())
    }

    /// Raw configuration register.
    pub fn configuration(&self) -> Result<u16> {
        Ok(self.device.read_u16(register::CONFIGURATION)?)
    }

    /// Select the full-scale bus voltage.
    pub fn set_bus_voltage_range(&self, range: BusVoltageRange) -> Result<()> {
        self.update_config(0x1, BRNG_SHIFT, range.code())
    }

    /// Select the shunt amplifier range.
    pub fn set_gain(&self, gain: Gain) -> Result<()> {
        self.update_config(0x3, PGA_SHIFT, gain.code())
    }

    /// Bus voltage ADC resolution.
    pub fn set_bus_adc(&self, resolution: AdcResolution) -> Result<()> {
        self.update_config(0xF, BADC_SHIFT, resolution.code())
    }

    /// Shunt voltage ADC resolution.
    pub fn set_shunt_adc(&self, resolution: AdcResolution) -> Result<()> {
        self.update_config(0xF, SADC_SHIFT, resolution.code())
    }

    /// Operating mode.
    pub fn set_mode(&self, mode: Mode) -> Result<()> {
        self.update_config(0x7, MODE_SHIFT, mode.code())
    }

    /// Bus voltage in volts.
    pub fn bus_voltage(&self) -> Result<f64> {
        let raw = self.device.read_u16(register::BUS_VOLTAGE)?;
        Ok((raw >> 3) as f64 * BUS_VOLTAGE_LSB)
    }

    /// Conversion-ready and overflow flags.
    pub fn bus_status(&self) -> Result<BusStatus> {
        let raw = self.device.read_u16(register::BUS_VOLTAGE)?;
        Ok(BusStatus {
            conversion_ready: raw & 0b10 != 0,
            overflow: raw & 0b01 != 0,
        })
    }

    /// Shunt voltage in volts.
    pub fn shunt_voltage(&self) -> Result<f64> {
        let raw = self.device.read_i16(register::SHUNT_VOLTAGE)?;
        Ok(raw as f64 * SHUNT_VOLTAGE_LSB)
    }

    /// Current in milliamps.
    pub fn current(&self) -> Result<f64> {
        let calibration = self.require_calibration()?;
        let raw = self.device.read_i16(register::CURRENT)?;
        Ok(raw as f64 * calibration.current_lsb())
    }

    /// Power in milliwatts.
    pub fn power(&self) -> Result<f64> {
        let calibration = self.require_calibration()?;
        let raw = self.device.read_u16(register::POWER)?;
        Ok(raw as f64 * calibration.power_lsb())
    }

    fn require_calibration(&self) -> Result<Calibration> {
        self.calibration.ok_or_else(|| Ina219Error::NotCalibrated(self.address()))
    }

    fn update_config(&self, mask: u16, shift: u8, value: u16) -> Result<()> {
        let config = self.device.read_u16(register::CONFIGURATION)?;
        self.device.write_u16(register::CONFIGURATION, with_field(config, mask, shift, value))?;
        Ok(())
    }
}

impl PowerMetering for Ina219 {
    type Error = Ina219Error;

    fn current_ma(&self) -> Result<f64> {
        self.current()
    }

    fn bus_voltage_v(&self) -> Result<f64> {
        self.bus_voltage()
    }

    fn power_mw(&self) -> Result<f64> {
        self.power()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::bus::mock::{MockBus, RegisterFile, Shared};

    fn fixture() -> (Ina219, Shared<RegisterFile>) {
        let regs = Shared::new(RegisterFile::words().with(register::CONFIGURATION, 0x399F));
        let bus = Bus::new(1, MockBus::new().attach(DEFAULT_ADDRESS, regs.clone()));
        (Ina219::new(&bus, DEFAULT_ADDRESS), regs)
    }

    #[test]
    pub fn calibration_writes_registers() {
        let (mut ina, regs) = fixture();
        ina.calibrate(Calibration::Range32V2A).unwrap();

        let regs = regs.lock();
        assert_eq!(regs.get(register::CALIBRATION), 4096);
        assert_eq!(regs.get(register::CONFIGURATION), 0x3C47);
    }

    #[test]
    pub fn low_range_configuration() {
        // 16 V, 40 mV, 12-bit x1 on both ADCs, shunt and bus continuous.
        assert_eq!(Calibration::Range16V400mA.configuration(), 0x0447);
        assert_eq!(Calibration::Range16V5A.register_value(), 13434);
    }

    #[test]
    pub fn field_setters_only_touch_their_bits() {
        let (ina, regs) = fixture();

        ina.set_gain(Gain::Mv40).unwrap();
        assert_eq!(regs.lock().get(register::CONFIGURATION), 0x399F & !0x1800);

        ina.set_mode(Mode::PowerDown).unwrap();
        assert_eq!(regs.lock().get(register::CONFIGURATION), 0x2198);

        ina.set_shunt_adc(AdcResolution::averaging(128).unwrap()).unwrap();
        assert_eq!(regs.lock().get(register::CONFIGURATION) & 0x0078, 0xF << 3);
    }

    #[test]
    pub fn averaging_needs_power_of_two() {
        assert_eq!(AdcResolution::averaging(16).unwrap(), AdcResolution::Bits12 { log2_samples: 4 });
        assert!(AdcResolution::averaging(3).is_err());
        assert!(AdcResolution::averaging(0).is_err());
    }

    #[test]
    pub fn conversions() {
        let (mut ina, regs) = fixture();
        {
            let mut regs = regs.lock();
            // 3.3 V: 825 counts shifted past CNVR/OVF, conversion ready.
            regs.set(register::BUS_VOLTAGE, (825 << 3) | 0b10);
            regs.set(register::SHUNT_VOLTAGE, (-250i16) as u16);
            regs.set(register::CURRENT, 200);
            regs.set(register::POWER, 33);
        }

        assert!((ina.bus_voltage().unwrap() - 3.3).abs() < 1e-9);
        assert!((ina.shunt_voltage().unwrap() + 0.0025).abs() < 1e-9);
        assert_eq!(ina.bus_status().unwrap(), BusStatus { conversion_ready: true, overflow: false });

        ina.calibrate(Calibration::Range32V2A).unwrap();
        assert!((ina.current().unwrap() - 20.0).abs() < 1e-9);
        assert!((ina.power().unwrap() - 66.0).abs() < 1e-9);
    }

    #[test]
    pub fn negative_current() {
        let (mut ina, regs) = fixture();
        regs.lock().set(register::CURRENT, (-100i16) as u16);
        ina.calibrate(Calibration::Range16V400mA).unwrap();

        assert!((ina.current().unwrap() + 5.0).abs() < 1e-9);
    }

    #[test]
    pub fn uncalibrated_reads_fail() {
        let (mut ina, _regs) = fixture();

        assert!(matches!(ina.current(), Err(Ina219Error::NotCalibrated(0x40))));
        assert!(matches!(ina.power(), Err(Ina219Error::NotCalibrated(0x40))));

        ina.calibrate(Calibration::Range32V1A).unwrap();
        ina.reset().unwrap();
        assert!(ina.current().is_err());
    }
}
