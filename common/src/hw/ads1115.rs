//! Support for the ADS1115 16-bit analog-to-digital converter.

use std::convert::TryFrom;
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use thiserror::Error;

use crate::bus::{Bus, BusError, Device};

/// ADS1115 register addresses.
#[allow(unused)]
mod register {
    pub const CONVERSION: u8 = 0x00;
    pub const CONFIG: u8     = 0x01;
    pub const LO_THRESH: u8  = 0x02;
    pub const HI_THRESH: u8  = 0x03;
}

/// Address with ADDR tied to ground.
pub const DEFAULT_ADDRESS: u8 = 0x48;

/// Operational status: write to start a conversion, reads 1 when idle.
const OS: u16 = 0x8000;
/// Single-shot mode.
const MODE_SINGLE: u16 = 0x0100;
/// Comparator queue disabled.
const COMP_QUEUE_DISABLE: u16 = 0x0003;

/// Polls of the OS bit before a conversion is considered lost.
const READY_POLLS: usize = 10;

/// ADS1115 result type.
pub type Result<T> = std::result::Result<T, Ads1115Error>;

/// Errors raised by the ADS1115 driver.
#[derive(Debug, Error)]
pub enum Ads1115Error {
    /// Bus transfer failed.
    #[error("ADS1115 bus error")]
    Bus(#[from] BusError),
    /// Only inputs 0 to 3 exist.
    #[error("ADS1115 has no input {0}")]
    InvalidInput(u8),
    /// Not a supported programmable gain.
    #[error("unsupported ADS1115 gain {0}")]
    InvalidGain(f64),
    /// Not a supported sample rate.
    #[error("unsupported ADS1115 data rate {0} SPS")]
    InvalidDataRate(u16),
    /// The conversion never completed.
    #[error("ADS1115 conversion did not complete")]
    ConversionTimeout,
}

/// Input multiplexer setting.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Mux {
    /// AIN0 - AIN1.
    Diff0_1,
    /// AIN0 - AIN3.
    Diff0_3,
    /// AIN1 - AIN3.
    Diff1_3,
    /// AIN2 - AIN3.
    Diff2_3,
    /// One input against ground.
    Single(Input),
}

impl Mux {
    /// Single-ended measurement of input `n` (0 to 3).
    pub fn single(n: u8) -> Result<Mux> {
        Input::try_from(n).map(Mux::Single)
    }

    fn code(self) -> u16 {
        match self {
            Mux::Diff0_1 => 0,
            Mux::Diff0_3 => 1,
            Mux::Diff1_3 => 2,
            Mux::Diff2_3 => 3,
            Mux::Single(input) => 4 + input as u16,
        }
    }
}

/// Analog input pin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Input {
    Ain0 = 0,
    Ain1 = 1,
    Ain2 = 2,
    Ain3 = 3,
}

impl TryFrom<u8> for Input {
    type Error = Ads1115Error;

    fn try_from(n: u8) -> Result<Input> {
        match n {
            0 => Ok(Input::Ain0),
            1 => Ok(Input::Ain1),
            2 => Ok(Input::Ain2),
            3 => Ok(Input::Ain3),
            _ => Err(Ads1115Error::InvalidInput(n)),
        }
    }
}

/// Programmable gain amplifier setting.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Gain {
    /// 2/3, ±6.144 V.
    TwoThirds,
    /// 1, ±4.096 V.
    One,
    /// 2, ±2.048 V.
    Two,
    /// 4, ±1.024 V.
    Four,
    /// 8, ±0.512 V.
    Eight,
    /// 16, ±0.256 V.
    Sixteen,
}

impl Gain {
    /// Voltage at full scale.
    pub fn full_scale(self) -> f64 {
        match self {
            Gain::TwoThirds => 6.144,
            Gain::One => 4.096,
            Gain::Two => 2.048,
            Gain::Four => 1.024,
            Gain::Eight => 0.512,
            Gain::Sixteen => 0.256,
        }
    }

    /// Gain matching the nominal factor (2/3, 1, 2, 4, 8 or 16).
    pub fn from_factor(factor: f64) -> Result<Gain> {
        const GAINS: [(f64, Gain); 6] = [
            (2.0 / 3.0, Gain::TwoThirds),
            (1.0, Gain::One),
            (2.0, Gain::Two),
            (4.0, Gain::Four),
            (8.0, Gain::Eight),
            (16.0, Gain::Sixteen),
        ];

        GAINS.iter()
            .find(|(f, _g)| (f - factor).abs() < 1e-6)
            .map(|(_f, g)| *g)
            .ok_or(Ads1115Error::InvalidGain(factor))
    }

    fn code(self) -> u16 {
        self as u16
    }
}

impl Default for Gain {
    fn default() -> Gain {
        Gain::One
    }
}

/// Conversion rate in samples per second.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DataRate {
    Sps8,
    Sps16,
    Sps32,
    Sps64,
    Sps128,
    Sps250,
    Sps475,
    Sps860,
}

impl DataRate {
    const ALL: [DataRate; 8] = [
        DataRate::Sps8, DataRate::Sps16, DataRate::Sps32, DataRate::Sps64,
        DataRate::Sps128, DataRate::Sps250, DataRate::Sps475, DataRate::Sps860,
    ];

    /// Samples per second.
    pub fn sps(self) -> u16 {
        match self {
            DataRate::Sps8 => 8,
            DataRate::Sps16 => 16,
            DataRate::Sps32 => 32,
            DataRate::Sps64 => 64,
            DataRate::Sps128 => 128,
            DataRate::Sps250 => 250,
            DataRate::Sps475 => 475,
            DataRate::Sps860 => 860,
        }
    }

    /// Time one conversion takes, plus a little slack.
    pub fn conversion_time(self) -> Duration {
        Duration::from_micros(1_000_000 / self.sps() as u64 + 100)
    }

    fn code(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for DataRate {
    type Error = Ads1115Error;

    fn try_from(sps: u16) -> Result<DataRate> {
        DataRate::ALL.iter()
            .copied()
            .find(|rate| rate.sps() == sps)
            .ok_or(Ads1115Error::InvalidDataRate(sps))
    }
}

impl Default for DataRate {
    fn default() -> DataRate {
        DataRate::Sps128
    }
}

/// Configuration word starting a single-shot conversion.
pub fn config_word(mux: Mux, gain: Gain, rate: DataRate) -> u16 {
    OS
        | mux.code() << 12
        | gain.code() << 9
        | MODE_SINGLE
        | rate.code() << 5
        | COMP_QUEUE_DISABLE
}

/// Driver for the TI ADS1115.
#[derive(Debug)]
pub struct Ads1115 {
    device: Device,
}

impl Ads1115 {
    /// Create a driver for the ADS1115 at `address`.
    pub fn new(bus: &Bus, address: u8) -> Ads1115 {
        Ads1115 {
            device: bus.device(address),
        }
    }

    /// Chip address.
    pub fn address(&self) -> u8 {
        self.device.address()
    }

    /// Run a single-shot conversion and return the signed result in counts.
    pub fn read_channel(&self, mux: Mux, gain: Gain, rate: DataRate) -> Result<i16> {
        let config = config_word(mux, gain, rate);
        self.device.write_u16(register::CONFIG, config)?;
        thread::sleep(rate.conversion_time());

        self.wait_ready(rate)?;
        let raw = self.device.read_i16(register::CONVERSION)?;
        debug!("ADS1115 {:?} -> {}", mux, raw);

        Ok(raw)
    }

    /// Single-ended conversion of input `n` at the default gain and rate.
    pub fn read_single(&self, n: u8) -> Result<i16> {
        self.read_channel(Mux::single(n)?, Gain::default(), DataRate::default())
    }

    /// Run a conversion and scale the result to volts.
    pub fn read_voltage(&self, mux: Mux, gain: Gain, rate: DataRate) -> Result<f64> {
        let raw = self.read_channel(mux, gain, rate)?;
        Ok(counts_to_volts(raw, gain))
    }

    fn wait_ready(&self, rate: DataRate) -> Result<()> {
        for _ in 0..READY_POLLS {
            if self.device.read_u16(register::CONFIG)? & OS != 0 {
                return Ok(());
            }
            thread::sleep(rate.conversion_time() / 4);
        }

        warn!("ADS1115 0x{:02X} conversion still busy", self.address());
        Err(Ads1115Error::ConversionTimeout)
    }
}

/// Scale a conversion result to volts.
pub fn counts_to_volts(raw: i16, gain: Gain) -> f64 {
    raw as f64 * gain.full_scale() / 32768.0
}
