/*! Voltage scaling module: four programmable supply rails.

Each rail pairs a MIC24045 buck converter with an INA219 wattmeter. All four
rails use the same two chip addresses and sit behind their own TCA9548A
channel, so every access selects the rail's channel first and deselects all
channels afterwards, whether or not the access succeeded.
 */

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use thiserror::Error;

use crate::bus::Bus;
use crate::gpio::OutputLine;
use crate::hw::ina219::{Calibration, Ina219, Ina219Error};
use crate::hw::mic24045;
use crate::hw::mic24045::{CurrentLimit, Mic24045, MicError};
use crate::hw::tca9548a::{MuxError, Tca9548a};

/// Number of supply rails.
pub const CHANNELS: u8 = 4;

/// BCM pins wired to the converter enable inputs, rail 1 first.
pub const DEFAULT_ENABLE_PINS: [u8; 4] = [5, 6, 19, 26];

const POWER_GOOD_POLL: Duration = Duration::from_millis(10);

/// VSM result type.
pub type Result<T> = std::result::Result<T, VsmError>;

/// Failure of one chip on a rail.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("converter error")]
    Converter(#[from] MicError),
    #[error("wattmeter error")]
    Meter(#[from] Ina219Error),
}

/// Errors raised by the voltage scaling module.
#[derive(Debug, Error)]
pub enum VsmError {
    /// Rails are numbered 1 to 4.
    #[error("VSM has no channel {0}")]
    InvalidChannel(u8),
    #[error("VSM multiplexer error")]
    Mux(#[from] MuxError),
    #[error("VSM channel {channel} failed")]
    Channel {
        channel: u8,
        #[source]
        source: ChannelError,
    },
    /// Power good did not assert in time.
    #[error("channel {channel} not power good after {timeout:?}")]
    Timeout {
        channel: u8,
        timeout: Duration,
    },
    /// Rails whose converter did not report the requested enable state.
    #[error("channel(s) {channels:?} did not reach enabled = {enabled}")]
    NotSwitched {
        channels: Vec<u8>,
        enabled: bool,
    },
    /// Wrong number of enable lines supplied.
    #[error("expected 4 enable lines, got {0}")]
    EnableLines(usize),
}

/// Addresses and settings of the module.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VsmConfig {
    pub mux_address: u8,
    pub converter_address: u8,
    pub meter_address: u8,
    /// Wattmeter range applied at start-up.
    pub calibration: Calibration,
}

impl Default for VsmConfig {
    fn default() -> VsmConfig {
        VsmConfig {
            mux_address: crate::hw::tca9548a::DEFAULT_ADDRESS,
            converter_address: mic24045::DEFAULT_ADDRESS,
            meter_address: crate::hw::ina219::DEFAULT_ADDRESS,
            calibration: Calibration::Range16V400mA,
        }
    }
}

/// Chips of one rail.
#[derive(Debug)]
pub struct Rail {
    converter: Mic24045,
    meter: Ina219,
}

/// The voltage scaling module.
#[derive(Debug)]
pub struct Vsm {
    mux: Tca9548a,
    rails: Vec<Rail>,
}

fn index_of(channel: u8) -> Result<usize> {
    if (1..=CHANNELS).contains(&channel) {
        Ok((channel - 1) as usize)
    } else {
        Err(VsmError::InvalidChannel(channel))
    }
}

fn all_channels() -> impl Iterator<Item = u8> {
    1..=CHANNELS
}

impl Vsm {
    /// Bring up the module: every converter disabled with defaults applied,
    /// every wattmeter calibrated.
    pub fn new(bus: &Bus, config: &VsmConfig, enable_lines: Vec<Box<dyn OutputLine>>) -> Result<Vsm> {
        if enable_lines.len() != CHANNELS as usize {
            return Err(VsmError::EnableLines(enable_lines.len()));
        }

        let rails = enable_lines.into_iter()
            .map(|line| Rail {
                converter: Mic24045::new(bus, config.converter_address, line),
                meter: Ina219::new(bus, config.meter_address),
            })
            .collect();

        let mut vsm = Vsm {
            mux: Tca9548a::new(bus, config.mux_address),
            rails,
        };
        vsm.mux.deselect()?;

        for channel in all_channels() {
            let calibration = config.calibration;
            vsm.on_channel(channel, |rail| {
                rail.converter.init()?;
                rail.meter.calibrate(calibration)?;
                Ok(())
            })?;
        }
        info!("VSM ready ({:?})", config.calibration);

        Ok(vsm)
    }

    /// Run `op` on a rail with its multiplexer channel selected.
    fn on_channel<F, T>(&mut self, channel: u8, op: F) -> Result<T>
    where
        F: FnOnce(&mut Rail) -> std::result::Result<T, ChannelError>,
    {
        let index = index_of(channel)?;
        let _guard = self.mux.scoped(channel)?;

        op(&mut self.rails[index])
            .map_err(|source| VsmError::Channel { channel, source })
    }

    /// The converter reports its output as enabled.
    pub fn channel_is_enabled(&mut self, channel: u8) -> Result<bool> {
        self.on_channel(channel, |rail| Ok(rail.converter.is_enabled()?))
    }

    /// Drive the enable line high and report the converter's enable state.
    pub fn enable(&mut self, channel: u8) -> Result<bool> {
        self.set_enabled(channel, true)
    }

    /// Drive the enable line low and report the converter's enable state.
    pub fn disable(&mut self, channel: u8) -> Result<bool> {
        self.set_enabled(channel, false)
    }

    fn set_enabled(&mut self, channel: u8, enabled: bool) -> Result<bool> {
        debug!("VSM channel {} enable -> {}", channel, enabled);
        self.on_channel(channel, |rail| {
            if enabled {
                rail.converter.enable()?;
            } else {
                rail.converter.disable()?;
            }
            Ok(rail.converter.is_enabled()?)
        })
    }

    /// Enable every rail; fails listing the rails that stayed off.
    pub fn enable_all(&mut self) -> Result<()> {
        self.set_enabled_all(true)
    }

    /// Disable every rail; fails listing the rails that stayed on.
    pub fn disable_all(&mut self) -> Result<()> {
        self.set_enabled_all(false)
    }

    /// Every line is driven before the outcome is reported.
    fn set_enabled_all(&mut self, enabled: bool) -> Result<()> {
        let mut channels = Vec::new();
        for channel in all_channels() {
            if self.set_enabled(channel, enabled)? != enabled {
                channels.push(channel);
            }
        }

        if channels.is_empty() {
            Ok(())
        } else {
            warn!("VSM channel(s) {:?} did not reach enabled = {}", channels, enabled);
            Err(VsmError::NotSwitched { channels, enabled })
        }
    }

    pub fn set_current_limit(&mut self, channel: u8, limit: CurrentLimit) -> Result<()> {
        self.on_channel(channel, |rail| Ok(rail.converter.set_current_limit(limit)?))
    }

    pub fn set_current_limit_all(&mut self, limit: CurrentLimit) -> Result<()> {
        for channel in all_channels() {
            self.set_current_limit(channel, limit)?;
        }
        Ok(())
    }

    /// Change the wattmeter range of a rail.
    pub fn calibrate(&mut self, channel: u8, calibration: Calibration) -> Result<()> {
        self.on_channel(channel, |rail| Ok(rail.meter.calibrate(calibration)?))
    }

    pub fn calibrate_all(&mut self, calibration: Calibration) -> Result<()> {
        for channel in all_channels() {
            self.calibrate(channel, calibration)?;
        }
        Ok(())
    }

    /// Program a raw Vout code.
    pub fn set_output_code(&mut self, channel: u8, code: u8) -> Result<()> {
        self.on_channel(channel, |rail| Ok(rail.converter.set_output_code(code)?))
    }

    pub fn set_output_code_all(&mut self, code: u8) -> Result<()> {
        for channel in all_channels() {
            self.set_output_code(channel, code)?;
        }
        Ok(())
    }

    /// Program the output voltage; out of range voltages are rejected
    /// before the bus is touched.
    pub fn set_voltage(&mut self, channel: u8, volts: f64) -> Result<()> {
        index_of(channel)?;
        let code = volt_to_code(volts)
            .map_err(|e| VsmError::Channel { channel, source: e.into() })?;
        self.set_output_code(channel, code)
    }

    pub fn set_voltage_all(&mut self, volts: f64) -> Result<()> {
        for channel in all_channels() {
            self.set_voltage(channel, volts)?;
        }
        Ok(())
    }

    /// Programmed Vout code.
    pub fn output_code(&mut self, channel: u8) -> Result<u8> {
        self.on_channel(channel, |rail| Ok(rail.converter.output_code()?))
    }

    pub fn is_power_good(&mut self, channel: u8) -> Result<bool> {
        self.on_channel(channel, |rail| Ok(rail.converter.is_power_good()?))
    }

    pub fn all_power_good(&mut self) -> Result<bool> {
        for channel in all_channels() {
            if !self.is_power_good(channel)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Poll power good every 10 ms until it asserts or `timeout` passes.
    pub fn wait_power_good(&mut self, channel: u8, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        while !self.is_power_good(channel)? {
            if start.elapsed() >= timeout {
                return Err(VsmError::Timeout { channel, timeout });
            }
            thread::sleep(POWER_GOOD_POLL);
        }
        Ok(())
    }

    /// Wait until every rail reports power good, sharing one deadline.
    pub fn wait_all_power_good(&mut self, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        for channel in all_channels() {
            let remaining = timeout.checked_sub(start.elapsed()).unwrap_or_default();
            self.wait_power_good(channel, remaining)
                .map_err(|e| match e {
                    VsmError::Timeout { channel, .. } => VsmError::Timeout { channel, timeout },
                    other => other,
                })?;
        }
        Ok(())
    }

    /// Rail bus voltage in volts.
    pub fn voltage(&mut self, channel: u8) -> Result<f64> {
        self.on_channel(channel, |rail| Ok(rail.meter.bus_voltage()?))
    }

    /// Rail current in milliamps.
    pub fn current(&mut self, channel: u8) -> Result<f64> {
        self.on_channel(channel, |rail| Ok(rail.meter.current()?))
    }

    /// Rail power in milliwatts.
    pub fn power(&mut self, channel: u8) -> Result<f64> {
        self.on_channel(channel, |rail| Ok(rail.meter.power()?))
    }

    /// Voltages of all rails, rail 1 first.
    pub fn voltages(&mut self) -> Result<Vec<f64>> {
        all_channels().map(|channel| self.voltage(channel)).collect()
    }

    /// Currents of all rails, rail 1 first.
    pub fn currents(&mut self) -> Result<Vec<f64>> {
        all_channels().map(|channel| self.current(channel)).collect()
    }
}

/// Vout code for a voltage.
pub fn volt_to_code(volts: f64) -> std::result::Result<u8, MicError> {
    mic24045::volt_to_code(volts)
}

/// Voltage for a Vout code.
pub fn code_to_volt(code: u8) -> f64 {
    mic24045::code_to_volt(code)
}
