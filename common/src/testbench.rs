/*! The testbench board as a whole.

A [`Testbench`] owns the voltage scaling module, the ADS1115 with its two
thermistor inputs and the two auxiliary INA219 wattmeters. Optional external
sensors are described in the [`SensorConfig`] and opened on demand; the
BME280 is set up on first use and kept.
 */

use std::convert::TryFrom;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Local;
use log::info;
use rppal::gpio;
use thiserror::Error;

use crate::bus::{Bus, BusError};
use crate::data::{DeviceAddress, Quantity, Reading};
use crate::gpio::{GpioLine, OutputLine};
use crate::hw::PowerMetering;
use crate::hw::ads1115;
use crate::hw::ads1115::{Ads1115, Ads1115Error, Input, Mux};
use crate::hw::ina219::{Calibration, Ina219, Ina219Error};
use crate::hw::mic24045::CurrentLimit;
use crate::sens::SensorError;
use crate::sens::bme280;
use crate::sens::bme280::Bme280;
use crate::sens::ds18b20::Ds18b20;
use crate::sens::jt103::Jt103;
use crate::sens::lm75::Lm75;
use crate::sens::stemma;
use crate::sens::stemma::Stemma;
use crate::vsm;
use crate::vsm::{Vsm, VsmConfig, VsmError};

/// Default Raspberry Pi I2C bus.
pub const DEFAULT_BUS: u8 = 1;

/// Addresses of the auxiliary wattmeters.
pub const DEFAULT_AUX_ADDRESSES: [u8; 2] = [0x41, 0x44];

/// Testbench result type.
pub type Result<T> = std::result::Result<T, TestbenchError>;

/// Errors raised by board-level operations.
#[derive(Debug, Error)]
pub enum TestbenchError {
    #[error("failed to open I2C bus")]
    Bus(#[from] BusError),
    #[error("failed to claim enable line")]
    Gpio(#[from] gpio::Error),
    #[error(transparent)]
    Vsm(#[from] VsmError),
    #[error("ADC error")]
    Adc(#[from] Ads1115Error),
    #[error("auxiliary wattmeter error")]
    Meter(#[from] Ina219Error),
    #[error(transparent)]
    Sensor(#[from] SensorError),
    /// Auxiliary channels are 1 and 2.
    #[error("no auxiliary channel {0}")]
    InvalidAuxChannel(u8),
    /// Thermistors are 0 and 1.
    #[error("no thermistor {0}")]
    InvalidThermistor(u8),
    /// The sensor is not part of the configuration.
    #[error("{0} not configured")]
    NotConfigured(&'static str),
}

/// Optional sensors attached to the board.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SensorConfig {
    /// Address of an LM75.
    pub lm75: Option<u8>,
    /// Address of a BME280.
    pub bme280: Option<u8>,
    /// Address of a STEMMA soil sensor.
    pub stemma: Option<u8>,
    /// `w1_slave` files of DS18B20 sensors.
    pub ds18b20: Vec<PathBuf>,
}

/// Everything needed to bring up a testbench.
#[derive(Clone, Debug, PartialEq)]
pub struct TestbenchConfig {
    pub bus: u8,
    pub vsm: VsmConfig,
    /// BCM pins of the rail enable lines, rail 1 first.
    pub enable_pins: [u8; 4],
    pub adc_address: u8,
    pub aux_addresses: [u8; 2],
    pub aux_calibration: Calibration,
    /// Converter current limit applied after start-up, if any.
    pub current_limit: Option<CurrentLimit>,
    pub sensors: SensorConfig,
}

impl Default for TestbenchConfig {
    fn default() -> TestbenchConfig {
        TestbenchConfig {
            bus: DEFAULT_BUS,
            vsm: VsmConfig::default(),
            enable_pins: vsm::DEFAULT_ENABLE_PINS,
            adc_address: ads1115::DEFAULT_ADDRESS,
            aux_addresses: DEFAULT_AUX_ADDRESSES,
            aux_calibration: Calibration::Range16V400mA,
            current_limit: None,
            sensors: SensorConfig::default(),
        }
    }
}

/// A wattmeter on the board.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MeterId {
    /// VSM rail 1 to 4.
    Supply(u8),
    /// Auxiliary wattmeter 1 or 2.
    Aux(u8),
}

impl MeterId {
    /// Every wattmeter, supply rails first.
    pub fn all() -> Vec<MeterId> {
        (1..=vsm::CHANNELS).map(MeterId::Supply)
            .chain((1..=2).map(MeterId::Aux))
            .collect()
    }
}

impl fmt::Display for MeterId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MeterId::Supply(n) => write!(f, "vsm{}", n),
            MeterId::Aux(n) => write!(f, "aux{}", n),
        }
    }
}

impl TryFrom<&str> for MeterId {
    type Error = String;

    fn try_from(label: &str) -> std::result::Result<MeterId, String> {
        let parse = |prefix: &str, max: u8| -> Option<u8> {
            let n: u8 = label.strip_prefix(prefix)?.parse().ok()?;
            if (1..=max).contains(&n) { Some(n) } else { None }
        };

        parse("vsm", vsm::CHANNELS).map(MeterId::Supply)
            .or_else(|| parse("aux", 2).map(MeterId::Aux))
            .ok_or_else(|| format!("unknown channel '{}' (vsm1-vsm4, aux1, aux2)", label))
    }
}

/// The testbench board.
#[derive(Debug)]
pub struct Testbench {
    bus: Bus,
    vsm: Vsm,
    adc: Ads1115,
    aux: [Ina219; 2],
    vsm_meter: u8,
    sensors: SensorConfig,
    bme280: Option<Bme280>,
}

fn sample<M: PowerMetering>(meter: &M) -> std::result::Result<(f64, f64, f64), M::Error> {
    Ok((meter.bus_voltage_v()?, meter.current_ma()?, meter.power_mw()?))
}

fn aux_index(channel: u8) -> Result<usize> {
    match channel {
        1 | 2 => Ok((channel - 1) as usize),
        _ => Err(TestbenchError::InvalidAuxChannel(channel)),
    }
}

impl Testbench {
    /// Open the Raspberry Pi bus and enable lines and bring up the board.
    pub fn open(config: &TestbenchConfig) -> Result<Testbench> {
        let bus = Bus::open(config.bus)?;
        let mut lines: Vec<Box<dyn OutputLine>> = Vec::new();
        for pin in config.enable_pins.iter() {
            lines.push(Box::new(GpioLine::new(*pin)?));
        }

        Testbench::new(&bus, config, lines)
    }

    /// Bring up the board on `bus` with the given enable lines.
    pub fn new(bus: &Bus, config: &TestbenchConfig, enable_lines: Vec<Box<dyn OutputLine>>) -> Result<Testbench> {
        let mut vsm = Vsm::new(bus, &config.vsm, enable_lines)?;
        if let Some(limit) = config.current_limit {
            vsm.set_current_limit_all(limit)?;
        }

        let mut aux = [
            Ina219::new(bus, config.aux_addresses[0]),
            Ina219::new(bus, config.aux_addresses[1]),
        ];
        for meter in aux.iter_mut() {
            meter.calibrate(config.aux_calibration)?;
        }
        info!("testbench ready on i2c-{}", bus.number());

        Ok(Testbench {
            bus: bus.clone(),
            vsm,
            adc: Ads1115::new(bus, config.adc_address),
            aux,
            vsm_meter: config.vsm.meter_address,
            sensors: config.sensors.clone(),
            bme280: None,
        })
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn vsm(&mut self) -> &mut Vsm {
        &mut self.vsm
    }

    pub fn channel_is_enabled(&mut self, channel: u8) -> Result<bool> {
        Ok(self.vsm.channel_is_enabled(channel)?)
    }

    pub fn enable(&mut self, channel: u8) -> Result<bool> {
        Ok(self.vsm.enable(channel)?)
    }

    pub fn disable(&mut self, channel: u8) -> Result<bool> {
        Ok(self.vsm.disable(channel)?)
    }

    pub fn enable_all(&mut self) -> Result<()> {
        Ok(self.vsm.enable_all()?)
    }

    pub fn disable_all(&mut self) -> Result<()> {
        Ok(self.vsm.disable_all()?)
    }

    pub fn set_current_limit(&mut self, channel: u8, limit: CurrentLimit) -> Result<()> {
        Ok(self.vsm.set_current_limit(channel, limit)?)
    }

    pub fn set_current_limit_all(&mut self, limit: CurrentLimit) -> Result<()> {
        Ok(self.vsm.set_current_limit_all(limit)?)
    }

    pub fn calibrate(&mut self, channel: u8, calibration: Calibration) -> Result<()> {
        Ok(self.vsm.calibrate(channel, calibration)?)
    }

    pub fn calibrate_all(&mut self, calibration: Calibration) -> Result<()> {
        Ok(self.vsm.calibrate_all(calibration)?)
    }

    pub fn set_output_code(&mut self, channel: u8, code: u8) -> Result<()> {
        Ok(self.vsm.set_output_code(channel, code)?)
    }

    pub fn set_output_code_all(&mut self, code: u8) -> Result<()> {
        Ok(self.vsm.set_output_code_all(code)?)
    }

    pub fn set_voltage(&mut self, channel: u8, volts: f64) -> Result<()> {
        Ok(self.vsm.set_voltage(channel, volts)?)
    }

    pub fn set_voltage_all(&mut self, volts: f64) -> Result<()> {
        Ok(self.vsm.set_voltage_all(volts)?)
    }

    pub fn is_power_good(&mut self, channel: u8) -> Result<bool> {
        Ok(self.vsm.is_power_good(channel)?)
    }

    pub fn all_power_good(&mut self) -> Result<bool> {
        Ok(self.vsm.all_power_good()?)
    }

    pub fn wait_power_good(&mut self, channel: u8, timeout: Duration) -> Result<()> {
        Ok(self.vsm.wait_power_good(channel, timeout)?)
    }

    pub fn wait_all_power_good(&mut self, timeout: Duration) -> Result<()> {
        Ok(self.vsm.wait_all_power_good(timeout)?)
    }

    pub fn voltage(&mut self, channel: u8) -> Result<f64> {
        Ok(self.vsm.voltage(channel)?)
    }

    pub fn current(&mut self, channel: u8) -> Result<f64> {
        Ok(self.vsm.current(channel)?)
    }

    pub fn voltages(&mut self) -> Result<Vec<f64>> {
        Ok(self.vsm.voltages()?)
    }

    pub fn currents(&mut self) -> Result<Vec<f64>> {
        Ok(self.vsm.currents()?)
    }

    /// Single-ended conversion of ADC input 0 to 3 in raw counts.
    pub fn read_adc(&self, input: u8) -> Result<i16> {
        Ok(self.adc.read_single(input)?)
    }

    /// Temperature of on-board thermistor 0 or 1.
    pub fn read_thermistor(&self, thermistor: u8) -> Result<f64> {
        let input = match thermistor {
            0 => Input::Ain0,
            1 => Input::Ain1,
            _ => return Err(TestbenchError::InvalidThermistor(thermistor)),
        };
        Ok(Jt103::new(input).read_temperature(&self.adc)?)
    }

    /// Raw conversion with explicit multiplexer, gain and rate.
    pub fn read_adc_channel(&self, mux: Mux, gain: ads1115::Gain, rate: ads1115::DataRate) -> Result<i16> {
        Ok(self.adc.read_channel(mux, gain, rate)?)
    }

    pub fn aux_voltage(&self, channel: u8) -> Result<f64> {
        Ok(self.aux[aux_index(channel)?].bus_voltage()?)
    }

    pub fn aux_current(&self, channel: u8) -> Result<f64> {
        Ok(self.aux[aux_index(channel)?].current()?)
    }

    pub fn aux_power(&self, channel: u8) -> Result<f64> {
        Ok(self.aux[aux_index(channel)?].power()?)
    }

    pub fn aux_calibrate(&mut self, channel: u8, calibration: Calibration) -> Result<()> {
        Ok(self.aux[aux_index(channel)?].calibrate(calibration)?)
    }

    /// Voltage, current and power of one wattmeter.
    pub fn measure(&mut self, meter: MeterId) -> Result<(f64, f64, f64)> {
        match meter {
            MeterId::Supply(n) => Ok((self.vsm.voltage(n)?, self.vsm.current(n)?, self.vsm.power(n)?)),
            MeterId::Aux(n) => Ok(sample(&self.aux[aux_index(n)?])?),
        }
    }

    /// Where the chip behind `meter` sits on the bus.
    pub fn meter_address(&self, meter: MeterId) -> Result<DeviceAddress> {
        let bus = self.bus.number();
        match meter {
            MeterId::Supply(n) if (1..=vsm::CHANNELS).contains(&n) => {
                Ok(DeviceAddress::behind_mux(bus, n, self.vsm_meter))
            },
            MeterId::Supply(n) => Err(VsmError::InvalidChannel(n).into()),
            MeterId::Aux(n) => Ok(DeviceAddress::direct(bus, self.aux[aux_index(n)?].address())),
        }
    }

    /// Voltage, current and power of `meters`, all stamped with one timestamp.
    pub fn snapshot_of(&mut self, meters: &[MeterId]) -> Result<Vec<Reading>> {
        let timestamp = Local::now();
        let mut readings = Vec::with_capacity(meters.len() * 3);
        for meter in meters {
            let label = meter.to_string();
            let (volts, milliamps, milliwatts) = self.measure(*meter)?;
            readings.push(Reading::new(timestamp, &label, Quantity::Voltage, volts));
            readings.push(Reading::new(timestamp, &label, Quantity::Current, milliamps));
            readings.push(Reading::new(timestamp, &label, Quantity::Power, milliwatts));
        }

        Ok(readings)
    }

    /// [`Testbench::snapshot_of`] every wattmeter.
    pub fn snapshot(&mut self) -> Result<Vec<Reading>> {
        self.snapshot_of(&MeterId::all())
    }

    /// Configured optional sensors.
    pub fn sensors(&self) -> &SensorConfig {
        &self.sensors
    }

    /// Temperature from the configured LM75.
    pub fn read_lm75(&self) -> Result<f64> {
        let address = self.sensors.lm75.ok_or(TestbenchError::NotConfigured("LM75"))?;
        Ok(Lm75::new(&self.bus, address).temperature()?)
    }

    /// Measurement from the configured BME280.
    pub fn read_bme280(&mut self) -> Result<bme280::Measurement> {
        let address = self.sensors.bme280.ok_or(TestbenchError::NotConfigured("BME280"))?;
        let bme = match self.bme280.take() {
            Some(bme) => bme,
            None => Bme280::new(&self.bus, address)?,
        };
        let measurement = bme.measure();
        self.bme280 = Some(bme);
        Ok(measurement?)
    }

    /// Temperature and moisture from the configured STEMMA soil sensor.
    pub fn read_stemma(&self) -> Result<stemma::Measurement> {
        let address = self.sensors.stemma.ok_or(TestbenchError::NotConfigured("STEMMA"))?;
        Ok(Stemma::new(&self.bus, address).measure()?)
    }

    /// Temperatures of the configured DS18B20 sensors, in configuration order.
    pub fn read_ds18b20(&self) -> Result<Vec<f64>> {
        if self.sensors.ds18b20.is_empty() {
            return Err(TestbenchError::NotConfigured("DS18B20"));
        }
        self.sensors.ds18b20.iter()
            .map(|path| Ok(Ds18b20::new(path).read_temperature()?))
            .collect()
    }
}
