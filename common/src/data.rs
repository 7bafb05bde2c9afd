//! Measurement records shared by the drivers and the data writers.

use std::fmt;
use std::fmt::Display;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Where a chip lives: bus, optional multiplexer channel and address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceAddress {
    /// Linux I2C bus number.
    pub bus: u8,
    /// Multiplexer channel (1 to 8) the chip sits behind, if any.
    pub mux_channel: Option<u8>,
    /// Seven-bit chip address.
    pub address: u8,
}

impl DeviceAddress {
    /// Chip directly on `bus`.
    pub fn direct(bus: u8, address: u8) -> DeviceAddress {
        DeviceAddress {
            bus,
            mux_channel: None,
            address,
        }
    }

    /// Chip behind multiplexer channel `channel`.
    pub fn behind_mux(bus: u8, channel: u8, address: u8) -> DeviceAddress {
        DeviceAddress {
            bus,
            mux_channel: Some(channel),
            address,
        }
    }
}

impl Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.mux_channel {
            Some(channel) => write!(f, "i2c-{}/mux{}/0x{:02X}", self.bus, channel, self.address),
            None => write!(f, "i2c-{}/0x{:02X}", self.bus, self.address),
        }
    }
}

/// Physical quantity carried by a [`Reading`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quantity {
    /// Volts.
    Voltage,
    /// Milliamps.
    Current,
    /// Milliwatts.
    Power,
    /// Degrees Celsius.
    Temperature,
    /// Percent relative humidity.
    Humidity,
    /// Hectopascals.
    Pressure,
    /// Hertz.
    Frequency,
    /// Unconverted ADC counts.
    Raw,
}

impl Quantity {
    /// Unit the value is expressed in.
    pub fn unit(&self) -> &'static str {
        match self {
            Quantity::Voltage => "V",
            Quantity::Current => "mA",
            Quantity::Power => "mW",
            Quantity::Temperature => "°C",
            Quantity::Humidity => "%RH",
            Quantity::Pressure => "hPa",
            Quantity::Frequency => "Hz",
            Quantity::Raw => "counts",
        }
    }
}

impl Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Quantity::Voltage => "voltage",
            Quantity::Current => "current",
            Quantity::Power => "power",
            Quantity::Temperature => "temperature",
            Quantity::Humidity => "humidity",
            Quantity::Pressure => "pressure",
            Quantity::Frequency => "frequency",
            Quantity::Raw => "raw",
        };
        write!(f, "{}", name)
    }
}

/// A sampled value.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Reading {
    timestamp: DateTime<Local>,
    channel: String,
    quantity: Quantity,
    value: f64,
    unit: &'static str,
}

impl Reading {
    /// Record `value` as sampled at `timestamp`.
    pub fn new(timestamp: DateTime<Local>, channel: &str, quantity: Quantity, value: f64) -> Reading {
        Reading {
            timestamp,
            channel: channel.to_string(),
            quantity,
            value,
            unit: quantity.unit(),
        }
    }

    /// Record `value` as sampled now.
    pub fn now(channel: &str, quantity: Quantity, value: f64) -> Reading {
        Reading::new(Local::now(), channel, quantity, value)
    }

    /// Time of sampling.
    pub fn timestamp(&self) -> &DateTime<Local> {
        &self.timestamp
    }

    /// Channel label, such as `vsm2` or `aux1`.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// What was measured.
    pub fn quantity(&self) -> Quantity {
        self.quantity
    }

    /// The measured value.
    pub fn value(&self) -> f64 {
        self.value
    }
}

impl Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} {}: {:.3} {}",
               self.timestamp.format("%H:%M:%S%.3f"),
               self.channel,
               self.quantity,
               self.value,
               self.unit)
    }
}

/// One line of a voltage sweep report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepRow {
    /// Vout code, or `mean`/`min`/`max` for summary rows.
    #[serde(rename = "dec")]
    pub dec: String,
    /// Measured bus voltage.
    #[serde(rename = "volt [V]")]
    pub volt: f64,
    /// Measured current.
    #[serde(rename = "current [mA]")]
    pub current: f64,
    /// Computed power.
    #[serde(rename = "power [mW]")]
    pub power: f64,
}

impl SweepRow {
    /// Row for a measured Vout code.
    pub fn step(code: u8, volt: f64, current: f64, power: f64) -> SweepRow {
        SweepRow {
            dec: code.to_string(),
            volt,
            current,
            power,
        }
    }

    /// Vout code of a measured row; `None` for summary rows.
    pub fn code(&self) -> Option<u8> {
        self.dec.parse().ok()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    #[test]
    pub fn address_display() {
        assert_eq!(DeviceAddress::behind_mux(1, 3, 0x40).to_string(), "i2c-1/mux3/0x40");
        assert_eq!(DeviceAddress::direct(1, 0x48).to_string(), "i2c-1/0x48");
    }

    #[test]
    pub fn reading_carries_unit() {
        let reading = Reading::now("vsm1", Quantity::Current, 12.5);
        assert_eq!(reading.quantity().unit(), "mA");
        assert_eq!(reading.channel(), "vsm1");
        assert!(reading.to_string().ends_with("vsm1 current: 12.500 mA"));
    }

    #[test]
    pub fn sweep_row_code() {
        assert_eq!(SweepRow::step(240, 3.3, 10.0, 33.0).code(), Some(240));
        let summary = SweepRow {
            dec: "mean".to_string(),
            volt: 0.0,
            current: 0.0,
            power: 0.0,
        };
        assert_eq!(summary.code(), None);
    }
}
