//! JT103 NTC thermistors read through the ADS1115.

use crate::hw::ads1115::{Ads1115, DataRate, Gain, Input, Mux};
use crate::sens::{Result, SensorError};

const BETA: f64 = 3435.0;
const R_ROOM: f64 = 10_000.0;
const R_BALANCE: f64 = 10_000.0;
const KELVIN: f64 = 273.15;
const T_ROOM: f64 = KELVIN + 25.0;

/// ADC full scale at gain 1, scaled to the ~5.22 V the Raspberry Pi actually supplies.
const MAX_ADC_CORRECTED: f64 = 32767.0 * (5.22 / 4.096);

/// Convert single-ended ADC counts (gain 1) to degrees Celsius.
pub fn raw_to_celsius(raw: i16) -> Result<f64> {
    if raw <= 0 {
        return Err(SensorError::InvalidRaw(raw as i64));
    }

    let resistance = R_BALANCE / (MAX_ADC_CORRECTED / raw as f64 - 1.0);
    let kelvin = (BETA * T_ROOM) / (BETA + T_ROOM * (resistance / R_ROOM).ln());
    Ok(kelvin - KELVIN)
}

/// Thermistor wired to one ADC input.
#[derive(Clone, Copy, Debug)]
pub struct Jt103 {
    input: Input,
}

impl Jt103 {
    pub fn new(input: Input) -> Jt103 {
        Jt103 { input }
    }

    /// Sample the thermistor input and convert to degrees Celsius.
    pub fn read_temperature(&self, adc: &Ads1115) -> Result<f64> {
        let raw = adc.read_channel(Mux::Single(self.input), Gain::One, DataRate::default())?;
        raw_to_celsius(raw)
    }
}
