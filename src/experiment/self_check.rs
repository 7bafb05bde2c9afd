/*! Board self-test.

Walks through the supply enables, every wattmeter, the ADC and the optional
sensors, printing each step with its outcome. The run stops at the first
failing step.
 */

use std::error::Error as StdError;
use std::io::Write;

use log::{info, warn};

use etb_common::testbench::{MeterId, Testbench};
use etb_common::vsm::CHANNELS;

use super::{error_chain, Result};

/// Detail line on success, reason on failure.
type Outcome = std::result::Result<String, String>;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SelfCheckOptions {
    /// Thermistor inputs to read.
    pub thermistors: Vec<u8>,
}

fn failed<E: StdError>(e: E) -> String {
    error_chain(&e)
}

struct Report<'a> {
    out: &'a mut dyn Write,
    passed: usize,
}

impl<'a> Report<'a> {
    fn section(&mut self, title: &str) -> Result<()> {
        writeln!(self.out, "=== {} ===", title)?;
        Ok(())
    }

    /// Print a step; returns whether it passed.
    fn step(&mut self, name: &str, outcome: Outcome) -> Result<bool> {
        writeln!(self.out, "-> {}", name)?;
        match outcome {
            Ok(detail) => {
                if !detail.is_empty() {
                    writeln!(self.out, "   {}", detail)?;
                }
                writeln!(self.out, "   => OK")?;
                self.passed += 1;
                Ok(true)
            },
            Err(reason) => {
                writeln!(self.out, "   {}", reason)?;
                writeln!(self.out, "   => FAIL")?;
                warn!("self-check step '{}' failed: {}", name, reason);
                Ok(false)
            },
        }
    }
}

/// Read back the enable state of every rail and compare with `expected`.
fn enable_states(tb: &mut Testbench, expected: &[bool]) -> Outcome {
    let mut states = Vec::with_capacity(expected.len());
    for channel in 1..=CHANNELS {
        states.push(tb.channel_is_enabled(channel).map_err(failed)?);
    }

    let detail = states.iter()
        .enumerate()
        .map(|(i, on)| format!("ch{} = {}", i + 1, *on as u8))
        .collect::<Vec<_>>()
        .join(" | ");

    if states == expected { Ok(detail) } else { Err(detail) }
}

fn disable_all(tb: &mut Testbench) -> Outcome {
    tb.disable_all().map_err(failed)?;
    enable_states(tb, &[false; CHANNELS as usize])
}

fn enable_up_to(tb: &mut Testbench, channel: u8) -> Outcome {
    tb.enable(channel).map_err(failed)?;
    let expected: Vec<bool> = (1..=CHANNELS).map(|c| c <= channel).collect();
    enable_states(tb, &expected)
}

fn meter(tb: &mut Testbench, meter: MeterId) -> Outcome {
    let address = tb.meter_address(meter).map_err(failed)?;
    let (volts, milliamps, _) = tb.measure(meter).map_err(failed)?;
    Ok(format!("V = {:.2} V | I = {:.2} mA @ {}", volts, milliamps, address))
}

/// Run the self-test, writing the report to `out`. Returns false if a step failed.
pub fn run(tb: &mut Testbench, options: &SelfCheckOptions, out: &mut dyn Write) -> Result<bool> {
    writeln!(out, "===== ETB SELF-TEST START =====")?;
    let mut report = Report { out, passed: 0 };
    let passed = steps(&mut report, tb, options)?;

    if passed {
        info!("self-check passed ({} steps)", report.passed);
        writeln!(report.out, "===== ETB SELF-TEST PASSED =====")?;
    } else {
        writeln!(report.out, "===== ETB SELF-TEST FAILED =====")?;
    }
    Ok(passed)
}

fn steps(report: &mut Report, tb: &mut Testbench, options: &SelfCheckOptions) -> Result<bool> {
    report.section("MIC (supply)")?;
    if !report.step("Disable all", disable_all(tb))? {
        return Ok(false);
    }
    for channel in 1..=CHANNELS {
        if !report.step(&format!("Enable ch{}", channel), enable_up_to(tb, channel))? {
            return Ok(false);
        }
    }
    if !report.step("Disable all again", disable_all(tb))? {
        return Ok(false);
    }

    report.section("INA (wattmeter)")?;
    for id in MeterId::all() {
        if !report.step(&id.to_string(), meter(tb, id))? {
            return Ok(false);
        }
    }

    report.section("ADS1115 (ADC)")?;
    for input in 0..4 {
        let outcome = tb.read_adc(input)
            .map(|raw| format!("raw = {}", raw))
            .map_err(failed);
        if !report.step(&format!("adc{}", input), outcome)? {
            return Ok(false);
        }
    }
    for thermistor in &options.thermistors {
        let outcome = tb.read_thermistor(*thermistor)
            .map(|celsius| format!("T = {:.2} °C", celsius))
            .map_err(failed);
        if !report.step(&format!("thermistor{}", thermistor), outcome)? {
            return Ok(false);
        }
    }

    let sensors = tb.sensors().clone();
    if !sensors.ds18b20.is_empty() || sensors.lm75.is_some() || sensors.bme280.is_some()
        || sensors.stemma.is_some()
    {
        report.section("Sensors")?;
    }
    if !sensors.ds18b20.is_empty() {
        let outcome = tb.read_ds18b20()
            .map(|temps| temps.iter()
                 .map(|t| format!("{:.2} °C", t))
                 .collect::<Vec<_>>()
                 .join(" | "))
            .map_err(failed);
        if !report.step("DS18B20", outcome)? {
            return Ok(false);
        }
    }
    if sensors.lm75.is_some() {
        let outcome = tb.read_lm75()
            .map(|celsius| format!("T = {:.2} °C", celsius))
            .map_err(failed);
        if !report.step("LM75", outcome)? {
            return Ok(false);
        }
    }
    if sensors.bme280.is_some() {
        let outcome = tb.read_bme280()
            .map(|m| format!("T = {:.2} °C | p = {:.2} hPa | RH = {:.2} %", m.celsius, m.pressure, m.humidity))
            .map_err(failed);
        if !report.step("BME280", outcome)? {
            return Ok(false);
        }
    }
    if sensors.stemma.is_some() {
        let outcome = tb.read_stemma()
            .map(|m| format!("T = {:.2} °C | moisture = {}", m.celsius, m.moisture))
            .map_err(failed);
        if !report.step("STEMMA", outcome)? {
            return Ok(false);
        }
    }

    Ok(true)
}
