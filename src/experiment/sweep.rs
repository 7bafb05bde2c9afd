/*! Supply voltage sweep.

One VSM rail is stepped through every Vout code between two voltages. At
each step the rail is enabled, left to settle, sampled and held before the
next code is programmed. Each step yields one averaged row; mean, minimum
and maximum over all steps are appended as summary rows.
 */

use std::thread;
use std::time::Duration;

use log::{debug, info};

use etb_common::data::SweepRow;
use etb_common::output::DataWriter;
use etb_common::stats::{round2, Summary};
use etb_common::testbench::{Testbench, TestbenchError};
use etb_common::vsm;
use etb_common::vsm::VsmError;

use super::Result;

#[derive(Clone, Debug, PartialEq)]
pub struct SweepOptions {
    pub channel: u8,
    /// First voltage programmed.
    pub start: f64,
    /// Last voltage programmed.
    pub end: f64,
    /// Wait after enabling before sampling.
    pub settle: Duration,
    /// Samples averaged per step.
    pub samples: usize,
    /// Wait between two samples.
    pub gap: Duration,
    /// Wait after sampling.
    pub hold: Duration,
}

impl Default for SweepOptions {
    fn default() -> SweepOptions {
        SweepOptions {
            channel: 1,
            start: 3.3,
            end: 1.5,
            settle: Duration::from_millis(1000),
            samples: 1,
            gap: Duration::from_millis(10),
            hold: Duration::from_millis(500),
        }
    }
}

/// Measured steps and summary rows.
#[derive(Clone, Debug, PartialEq)]
pub struct SweepReport {
    pub steps: Vec<SweepRow>,
    pub summary: Vec<SweepRow>,
}

/// Vout codes from `start` to `end` inclusive, in sweep order.
pub fn codes(start: f64, end: f64) -> Result<Vec<u8>> {
    let first = vsm::volt_to_code(start)?;
    let last = vsm::volt_to_code(end)?;

    Ok(if first <= last {
        (first..=last).collect()
    } else {
        (last..=first).rev().collect()
    })
}

/// Average of `samples` readings; negative currents count as zero.
fn measure(tb: &mut Testbench, options: &SweepOptions) -> Result<(f64, f64, f64)> {
    let samples = options.samples.max(1);
    let (mut volts, mut milliamps, mut milliwatts) = (0.0, 0.0, 0.0);
    for n in 0..samples {
        if n > 0 {
            thread::sleep(options.gap);
        }
        let v = tb.voltage(options.channel)?;
        let i = tb.current(options.channel)?.max(0.0);
        volts += v;
        milliamps += i;
        milliwatts += v * i;
    }

    let n = samples as f64;
    Ok((volts / n, milliamps / n, milliwatts / n))
}

fn steps(tb: &mut Testbench, options: &SweepOptions, codes: &[u8], writer: &mut dyn DataWriter<SweepRow>)
    -> Result<Vec<SweepRow>>
{
    let mut rows = Vec::with_capacity(codes.len());
    for code in codes {
        info!("Set Vout to {:.2} V ...", vsm::code_to_volt(*code));
        tb.set_output_code(options.channel, *code)?;
        if !tb.enable(options.channel)? {
            let stuck = VsmError::NotSwitched { channels: vec![options.channel], enabled: true };
            return Err(TestbenchError::from(stuck).into());
        }
        thread::sleep(options.settle);

        let (volts, milliamps, milliwatts) = measure(tb, options)?;
        let row = SweepRow::step(*code, volts, milliamps, milliwatts);
        debug!("{:?}", row);
        writer.save(&row)?;
        rows.push(row);

        thread::sleep(options.hold);
    }

    Ok(rows)
}

fn summary_of(steps: &[SweepRow], pick: impl Fn(&SweepRow) -> f64) -> Option<Summary> {
    Summary::of(&steps.iter().map(pick).collect::<Vec<_>>())
}

fn summary_rows(steps: &[SweepRow]) -> Vec<SweepRow> {
    let volt = summary_of(steps, |r| r.volt);
    let current = summary_of(steps, |r| r.current);
    let power = summary_of(steps, |r| r.power);
    let (volt, current, power) = match (volt, current, power) {
        (Some(v), Some(i), Some(p)) => (v, i, p),
        _ => return Vec::new(),
    };

    let row = |label: &str, pick: &dyn Fn(&Summary) -> f64| SweepRow {
        dec: label.to_string(),
        volt: round2(pick(&volt)),
        current: round2(pick(&current)),
        power: round2(pick(&power)),
    };

    vec![
        row("mean", &|s| s.mean),
        row("min", &|s| s.min),
        row("max", &|s| s.max),
    ]
}

/// Run the sweep; every rail is disabled afterwards, also on failure.
pub fn run(tb: &mut Testbench, options: &SweepOptions, writer: &mut dyn DataWriter<SweepRow>) -> Result<SweepReport> {
    let codes = codes(options.start, options.end)?;
    info!("Sweeping channel {} over {} code(s).", options.channel, codes.len());

    tb.disable_all()?;
    tb.set_output_code_all(0)?;

    let measured = steps(tb, options, &codes, writer);
    let disabled = tb.disable_all();
    let steps = measured?;
    disabled?;

    let summary = summary_rows(&steps);
    for row in &summary {
        writer.save(row)?;
    }
    writer.finish()?;

    Ok(SweepReport { steps, summary })
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::experiment::Error;
    use crate::experiment::tests::Board;
    use crate::output::CsvDataWriter;
    use etb_common::gpio::OutputLine;
    use etb_common::hw::mic24045::MicError;

    fn quick(start: f64, end: f64) -> SweepOptions {
        SweepOptions {
            start,
            end,
            settle: Duration::from_millis(0),
            gap: Duration::from_millis(0),
            hold: Duration::from_millis(0),
            ..SweepOptions::default()
        }
    }

    #[test]
    pub fn code_order() {
        assert_eq!(codes(1.52, 1.5).unwrap(), vec![152, 151, 150]);
        assert_eq!(codes(1.5, 1.52).unwrap(), vec![150, 151, 152]);
        assert_eq!(codes(3.3, 3.3).unwrap(), vec![240]);
        assert!(matches!(codes(0.1, 1.0), Err(Error::Voltage(MicError::VoltageOutOfRange(_)))));
    }

    #[test]
    pub fn descending_sweep() {
        let board = Board::new();
        board.set_rail(1, 1.5, 10.0);
        let mut tb = board.testbench();
        let mut writer = CsvDataWriter::new(Vec::new());

        let report = run(&mut tb, &quick(1.52, 1.5), &mut writer).unwrap();

        let codes: Vec<_> = report.steps.iter().map(|r| r.code()).collect();
        assert_eq!(codes, vec![Some(152), Some(151), Some(150)]);
        assert!(report.steps.iter().all(|r| (r.power - 15.0).abs() < 1e-9));

        let vout: Vec<u16> = board.converters[0].lock().registers.writes().iter()
            .filter(|(register, _)| *register == 0x03)
            .map(|(_, value)| *value)
            .collect();
        assert_eq!(vout, vec![0, 152, 151, 150]);
        assert_eq!(board.converters[1].lock().registers.last_write(0x03), Some(0));
        assert!(board.lines.iter().all(|line| !line.is_set()));

        let summary: Vec<&str> = report.summary.iter().map(|r| r.dec.as_str()).collect();
        assert_eq!(summary, vec!["mean", "min", "max"]);
        assert_eq!(report.summary[0].power, 15.0);

        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(text.lines().count(), 1 + 3 + 3);
        assert!(text.lines().nth(1).unwrap().starts_with("152,"));
        assert!(text.lines().nth(4).unwrap().starts_with("mean,"));
        assert!(text.ends_with("max,1.5,10.0,15.0\n"));
    }

    #[test]
    pub fn negative_current_is_clamped() {
        let board = Board::new();
        board.set_rail(1, 3.3, -2.0);
        let mut tb = board.testbench();
        let mut writer = CsvDataWriter::new(Vec::new());
        let options = SweepOptions { samples: 3, ..quick(3.3, 3.3) };

        let report = run(&mut tb, &options, &mut writer).unwrap();
        assert_eq!(report.steps.len(), 1);
        assert_eq!(report.steps[0].current, 0.0);
        assert_eq!(report.steps[0].power, 0.0);
    }

    #[test]
    pub fn rail_that_stays_off_aborts_the_sweep() {
        let board = Board::new();
        board.converters[0].lock().stuck = true;
        let mut tb = board.testbench();
        let mut writer = CsvDataWriter::new(Vec::new());

        match run(&mut tb, &quick(3.3, 3.2), &mut writer) {
            Err(Error::Testbench(TestbenchError::Vsm(VsmError::NotSwitched { channels, enabled: true }))) => {
                assert_eq!(channels, vec![1])
            },
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(board.lines.iter().all(|line| !line.is_set()));
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert!(text.is_empty());
    }

    #[test]
    pub fn rails_are_disabled_after_failure() {
        let board = Board::new();
        let mut tb = board.testbench();
        let mut writer = CsvDataWriter::new(Vec::new());
        let options = SweepOptions { channel: 5, ..quick(1.5, 1.5) };

        assert!(run(&mut tb, &options, &mut writer).is_err());
        assert!(board.lines.iter().all(|line| !line.is_set()));
    }
}
