//! Periodic power monitoring.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info};

use etb_common::data::Reading;
use etb_common::output::DataWriter;
use etb_common::testbench::{MeterId, Testbench};

use super::Result;

#[derive(Clone, Debug, PartialEq)]
pub struct MonitorOptions {
    /// Time between the starts of two rounds.
    pub interval: Duration,
    /// Number of rounds; unbounded if `None`.
    pub rounds: Option<usize>,
    /// Wattmeters sampled each round.
    pub meters: Vec<MeterId>,
}

impl Default for MonitorOptions {
    fn default() -> MonitorOptions {
        MonitorOptions {
            interval: Duration::from_millis(1000),
            rounds: None,
            meters: MeterId::all(),
        }
    }
}

/// Start of the round after the one due at `due`, and the time left until
/// then as seen at `now`.
fn next_round(due: Instant, interval: Duration, now: Instant) -> (Instant, Duration) {
    match due.checked_add(interval) {
        Some(next) => (next, next.saturating_duration_since(now)),
        None => (due, interval),
    }
}

/// Sample the selected wattmeters on a fixed schedule and store every reading.
///
/// Returns the number of completed rounds.
pub fn run(tb: &mut Testbench, options: &MonitorOptions, writer: &mut dyn DataWriter<Reading>) -> Result<usize> {
    info!("Monitoring {} meter(s) every {} ms.", options.meters.len(), options.interval.as_millis());

    let mut due = Instant::now();
    let mut round = 0;
    while options.rounds.map_or(true, |rounds| round < rounds) {
        for reading in tb.snapshot_of(&options.meters)? {
            debug!("{}", reading);
            writer.save(&reading)?;
        }
        writer.finish()?;
        round += 1;

        // Rounds start at whole multiples of the interval.
        if options.rounds.map_or(true, |rounds| round < rounds) {
            let (next, wait) = next_round(due, options.interval, Instant::now());
            due = next;
            thread::sleep(wait);
        }
    }

    info!("Monitoring done after {} round(s).", round);
    Ok(round)
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::experiment::tests::Board;
    use etb_common::data::Quantity;

    #[derive(Default)]
    struct Collect {
        readings: Vec<Reading>,
        flushes: usize,
    }

    impl DataWriter<Reading> for Collect {
        fn save(&mut self, record: &Reading) -> etb_common::output::Result<()> {
            self.readings.push(record.clone());
            Ok(())
        }

        fn finish(&mut self) -> etb_common::output::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    #[test]
    pub fn bounded_rounds() {
        let board = Board::new();
        board.set_rail(1, 1.8, 4.0);
        let mut tb = board.testbench();
        let options = MonitorOptions {
            interval: Duration::from_millis(1),
            rounds: Some(3),
            meters: vec![MeterId::Supply(1), MeterId::Aux(2)],
        };

        let mut sink = Collect::default();
        assert_eq!(run(&mut tb, &options, &mut sink).unwrap(), 3);
        assert_eq!(sink.readings.len(), 3 * 2 * 3);
        assert_eq!(sink.flushes, 3);

        let first = &sink.readings[0];
        assert_eq!(first.channel(), "vsm1");
        assert_eq!(first.quantity(), Quantity::Voltage);
        assert!((first.value() - 1.8).abs() < 1e-9);
        assert_eq!(sink.readings[3].channel(), "aux2");
    }

    #[test]
    pub fn schedule_does_not_drift() {
        let start = Instant::now();
        let interval = Duration::from_millis(10);

        let (due, wait) = next_round(start, interval, start + Duration::from_millis(3));
        assert_eq!(due, start + interval);
        assert_eq!(wait, Duration::from_millis(7));

        // A late round is followed immediately by the next one.
        let (due, wait) = next_round(due, interval, start + Duration::from_millis(25));
        assert_eq!(due, start + 2 * interval);
        assert_eq!(wait, Duration::from_millis(0));

        let (due, wait) = next_round(due, Duration::MAX, start);
        assert_eq!(due, start + 2 * interval);
        assert_eq!(wait, Duration::MAX);
    }

    #[test]
    pub fn defaults() {
        let options = MonitorOptions::default();
        assert_eq!(options.interval, Duration::from_secs(1));
        assert_eq!(options.rounds, None);
        assert_eq!(options.meters.len(), 6);
    }
}
