//! Embedded Testbench control tool.

mod experiment;
mod input;
mod opts;
mod output;
mod plot;

use std::io;
use std::io::Write;
use std::process;

use log::{info, LevelFilter};

use etb_common::bus::Bus;
use etb_common::data::{Reading, SweepRow};
use etb_common::output::result_path;
use etb_common::testbench::{Testbench, TestbenchConfig};

use crate::experiment::{error_chain, mcu, monitor, scan, self_check, sweep};
use crate::opts::{Command, Configuration};

fn init_logging(verbosity: usize) {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::new();
    builder.format_timestamp_secs();
    match std::env::var("RUST_LOG") {
        Ok(filters) => builder.parse_filters(&filters),
        Err(_) => builder.filter_level(level),
    };
    builder.init();
}

fn testbench_config(config: &Configuration) -> Result<TestbenchConfig, Box<dyn std::error::Error>> {
    let provider = config.get_testbench_provider();
    info!("Reading testbench description from {:?}.", provider);
    Ok(provider.testbench_config()?)
}

/// Run the selected command. `Ok(false)` means the command ran but reported failure.
fn run(config: &Configuration) -> Result<bool, Box<dyn std::error::Error>> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match config.command {
        Command::Scan => {
            let bus = Bus::open(testbench_config(config)?.bus)
                .map_err(experiment::Error::from)?;
            scan::run(&bus, &mut out)?;
            Ok(true)
        },
        Command::SelfCheck(ref options) => {
            let mut tb = Testbench::open(&testbench_config(config)?)
                .map_err(experiment::Error::from)?;
            Ok(self_check::run(&mut tb, options, &mut out)?)
        },
        Command::Monitor(ref options) => {
            let mut tb = Testbench::open(&testbench_config(config)?)
                .map_err(experiment::Error::from)?;
            let mut writer = output::create::<Reading>(&config.output_dir, "power_monitor", config.format)
                .map_err(experiment::Error::from)?;
            monitor::run(&mut tb, options, writer.as_mut())?;
            Ok(true)
        },
        Command::Sweep { ref options, plot } => {
            let mut tb = Testbench::open(&testbench_config(config)?)
                .map_err(experiment::Error::from)?;
            let mut writer = output::create::<SweepRow>(&config.output_dir, "power_measurement", config.format)
                .map_err(experiment::Error::from)?;
            let report = sweep::run(&mut tb, options, writer.as_mut())?;

            for row in report.summary.iter() {
                writeln!(out, "{:>5}: {:.2} V | {:.2} mA | {:.2} mW", row.dec, row.volt, row.current, row.power)?;
            }

            if plot {
                let path = result_path(&config.output_dir, "power_measurement", "png")
                    .map_err(experiment::Error::from)?;
                plot::save(&report.steps, &path)
                    .map_err(experiment::Error::from)?;
                info!("Plot written to {}.", path.display());
            }
            Ok(true)
        },
        Command::Mcu(ref command) => {
            mcu::run(&config.programmer, command, &mut out)?;
            Ok(true)
        },
    }
}

fn main() {
    let config = match opts::parse() {
        Ok(config) => config,
        Err(opts::Error::Help(usage)) => {
            println!("{}", usage);
            return;
        },
        Err(e) => {
            eprintln!("etb: {}", e);
            process::exit(1);
        },
    };

    init_logging(config.verbosity);

    match run(&config) {
        Ok(true) => (),
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("etb: {}", error_chain(e.as_ref()));
            process::exit(1);
        },
    }
}
