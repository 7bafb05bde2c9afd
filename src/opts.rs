//! Runtime configuration options.

use std::convert::TryFrom;
use std::env;
use std::fmt;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use getopts::{Matches, Options};

use etb_common::mcu;
use etb_common::mcu::{Avrdude, ClockSource, Fuse};
use etb_common::testbench::MeterId;

use crate::experiment::mcu::McuCommand;
use crate::experiment::monitor::MonitorOptions;
use crate::experiment::self_check::SelfCheckOptions;
use crate::experiment::sweep::SweepOptions;
use crate::input::TestbenchProvider;
use crate::input::hard_code::HardCodedTestbench;
use crate::input::json::JsonTestbenchParser;
use crate::output::Format;

type Result<T> = std::result::Result<T, Error>;

const DEFAULT_OUTPUT_DIR: &str = "results";
const DEFAULT_RESET_HOLD_MS: u64 = 500;

#[derive(Clone, Debug)]
pub enum Error {
    /// An option or command is missing its required argument.
    ArgumentMissing(&'static str),
    /// Parsing command line failed.
    CLI(getopts::Fail),
    /// User requested to see help, not run the program.
    Help(String),
    /// User passed an invalid option.
    Invalid(String),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::CLI(ref e) => Some(e),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Error::*;
        match self {
            ArgumentMissing(arg) => write!(f, "missing argument for '{}'", arg),
            CLI(ref e) => write!(f, "{}", e),
            Help(ref help_msg) => write!(f, "{}", help_msg),
            Invalid(ref opt) => write!(f, "invalid option: {}", opt),
        }
    }
}

impl From<getopts::Fail> for Error {
    fn from(e: getopts::Fail) -> Error {
        Error::CLI(e)
    }
}

/// What to do once the testbench is up.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Scan,
    SelfCheck(SelfCheckOptions),
    Monitor(MonitorOptions),
    Sweep {
        options: SweepOptions,
        plot: bool,
    },
    Mcu(McuCommand),
}

#[derive(Debug)]
pub struct Configuration {
    testbench_provider: Box<dyn TestbenchProvider>,
    pub command: Command,
    pub output_dir: PathBuf,
    pub format: Format,
    pub programmer: Avrdude,
    /// Number of `-v` flags.
    pub verbosity: usize,
}

impl Configuration {
    pub fn get_testbench_provider(&self) -> &dyn TestbenchProvider {
        self.testbench_provider.as_ref()
    }
}

fn create_options() -> Options {
    let mut opts = Options::new();
    opts.optopt("c", "config", "testbench description (JSON); stock board if omitted", "FILE");
    opts.optopt("o", "output", "result directory (default: results)", "DIR");
    opts.optopt("f", "format", "result format: csv or json (default: csv)", "FORMAT");
    opts.optflagmulti("v", "verbose", "more log output; repeat for more");
    opts.optflag("h", "help", "show help");

    // monitor
    opts.optopt("i", "interval", "monitor: sampling interval (default: 1000)", "MS");
    opts.optopt("n", "count", "monitor: number of rounds (default: unbounded)", "N");
    opts.optopt("m", "meters", "monitor: comma separated meters (default: all)", "vsm1,..,aux2");

    // self-check
    opts.optmulti("", "thermistor", "self-check: also read thermistor 0 or 1", "N");

    // sweep
    opts.optopt("", "channel", "sweep: VSM channel (default: 1)", "N");
    opts.optopt("", "from", "sweep: start voltage (default: 3.3)", "V");
    opts.optopt("", "to", "sweep: end voltage (default: 1.5)", "V");
    opts.optopt("", "settle", "sweep: delay before sampling (default: 1000)", "MS");
    opts.optopt("", "samples", "sweep: samples per step (default: 1)", "N");
    opts.optopt("", "gap", "sweep: delay between samples (default: 10)", "MS");
    opts.optopt("", "hold", "sweep/mcu reset: delay after sampling or reset hold time", "MS");
    opts.optflag("", "plot", "sweep: also render a PNG chart");

    // mcu
    opts.optopt("", "port", "mcu: programmer port (default: /dev/ttyACM0)", "PATH");
    opts.optopt("", "part", "mcu: part number (default: atmega1284p)", "PART");
    opts.optopt("", "reset-pin", "mcu: BCM pin of the DUT reset (default: 23)", "PIN");
    opts.optflag("", "div8", "mcu clock: enable CKDIV8");
    opts.optflag("", "ckout", "mcu clock: enable CKOUT");

    opts
}

fn usage(program: &str, opts: &Options) -> String {
    let brief = format!(
        "Usage: {} [ options ] <command>\n\n\
         Commands:\n    \
         scan                              list responding I2C addresses\n    \
         self-check                        test the board\n    \
         monitor                           sample every wattmeter periodically\n    \
         sweep                             sweep a supply rail's voltage\n    \
         mcu flash <hex> | erase | read-fuse <fuse> | write-fuse <fuse> <byte>\n        \
         | clock <internal|external> | reset",
        program);
    opts.usage(&brief)
}

/// Parse an option value if the option is present.
fn parsed<T: FromStr>(matches: &Matches, name: &'static str) -> Result<Option<T>> {
    match matches.opt_str(name) {
        Some(text) => text.parse()
            .map(Some)
            .map_err(|_| Error::Invalid(format!("'{}' is not a valid value for --{}", text, name))),
        None => Ok(None),
    }
}

fn millis(matches: &Matches, name: &'static str, default: Duration) -> Result<Duration> {
    Ok(parsed::<u64>(matches, name)?
       .map(Duration::from_millis)
       .unwrap_or(default))
}

/// Byte written as decimal or `0x..` hexadecimal.
fn parse_byte(text: &str) -> Result<u8> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|_| Error::Invalid(format!("'{}' is not a byte value", text)))
}

fn parse_fuse(name: Option<&String>) -> Result<Fuse> {
    match name.map(String::as_str) {
        Some("low") | Some("lfuse") => Ok(Fuse::Low),
        Some("high") | Some("hfuse") => Ok(Fuse::High),
        Some("extended") | Some("efuse") => Ok(Fuse::Extended),
        Some(other) => Err(Error::Invalid(format!("{} is not a fuse (low, high, extended)", other))),
        None => Err(Error::ArgumentMissing("fuse")),
    }
}

fn parse_mcu(matches: &Matches, args: &[String]) -> Result<McuCommand> {
    let action = args.get(0).ok_or(Error::ArgumentMissing("mcu"))?;
    match action.as_str() {
        "flash" => {
            let image = args.get(1).ok_or(Error::ArgumentMissing("mcu flash"))?;
            Ok(McuCommand::Flash(PathBuf::from(image)))
        },
        "erase" => Ok(McuCommand::Erase),
        "read-fuse" => Ok(McuCommand::ReadFuse(parse_fuse(args.get(1))?)),
        "write-fuse" => {
            let fuse = parse_fuse(args.get(1))?;
            let value = args.get(2).ok_or(Error::ArgumentMissing("mcu write-fuse"))?;
            Ok(McuCommand::WriteFuse(fuse, parse_byte(value)?))
        },
        "clock" => {
            let source = match args.get(1).map(String::as_str) {
                Some("internal") => ClockSource::Internal,
                Some("external") => ClockSource::External,
                Some(other) => return Err(Error::Invalid(format!("{} is not a clock source", other))),
                None => return Err(Error::ArgumentMissing("mcu clock")),
            };
            Ok(McuCommand::Clock {
                source,
                divide_by_8: matches.opt_present("div8"),
                clock_out: matches.opt_present("ckout"),
            })
        },
        "reset" => Ok(McuCommand::Reset {
            pin: parsed(matches, "reset-pin")?.unwrap_or(mcu::DEFAULT_RESET_PIN),
            hold: millis(matches, "hold", Duration::from_millis(DEFAULT_RESET_HOLD_MS))?,
        }),
        other => Err(Error::Invalid(format!("{} is not an mcu command", other))),
    }
}

fn parse_meters(list: &str) -> Result<Vec<MeterId>> {
    list.split(',')
        .map(|label| MeterId::try_from(label.trim()).map_err(Error::Invalid))
        .collect()
}

fn parse_command(matches: &Matches) -> Result<Command> {
    let name = matches.free.get(0).ok_or(Error::ArgumentMissing("command"))?;
    match name.as_str() {
        "scan" => Ok(Command::Scan),
        "self-check" => {
            let thermistors = matches.opt_strs("thermistor").iter()
                .map(|t| t.parse().map_err(|_| Error::Invalid(format!("{} is not a thermistor", t))))
                .collect::<Result<Vec<u8>>>()?;
            Ok(Command::SelfCheck(SelfCheckOptions { thermistors }))
        },
        "monitor" => {
            let defaults = MonitorOptions::default();
            let meters = match matches.opt_str("meters") {
                Some(list) => parse_meters(&list)?,
                None => defaults.meters,
            };
            Ok(Command::Monitor(MonitorOptions {
                interval: millis(matches, "interval", defaults.interval)?,
                rounds: parsed(matches, "count")?,
                meters,
            }))
        },
        "sweep" => {
            let defaults = SweepOptions::default();
            let options = SweepOptions {
                channel: parsed(matches, "channel")?.unwrap_or(defaults.channel),
                start: parsed(matches, "from")?.unwrap_or(defaults.start),
                end: parsed(matches, "to")?.unwrap_or(defaults.end),
                settle: millis(matches, "settle", defaults.settle)?,
                samples: parsed(matches, "samples")?.unwrap_or(defaults.samples),
                gap: millis(matches, "gap", defaults.gap)?,
                hold: millis(matches, "hold", defaults.hold)?,
            };
            if options.samples == 0 {
                return Err(Error::Invalid("--samples must be at least 1".to_string()));
            }
            Ok(Command::Sweep {
                options,
                plot: matches.opt_present("plot"),
            })
        },
        "mcu" => Ok(Command::Mcu(parse_mcu(matches, &matches.free[1..])?)),
        other => Err(Error::Invalid(format!("{} is not a command", other))),
    }
}

/// Build the configuration from command line arguments (program name excluded).
pub fn parse_args(program: &str, args: &[String]) -> Result<Configuration> {
    let opts = create_options();
    let matches = opts.parse(args)?;

    if matches.opt_present("h") {
        return Err(Error::Help(usage(program, &opts)));
    }

    let command = parse_command(&matches)?;

    let testbench_provider: Box<dyn TestbenchProvider> = match matches.opt_str("config") {
        Some(path) => Box::new(JsonTestbenchParser::new(Path::new(&path))),
        None => Box::new(HardCodedTestbench::new()),
    };

    let format = match matches.opt_str("format") {
        Some(name) => Format::try_from(name.as_str()).map_err(Error::Invalid)?,
        None => Format::Csv,
    };

    let mut programmer = Avrdude::default();
    if matches.opt_present("port") || matches.opt_present("part") {
        let port = matches.opt_str("port").unwrap_or_else(|| mcu::DEFAULT_PORT.to_string());
        let part = matches.opt_str("part").unwrap_or_else(|| mcu::DEFAULT_PART.to_string());
        programmer = Avrdude::new(&part, Path::new(&port));
    }

    Ok(Configuration {
        testbench_provider,
        command,
        output_dir: PathBuf::from(matches.opt_str("output").unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string())),
        format,
        programmer,
        verbosity: matches.opt_count("v"),
    })
}

pub fn parse() -> Result<Configuration> {
    let cli_args: Vec<_> = env::args().collect();
    let program = cli_args.get(0).map(String::as_str).unwrap_or("etb");
    parse_args(program, cli_args.get(1..).unwrap_or(&[]))
}

#[cfg(test)]
pub mod tests {
    use super::*;

    fn args(line: &str) -> Result<Configuration> {
        let args: Vec<String> = line.split_whitespace().map(String::from).collect();
        parse_args("etb", &args)
    }

    #[test]
    pub fn defaults() {
        let config = args("scan").unwrap();
        assert_eq!(config.command, Command::Scan);
        assert_eq!(config.output_dir, PathBuf::from("results"));
        assert_eq!(config.format, Format::Csv);
        assert_eq!(config.verbosity, 0);
        assert_eq!(config.programmer.port(), Path::new("/dev/ttyACM0"));
    }

    #[test]
    pub fn sweep_options() {
        let config = args("-vv sweep --channel 2 --from 1.5 --to 3.3 --samples 10 --settle 0 --plot -f json").unwrap();
        assert_eq!(config.verbosity, 2);
        assert_eq!(config.format, Format::JsonLines);
        match config.command {
            Command::Sweep { options, plot } => {
                assert!(plot);
                assert_eq!(options.channel, 2);
                assert_eq!(options.start, 1.5);
                assert_eq!(options.end, 3.3);
                assert_eq!(options.samples, 10);
                assert_eq!(options.settle, Duration::from_millis(0));
                assert_eq!(options.hold, Duration::from_millis(500));
            },
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    pub fn monitor_options() {
        let config = args("monitor -i 250 -n 4 -m vsm1,aux2").unwrap();
        assert_eq!(config.command, Command::Monitor(MonitorOptions {
            interval: Duration::from_millis(250),
            rounds: Some(4),
            meters: vec![MeterId::Supply(1), MeterId::Aux(2)],
        }));
        assert!(matches!(args("monitor -m vsm9"), Err(Error::Invalid(_))));
    }

    #[test]
    pub fn self_check_thermistors() {
        let config = args("self-check --thermistor 0 --thermistor 1").unwrap();
        assert_eq!(config.command, Command::SelfCheck(SelfCheckOptions { thermistors: vec![0, 1] }));
    }

    #[test]
    pub fn mcu_commands() {
        assert_eq!(args("mcu write-fuse low 0xE2").unwrap().command,
                   Command::Mcu(McuCommand::WriteFuse(Fuse::Low, 0xE2)));
        assert_eq!(args("mcu clock internal --div8").unwrap().command,
                   Command::Mcu(McuCommand::Clock {
                       source: ClockSource::Internal,
                       divide_by_8: true,
                       clock_out: false,
                   }));
        assert_eq!(args("mcu reset --reset-pin 17").unwrap().command,
                   Command::Mcu(McuCommand::Reset { pin: 17, hold: Duration::from_millis(500) }));

        let config = args("mcu erase --port /dev/ttyUSB0").unwrap();
        assert_eq!(config.programmer.port(), Path::new("/dev/ttyUSB0"));
        assert_eq!(config.programmer.part(), "atmega1284p");

        assert!(matches!(args("mcu read-fuse lock"), Err(Error::Invalid(_))));
        assert!(matches!(args("mcu write-fuse high"), Err(Error::ArgumentMissing(_))));
        assert!(matches!(args("mcu write-fuse high 0x1FF"), Err(Error::Invalid(_))));
    }

    #[test]
    pub fn bad_input() {
        assert!(matches!(args(""), Err(Error::ArgumentMissing("command"))));
        assert!(matches!(args("dance"), Err(Error::Invalid(_))));
        assert!(matches!(args("sweep --samples 0"), Err(Error::Invalid(_))));
        assert!(matches!(args("sweep --from abc"), Err(Error::Invalid(_))));
        assert!(matches!(args("scan --bogus"), Err(Error::CLI(_))));
        assert!(matches!(args("-h"), Err(Error::Help(_))));
    }
}
