/*! Programming the device under test.

The DUT MCU sits behind an AVRISP mkII compatible programmer and is driven
through `avrdude`. Only the operations the testbench needs are wrapped:
flashing, chip erase and fuse access.
 */

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::thread;
use std::time::Duration;

use log::{debug, info};
use rppal::gpio;
use thiserror::Error;

use crate::gpio::OutputLine;

/// Programmer tool looked up on `PATH`.
pub const TOOL: &str = "avrdude";
/// Part number handed to the tool.
pub const DEFAULT_PART: &str = "atmega1284p";
/// Serial device of the programmer.
pub const DEFAULT_PORT: &str = "/dev/ttyACM0";
/// BCM pin wired to the DUT reset.
pub const DEFAULT_RESET_PIN: u8 = 23;

const PROGRAMMER: &str = "avrispv2";

const CKSEL_SHIFT: u8 = 0;
const SUT_SHIFT: u8 = 4;
const CKOUT: u8 = 1 << 6;
const CKDIV8: u8 = 1 << 7;

pub type Result<T> = std::result::Result<T, McuError>;

#[derive(Debug, Error)]
pub enum McuError {
    #[error("failed to run programmer")]
    Io(#[from] io::Error),
    #[error("programmer port {0} does not exist")]
    MissingPort(PathBuf),
    #[error("firmware image {0} does not exist")]
    MissingImage(PathBuf),
    /// The tool ran and exited unsuccessfully.
    #[error("programmer exited with {}", .0.status)]
    Tool(Output),
    #[error("unexpected fuse value '{0}'")]
    InvalidFuse(String),
    #[error("failed to drive reset line")]
    Gpio(#[from] gpio::Error),
}

/// Fuse bytes of the AVR.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fuse {
    Extended,
    High,
    Low,
}

impl Fuse {
    /// Memory name used by avrdude.
    pub fn memory(&self) -> &'static str {
        match self {
            Fuse::Extended => "efuse",
            Fuse::High => "hfuse",
            Fuse::Low => "lfuse",
        }
    }
}

impl fmt::Display for Fuse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.memory())
    }
}

/// System clock source selected by the low fuse.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockSource {
    /// Calibrated internal RC oscillator.
    Internal,
    /// Full swing crystal oscillator.
    External,
}

/// Low fuse value for a clock setup.
///
/// CKDIV8 and CKOUT are programmed (enabled) when their bit is 0.
pub fn low_fuse(source: ClockSource, divide_by_8: bool, clock_out: bool) -> u8 {
    let (cksel, sut) = match source {
        ClockSource::Internal => (0b0010, 0b10),
        ClockSource::External => (0b1111, 0b11),
    };

    let mut fuse = (cksel << CKSEL_SHIFT) | (sut << SUT_SHIFT);
    if !divide_by_8 {
        fuse |= CKDIV8;
    }
    if !clock_out {
        fuse |= CKOUT;
    }
    fuse
}

/// Parse a fuse read back in decimal format.
fn parse_fuse(stdout: &[u8]) -> Result<u8> {
    let text = String::from_utf8_lossy(stdout);
    let text = text.trim();
    text.parse()
        .map_err(|_| McuError::InvalidFuse(text.to_string()))
}

/// avrdude invocation for one part on one programmer port.
#[derive(Clone, Debug)]
pub struct Avrdude {
    tool: PathBuf,
    part: String,
    port: PathBuf,
}

impl Default for Avrdude {
    fn default() -> Avrdude {
        Avrdude::new(DEFAULT_PART, Path::new(DEFAULT_PORT))
    }
}

impl Avrdude {
    pub fn new(part: &str, port: &Path) -> Avrdude {
        Avrdude {
            tool: PathBuf::from(TOOL),
            part: part.to_string(),
            port: port.to_path_buf(),
        }
    }

    /// Use a tool other than the `avrdude` on `PATH`.
    pub fn with_tool(mut self, tool: &Path) -> Avrdude {
        self.tool = tool.to_path_buf();
        self
    }

    pub fn part(&self) -> &str {
        &self.part
    }

    pub fn port(&self) -> &Path {
        &self.port
    }

    /// Full argument list for an operation.
    fn arguments(&self, operation: &[String]) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(), self.part.clone(),
            "-c".to_string(), PROGRAMMER.to_string(),
            "-P".to_string(), self.port.display().to_string(),
            "-v".to_string(),
        ];
        args.extend_from_slice(operation);
        args
    }

    fn run(&self, operation: &[String]) -> Result<Output> {
        if !self.port.exists() {
            return Err(McuError::MissingPort(self.port.clone()));
        }

        let args = self.arguments(operation);
        debug!("{} {}", self.tool.display(), args.join(" "));
        let output = Command::new(&self.tool)
            .args(&args)
            .output()?;

        if output.status.success() {
            Ok(output)
        } else {
            Err(McuError::Tool(output))
        }
    }

    /// Write a hex image into flash.
    pub fn flash(&self, image: &Path) -> Result<()> {
        if !image.is_file() {
            return Err(McuError::MissingImage(image.to_path_buf()));
        }

        info!("Flashing {} onto {}.", image.display(), self.part);
        self.run(&["-U".to_string(), format!("flash:w:{}", image.display())])?;
        Ok(())
    }

    /// Chip erase.
    pub fn erase(&self) -> Result<()> {
        info!("Erasing {}.", self.part);
        self.run(&["-e".to_string()])?;
        Ok(())
    }

    pub fn read_fuse(&self, fuse: Fuse) -> Result<u8> {
        let output = self.run(&["-U".to_string(), format!("{}:r:-:d", fuse.memory())])?;
        parse_fuse(&output.stdout)
    }

    pub fn write_fuse(&self, fuse: Fuse, value: u8) -> Result<()> {
        info!("Writing {} = 0x{:02X}.", fuse, value);
        self.run(&["-U".to_string(), format!("{}:w:0x{:02X}:m", fuse.memory(), value)])?;
        Ok(())
    }

    /// Program the low fuse for a clock source.
    pub fn set_clock_source(&self, source: ClockSource, divide_by_8: bool, clock_out: bool) -> Result<()> {
        self.write_fuse(Fuse::Low, low_fuse(source, divide_by_8, clock_out))
    }
}

/// Hold the DUT in reset for `hold`, then release it.
pub fn reset_pulse(line: &mut dyn OutputLine, hold: Duration) -> Result<()> {
    line.set(false)?;
    thread::sleep(hold);
    line.set(true)?;
    Ok(())
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::gpio::MockLine;

    #[test]
    pub fn clock_fuses() {
        assert_eq!(low_fuse(ClockSource::Internal, false, false), 0xE2);
        assert_eq!(low_fuse(ClockSource::Internal, true, false), 0x62);
        assert_eq!(low_fuse(ClockSource::External, false, false), 0xFF);
        assert_eq!(low_fuse(ClockSource::External, true, true), 0x3F);
    }

    #[test]
    pub fn argument_list() {
        let avr = Avrdude::default();
        let args = avr.arguments(&["-U".to_string(), "lfuse:r:-:d".to_string()]);
        assert_eq!(args, vec![
            "-p", "atmega1284p", "-c", "avrispv2", "-P", "/dev/ttyACM0", "-v", "-U", "lfuse:r:-:d",
        ]);
    }

    #[test]
    pub fn fuse_output() {
        assert_eq!(parse_fuse(b"226\n").unwrap(), 0xE2);
        assert!(matches!(parse_fuse(b"0xE2"), Err(McuError::InvalidFuse(_))));
        assert!(matches!(parse_fuse(b"300"), Err(McuError::InvalidFuse(_))));
    }

    #[test]
    pub fn missing_files_stop_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let avr = Avrdude::new(DEFAULT_PART, &dir.path().join("ttyACM9"));

        assert!(matches!(avr.erase(), Err(McuError::MissingPort(_))));
        assert!(matches!(avr.flash(&dir.path().join("fw.hex")), Err(McuError::MissingImage(_))));
    }

    #[test]
    pub fn reset_releases_line() {
        let mut line = MockLine::new();
        reset_pulse(&mut line, Duration::from_millis(1)).unwrap();
        assert!(line.is_set());
    }
}
