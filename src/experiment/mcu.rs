//! DUT programming commands.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use etb_common::gpio::GpioLine;
use etb_common::mcu;
use etb_common::mcu::{Avrdude, ClockSource, Fuse};

use super::Result;

#[derive(Clone, Debug, PartialEq)]
pub enum McuCommand {
    Flash(PathBuf),
    Erase,
    ReadFuse(Fuse),
    WriteFuse(Fuse, u8),
    Clock {
        source: ClockSource,
        divide_by_8: bool,
        clock_out: bool,
    },
    /// Pulse the reset line wired to BCM `pin`.
    Reset {
        pin: u8,
        hold: Duration,
    },
}

pub fn run(programmer: &Avrdude, command: &McuCommand, out: &mut dyn Write) -> Result<()> {
    match command {
        McuCommand::Flash(image) => programmer.flash(image)?,
        McuCommand::Erase => programmer.erase()?,
        McuCommand::ReadFuse(fuse) => {
            let value = programmer.read_fuse(*fuse)?;
            writeln!(out, "{} = 0x{:02X}", fuse, value)?;
        },
        McuCommand::WriteFuse(fuse, value) => programmer.write_fuse(*fuse, *value)?,
        McuCommand::Clock { source, divide_by_8, clock_out } => {
            programmer.set_clock_source(*source, *divide_by_8, *clock_out)?
        },
        McuCommand::Reset { pin, hold } => {
            let mut line = GpioLine::new(*pin).map_err(mcu::McuError::from)?;
            mcu::reset_pulse(&mut line, *hold)?;
        },
    }

    Ok(())
}
