//! Commands run against the testbench.

use std::error::Error as StdError;
use std::io;

use thiserror::Error;

use etb_common::bus::BusError;
use etb_common::hw::mic24045::MicError;
use etb_common::mcu::McuError;
use etb_common::output::OutputError;
use etb_common::testbench::TestbenchError;

pub mod mcu;
pub mod monitor;
pub mod scan;
pub mod self_check;
pub mod sweep;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I2C bus unavailable")]
    Bus(#[from] BusError),
    #[error("testbench error")]
    Testbench(#[from] TestbenchError),
    #[error("invalid sweep voltage")]
    Voltage(#[from] MicError),
    #[error("failed to store results")]
    Output(#[from] OutputError),
    #[error("failed to plot results")]
    Plot(#[from] image::ImageError),
    #[error("DUT programming failed")]
    Mcu(#[from] McuError),
    #[error("failed to write report")]
    Io(#[from] io::Error),
}

/// An error and all of its sources, outermost first.
pub fn error_chain(error: &dyn StdError) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(e) = source {
        text.push_str(": ");
        text.push_str(&e.to_string());
        source = e.source();
    }
    text
}
