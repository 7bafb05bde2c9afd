//! Drivers, board model and data types for the Embedded Testbench.

pub mod bus;
pub mod data;
pub mod gpio;
pub mod hw;
pub mod mcu;
pub mod output;
pub mod sens;
pub mod stats;
pub mod testbench;
pub mod vsm;
