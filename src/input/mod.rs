//! Testbench description providers.

use std::fmt::Debug;

use etb_common::testbench::TestbenchConfig;

pub mod error;
pub mod hard_code;
pub mod json;

pub type Result<T> = std::result::Result<T, error::Error>;

/// Source of the board description a testbench is brought up from.
pub trait TestbenchProvider: Debug {
    /// Produce the testbench configuration.
    fn testbench_config(&self) -> Result<TestbenchConfig>;
}
