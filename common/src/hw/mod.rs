//! Drivers for the chips soldered onto the testbench.

use std::fmt::Debug;

pub mod ads1115;
pub mod fcnt;
pub mod ina219;
pub mod mic24045;
pub mod tca9548a;

/// Something that measures the power drawn through a supply rail.
pub trait PowerMetering: Debug + Send {
    /// Error raised when the meter cannot be read.
    type Error: std::error::Error;

    /// Current through the rail in milliamps.
    fn current_ma(&self) -> Result<f64, Self::Error>;

    /// Voltage on the load side in volts.
    fn bus_voltage_v(&self) -> Result<f64, Self::Error>;

    /// Power delivered in milliwatts.
    fn power_mw(&self) -> Result<f64, Self::Error>;
}

/// Replace the `mask` bits of `word` (after shifting by `shift`) with `value`.
pub(crate) fn with_field(word: u16, mask: u16, shift: u8, value: u16) -> u16 {
    (word & !(mask << shift)) | ((value & mask) << shift)
}

#[cfg(test)]
pub mod tests {
    use super::*;

    #[test]
    pub fn field_update_keeps_other_bits() {
        assert_eq!(with_field(0xFFFF, 0b11, 11, 0b01), 0xEFFF);
        assert_eq!(with_field(0x0000, 0xF, 3, 0x8), 0x0040);
        assert_eq!(with_field(0x0000, 0x1, 0, 0x3), 0x0001);
    }
}
