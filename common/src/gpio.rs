//! Digital output lines (supply enable pins).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rppal::gpio;
use rppal::gpio::{Gpio, OutputPin};

/// A push-pull output.
pub trait OutputLine: Send {
    /// Drive the line high (`true`) or low.
    fn set(&mut self, high: bool) -> Result<(), gpio::Error>;

    /// Level last driven onto the line.
    fn is_set(&self) -> bool;
}

/// Raspberry Pi GPIO pin in output mode.
#[derive(Debug)]
pub struct GpioLine {
    bcm: u8,
    pin: OutputPin,
    high: bool,
}

impl GpioLine {
    /// Claim BCM pin `bcm` as an output and drive it low.
    pub fn new(bcm: u8) -> Result<GpioLine, gpio::Error> {
        let mut pin = Gpio::new()?
            .get(bcm)?
            .into_output();
        pin.set_low();

        Ok(GpioLine {
            bcm,
            pin,
            high: false,
        })
    }

    /// BCM pin number.
    pub fn bcm(&self) -> u8 {
        self.bcm
    }
}

impl OutputLine for GpioLine {
    fn set(&mut self, high: bool) -> Result<(), gpio::Error> {
        if high {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        self.high = high;

        Ok(())
    }

    fn is_set(&self) -> bool {
        self.high
    }
}

/// Output line backed by a shared flag.
#[derive(Clone, Debug, Default)]
pub struct MockLine {
    level: Arc<AtomicBool>,
}

impl MockLine {
    /// Line starting low.
    pub fn new() -> MockLine {
        MockLine::default()
    }
}

impl OutputLine for MockLine {
    fn set(&mut self, high: bool) -> Result<(), gpio::Error> {
        self.level.store(high, Ordering::SeqCst);
        Ok(())
    }

    fn is_set(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }
}
