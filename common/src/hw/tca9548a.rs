//! Support for the TCA9548A eight-channel I2C multiplexer.

use log::{trace, warn};
use thiserror::Error;

use crate::bus::{Bus, BusError, Device};

/// Address with A0 to A2 grounded.
pub const DEFAULT_ADDRESS: u8 = 0x70;

/// Highest downstream channel.
pub const CHANNELS: u8 = 8;

/// TCA9548A result type.
pub type Result<T> = std::result::Result<T, MuxError>;

/// Errors raised by the multiplexer driver.
#[derive(Debug, Error)]
pub enum MuxError {
    /// Bus transfer failed.
    #[error("multiplexer bus error")]
    Bus(#[from] BusError),
    /// Channels are 1 to 8, 0 deselects all.
    #[error("multiplexer has no channel {0}")]
    InvalidChannel(u8),
}

/// Control byte selecting `channel` alone; 0 selects nothing.
pub fn control_byte(channel: u8) -> Result<u8> {
    match channel {
        0 => Ok(0),
        1..=CHANNELS => Ok(1 << (channel - 1)),
        _ => Err(MuxError::InvalidChannel(channel)),
    }
}

/// Channels enabled in a control byte, ascending.
pub fn decode_channels(control: u8) -> Vec<u8> {
    (1..=CHANNELS)
        .filter(|channel| control & (1 << (channel - 1)) != 0)
        .collect()
}

/// Driver for the TI TCA9548A.
#[derive(Debug)]
pub struct Tca9548a {
    device: Device,
}

impl Tca9548a {
    /// Create a driver for the multiplexer at `address`.
    pub fn new(bus: &Bus, address: u8) -> Tca9548a {
        Tca9548a {
            device: bus.device(address),
        }
    }

    /// Route the bus to `channel` (1 to 8) alone, or disconnect all with 0.
    pub fn select(&self, channel: u8) -> Result<()> {
        let control = control_byte(channel)?;
        trace!("mux -> channel {}", channel);
        self.device.write_byte(control)?;
        Ok(())
    }

    /// Disconnect every downstream channel.
    pub fn deselect(&self) -> Result<()> {
        self.select(0)
    }

    /// Raw control byte.
    pub fn read(&self) -> Result<u8> {
        Ok(self.device.read_byte()?)
    }

    /// Channels currently connected.
    pub fn channels(&self) -> Result<Vec<u8>> {
        self.read().map(decode_channels)
    }

    /// Select `channel` until the returned guard drops.
    pub fn scoped(&self, channel: u8) -> Result<MuxGuard<'_>> {
        self.select(channel)?;
        Ok(MuxGuard { mux: self })
    }
}

/// Keeps a channel selected; deselects all channels when dropped.
#[derive(Debug)]
pub struct MuxGuard<'a> {
    mux: &'a Tca9548a,
}

impl Drop for MuxGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.mux.deselect() {
            warn!("failed to deselect multiplexer: {}", e);
        }
    }
}
