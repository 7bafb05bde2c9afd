/*! Shared access to the I2C bus.

Every chip on the testbench hangs off the same two-wire bus. Drivers hold a
[`Device`], which pairs a cloneable [`Bus`] handle with the chip address, and
use the register helpers on it rather than talking to the bus directly.
 */

use std::fmt;
use std::ops::Range;
use std::sync::{Arc, Mutex};

use log::trace;
use rppal::i2c;
use rppal::i2c::I2c;
use thiserror::Error;

pub mod mock;

/// Bus-level result type.
pub type Result<T> = std::result::Result<T, BusError>;

/// First address tried by [`scan`] by default.
pub const SCAN_START: u8 = 0x03;
/// End (exclusive) of the default [`scan`] range.
pub const SCAN_END: u8 = 0x78;

/// Errors raised while moving bytes over the bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// Error from the Linux I2C driver.
    #[error("I2C error: {0}")]
    I2c(#[from] i2c::Error),
    /// Nothing answered at the address.
    #[error("no acknowledge from 0x{0:02X}")]
    Nack(u8),
    /// Another user of the bus panicked while holding it.
    #[error("I2C bus lock poisoned")]
    Poisoned,
    /// The transfer moved fewer bytes than requested.
    #[error("short transfer with 0x{address:02X}: expected {expected} bytes, got {actual}")]
    ShortTransfer {
        /// Chip address.
        address: u8,
        /// Requested length.
        expected: usize,
        /// Transferred length.
        actual: usize,
    },
}

/// Raw byte transfers addressed to a chip.
pub trait I2cBus: Send {
    /// Write `bytes` to the chip at `address`.
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<()>;

    /// Fill `buffer` with bytes read from the chip at `address`.
    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<()>;

    /// Write `bytes`, then read into `buffer` (register pointer access).
    fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<()> {
        self.write(address, bytes)?;
        self.read(address, buffer)
    }
}

fn check_length(address: u8, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(BusError::ShortTransfer { address, expected, actual })
    }
}

impl I2cBus for I2c {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<()> {
        self.set_slave_address(address as u16)?;
        let written = I2c::write(self, bytes)?;
        check_length(address, bytes.len(), written)
    }

    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<()> {
        self.set_slave_address(address as u16)?;
        let read = I2c::read(self, buffer)?;
        check_length(address, buffer.len(), read)
    }

    fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<()> {
        self.set_slave_address(address as u16)?;
        I2c::write_read(self, bytes, buffer)?;
        Ok(())
    }
}

/// Cloneable handle to one I2C bus.
#[derive(Clone)]
pub struct Bus {
    number: u8,
    inner: Arc<Mutex<Box<dyn I2cBus>>>,
}

impl Bus {
    /// Open `/dev/i2c-<number>` on the Raspberry Pi.
    pub fn open(number: u8) -> Result<Bus> {
        let i2c = I2c::with_bus(number)?;
        Ok(Bus::new(number, i2c))
    }

    /// Wrap an existing bus implementation.
    pub fn new<B>(number: u8, bus: B) -> Bus
    where
        B: I2cBus + 'static,
    {
        Bus {
            number,
            inner: Arc::new(Mutex::new(Box::new(bus))),
        }
    }

    /// Linux bus number.
    pub fn number(&self) -> u8 {
        self.number
    }

    /// Run `op` with exclusive access to the bus.
    pub fn with<F, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut dyn I2cBus) -> Result<T>,
    {
        let mut bus = self.inner.lock()
            .map_err(|_e| BusError::Poisoned)?;

        op(bus.as_mut())
    }

    /// Handle for the chip at `address`.
    pub fn device(&self, address: u8) -> Device {
        Device::new(self, address)
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Bus(i2c-{})", self.number)
    }
}

/// A chip at a fixed address on a [`Bus`].
#[derive(Clone, Debug)]
pub struct Device {
    bus: Bus,
    address: u8,
}

impl Device {
    /// Create a handle for the chip at `address`.
    pub fn new(bus: &Bus, address: u8) -> Device {
        Device {
            bus: bus.clone(),
            address,
        }
    }

    /// Chip address.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// The bus the chip sits on.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Returns true if the chip acknowledges a single-byte read.
    pub fn responds(&self) -> bool {
        self.read_byte().is_ok()
    }

    /// Read one byte without a register pointer.
    pub fn read_byte(&self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_bytes(&mut buf)?;
        Ok(buf[0])
    }

    /// Write one byte without a register pointer.
    pub fn write_byte(&self, value: u8) -> Result<()> {
        self.write_bytes(&[value])
    }

    /// Write raw bytes.
    pub fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        trace!("0x{:02X} <- {:02X?}", self.address, bytes);
        self.bus.with(|i2c| i2c.write(self.address, bytes))
    }

    /// Read raw bytes.
    pub fn read_bytes(&self, buffer: &mut [u8]) -> Result<()> {
        self.bus.with(|i2c| i2c.read(self.address, buffer))?;
        trace!("0x{:02X} -> {:02X?}", self.address, buffer);
        Ok(())
    }

    /// Send a 16-bit command word, most significant byte first.
    pub fn write_command(&self, command: u16) -> Result<()> {
        self.write_bytes(&command.to_be_bytes())
    }

    /// Read consecutive registers starting at `register`.
    pub fn read_block(&self, register: u8, buffer: &mut [u8]) -> Result<()> {
        self.bus.with(|i2c| i2c.write_read(self.address, &[register], buffer))?;
        trace!("0x{:02X}[{:02X}] -> {:02X?}", self.address, register, buffer);
        Ok(())
    }

    /// Read an 8-bit register.
    pub fn read_u8(&self, register: u8) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_block(register, &mut buf)?;
        Ok(buf[0])
    }

    /// Read an 8-bit register as a signed value.
    pub fn read_i8(&self, register: u8) -> Result<i8> {
        self.read_u8(register).map(|v| v as i8)
    }

    /// Write an 8-bit register.
    pub fn write_u8(&self, register: u8, value: u8) -> Result<()> {
        self.write_bytes(&[register, value])
    }

    /// Read a big-endian 16-bit register.
    pub fn read_u16(&self, register: u8) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_block(register, &mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    /// Read a big-endian 16-bit register as a two's complement value.
    pub fn read_i16(&self, register: u8) -> Result<i16> {
        self.read_u16(register).map(|v| v as i16)
    }

    /// Read a little-endian 16-bit register.
    pub fn read_u16_le(&self, register: u8) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_block(register, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Read a little-endian 16-bit register as a two's complement value.
    pub fn read_i16_le(&self, register: u8) -> Result<i16> {
        self.read_u16_le(register).map(|v| v as i16)
    }

    /// Write a big-endian 16-bit register.
    pub fn write_u16(&self, register: u8, value: u16) -> Result<()> {
        let [msb, lsb] = value.to_be_bytes();
        self.write_bytes(&[register, msb, lsb])
    }
}

/// Addresses in `range` that acknowledge a single-byte read.
pub fn scan(bus: &Bus, range: Range<u8>) -> Vec<u8> {
    range.filter(|address| is_available(bus, *address))
        .collect()
}

/// Returns true if a chip answers at `address`.
pub fn is_available(bus: &Bus, address: u8) -> bool {
    bus.device(address).responds()
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use super::mock::{MockBus, RegisterFile, Shared};

    #[test]
    pub fn big_endian_word_access() {
        let regs = Shared::new(RegisterFile::words().with(0x02, 0xBEEF));
        let bus = Bus::new(1, MockBus::new().attach(0x40, regs.clone()));
        let dev = bus.device(0x40);

        assert_eq!(dev.read_u16(0x02).unwrap(), 0xBEEF);
        assert_eq!(dev.read_i16(0x02).unwrap(), 0xBEEFu16 as i16);

        dev.write_u16(0x05, 0x1234).unwrap();
        assert_eq!(regs.lock().get(0x05), 0x1234);
    }

    #[test]
    pub fn little_endian_word_access() {
        let regs = RegisterFile::bytes()
            .with(0x88, 0x70)
            .with(0x89, 0x6B);
        let bus = Bus::new(1, MockBus::new().attach(0x76, regs));

        assert_eq!(bus.device(0x76).read_u16_le(0x88).unwrap(), 0x6B70);
    }

    #[test]
    pub fn missing_chip_is_nack() {
        let bus = Bus::new(1, MockBus::new());
        match bus.device(0x22).read_u8(0x00) {
            Err(BusError::Nack(0x22)) => (),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    pub fn scan_finds_attached_chips() {
        let bus = Bus::new(1, MockBus::new()
                           .attach(0x48, RegisterFile::words())
                           .attach(0x41, RegisterFile::words())
                           .attach(0x02, RegisterFile::bytes()));

        assert_eq!(scan(&bus, SCAN_START..SCAN_END), vec![0x41, 0x48]);
        assert!(is_available(&bus, 0x48));
        assert!(!is_available(&bus, 0x49));
    }
}
