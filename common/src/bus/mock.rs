/*! In-memory stand-ins for the I2C bus and the chips on it.

[`MockBus`] routes transfers to [`Peripheral`] implementations by address.
It can also simulate a TCA9548A multiplexer, in which case downstream chips
only answer while their channel is selected.
 */

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicU8, Ordering};

use super::{BusError, I2cBus, Result};

/// A simulated chip.
pub trait Peripheral: Send {
    /// Handle a write transfer.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Handle a read transfer.
    fn read(&mut self, buffer: &mut [u8]) -> Result<()>;
}

/// Peripheral shared between the bus and a test.
pub struct Shared<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> Shared<T> {
    /// Wrap `value`.
    pub fn new(value: T) -> Shared<T> {
        Shared {
            inner: Arc::new(Mutex::new(value)),
        }
    }

    /// Access the wrapped value.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Shared<T> {
        Shared {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Peripheral> Peripheral for Shared<T> {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.lock().write(bytes)
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<()> {
        self.lock().read(buffer)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Width {
    Byte,
    Word,
}

/// Pointer-addressed register map.
///
/// The first byte of a write sets the register pointer; any bytes after it
/// are stored starting at that register. Reads start at the pointer and
/// advance it. Word registers move most significant byte first.
#[derive(Debug)]
pub struct RegisterFile {
    width: Width,
    pointer: u8,
    values: HashMap<u8, u16>,
    writes: Vec<(u8, u16)>,
}

impl RegisterFile {
    /// Map of 8-bit registers.
    pub fn bytes() -> RegisterFile {
        RegisterFile::with_width(Width::Byte)
    }

    /// Map of 16-bit registers.
    pub fn words() -> RegisterFile {
        RegisterFile::with_width(Width::Word)
    }

    fn with_width(width: Width) -> RegisterFile {
        RegisterFile {
            width,
            pointer: 0,
            values: HashMap::new(),
            writes: Vec::new(),
        }
    }

    /// Builder form of [`RegisterFile::set`].
    pub fn with(mut self, register: u8, value: u16) -> RegisterFile {
        self.set(register, value);
        self
    }

    /// Preload `register` without recording a write.
    pub fn set(&mut self, register: u8, value: u16) {
        self.values.insert(register, value);
    }

    /// Current value of `register` (zero if never set).
    pub fn get(&self, register: u8) -> u16 {
        self.values.get(&register).copied().unwrap_or(0)
    }

    /// Register writes seen so far, oldest first.
    pub fn writes(&self) -> &[(u8, u16)] {
        &self.writes
    }

    /// Last value written to `register`.
    pub fn last_write(&self, register: u8) -> Option<u16> {
        self.writes.iter()
            .rev()
            .find(|(r, _v)| *r == register)
            .map(|(_r, v)| *v)
    }

    fn store(&mut self, register: u8, value: u16) {
        self.values.insert(register, value);
        self.writes.push((register, value));
    }
}

impl Peripheral for RegisterFile {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let (pointer, data) = match bytes.split_first() {
            Some(split) => split,
            None => return Ok(()),
        };
        self.pointer = *pointer;

        let mut register = *pointer;
        match self.width {
            Width::Byte => for byte in data {
                self.store(register, *byte as u16);
                register = register.wrapping_add(1);
            },
            Width::Word => for pair in data.chunks(2) {
                let value = match pair {
                    [msb, lsb] => u16::from_be_bytes([*msb, *lsb]),
                    [msb] => (*msb as u16) << 8,
                    _ => unreachable!(),
                };
                self.store(register, value);
                register = register.wrapping_add(1);
            },
        }

        Ok(())
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<()> {
        match self.width {
            Width::Byte => for byte in buffer.iter_mut() {
                *byte = self.get(self.pointer) as u8;
                self.pointer = self.pointer.wrapping_add(1);
            },
            Width::Word => for pair in buffer.chunks_mut(2) {
                let bytes = self.get(self.pointer).to_be_bytes();
                pair.copy_from_slice(&bytes[..pair.len()]);
                self.pointer = self.pointer.wrapping_add(1);
            },
        }

        Ok(())
    }
}

/// Bus routing transfers to simulated chips.
pub struct MockBus {
    devices: HashMap<u8, Box<dyn Peripheral>>,
    mux: Option<MuxSim>,
}

struct MuxSim {
    address: u8,
    control: Arc<AtomicU8>,
    downstream: HashMap<(u8, u8), Box<dyn Peripheral>>,
}

impl MuxSim {
    /// Channel (1-based) whose downstream chip at `address` is visible.
    fn selected(&self, address: u8) -> Option<u8> {
        let control = self.control.load(Ordering::SeqCst);
        (1..=8u8)
            .filter(|channel| control & (1 << (channel - 1)) != 0)
            .find(|channel| self.downstream.contains_key(&(*channel, address)))
    }
}

impl MockBus {
    /// Empty bus.
    pub fn new() -> MockBus {
        MockBus {
            devices: HashMap::new(),
            mux: None,
        }
    }

    /// Attach a chip directly to the bus.
    pub fn attach<P>(mut self, address: u8, peripheral: P) -> MockBus
    where
        P: Peripheral + 'static,
    {
        self.devices.insert(address, Box::new(peripheral));
        self
    }

    /// Simulate a TCA9548A at `address`.
    pub fn with_mux(mut self, address: u8) -> MockBus {
        self.mux = Some(MuxSim {
            address,
            control: Arc::new(AtomicU8::new(0)),
            downstream: HashMap::new(),
        });
        self
    }

    /// Attach a chip behind multiplexer `channel` (1 to 8).
    ///
    /// Panics if no multiplexer was configured with [`MockBus::with_mux`].
    pub fn attach_behind<P>(mut self, channel: u8, address: u8, peripheral: P) -> MockBus
    where
        P: Peripheral + 'static,
    {
        match self.mux.as_mut() {
            Some(mux) => { mux.downstream.insert((channel, address), Box::new(peripheral)); },
            None => panic!("attach_behind() without a multiplexer"),
        }
        self
    }

    /// Handle to the simulated multiplexer control byte.
    pub fn mux_control(&self) -> Option<Arc<AtomicU8>> {
        self.mux.as_ref().map(|mux| Arc::clone(&mux.control))
    }

    fn route(&mut self, address: u8) -> Result<&mut Box<dyn Peripheral>> {
        if let Some(mux) = self.mux.as_mut() {
            if let Some(channel) = mux.selected(address) {
                return mux.downstream.get_mut(&(channel, address))
                    .ok_or(BusError::Nack(address));
            }
        }

        self.devices.get_mut(&address)
            .ok_or(BusError::Nack(address))
    }

    fn mux_address(&self) -> Option<u8> {
        self.mux.as_ref().map(|mux| mux.address)
    }
}

impl Default for MockBus {
    fn default() -> MockBus {
        MockBus::new()
    }
}

impl I2cBus for MockBus {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<()> {
        if self.mux_address() == Some(address) {
            if let (Some(mux), Some(value)) = (self.mux.as_ref(), bytes.last()) {
                mux.control.store(*value, Ordering::SeqCst);
            }
            return Ok(());
        }

        self.route(address)?.write(bytes)
    }

    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<()> {
        if self.mux_address() == Some(address) {
            if let Some(mux) = self.mux.as_ref() {
                let control = mux.control.load(Ordering::SeqCst);
                for byte in buffer.iter_mut() {
                    *byte = control;
                }
            }
            return Ok(());
        }

        self.route(address)?.read(buffer)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    #[test]
    pub fn register_pointer_advances() {
        let mut regs = RegisterFile::bytes()
            .with(0x10, 0xAA)
            .with(0x11, 0xBB);
        regs.write(&[0x10]).unwrap();

        let mut buf = [0u8; 2];
        regs.read(&mut buf).unwrap();
        assert_eq!(buf, [0xAA, 0xBB]);
    }

    #[test]
    pub fn words_record_writes() {
        let mut regs = RegisterFile::words();
        regs.write(&[0x05, 0x10, 0x00]).unwrap();
        regs.write(&[0x05, 0x20, 0x00]).unwrap();

        assert_eq!(regs.get(0x05), 0x2000);
        assert_eq!(regs.writes(), &[(0x05, 0x1000), (0x05, 0x2000)]);
        assert_eq!(regs.last_write(0x05), Some(0x2000));
        assert_eq!(regs.last_write(0x00), None);
    }

    #[test]
    pub fn downstream_chip_needs_channel() {
        let mut bus = MockBus::new()
            .with_mux(0x70)
            .attach_behind(3, 0x50, RegisterFile::bytes().with(0x00, 0x42));
        let control = bus.mux_control().unwrap();

        let mut buf = [0u8; 1];
        assert!(bus.write_read(0x50, &[0x00], &mut buf).is_err());

        bus.write(0x70, &[0b0000_0100]).unwrap();
        assert_eq!(control.load(Ordering::SeqCst), 0b0000_0100);
        bus.write_read(0x50, &[0x00], &mut buf).unwrap();
        assert_eq!(buf[0], 0x42);

        bus.write(0x70, &[0x00]).unwrap();
        assert!(bus.read(0x50, &mut buf).is_err());
    }
}
