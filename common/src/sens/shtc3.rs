//! Sensirion SHTC3 humidity and temperature sensor.

use std::thread;
use std::time::Duration;

use crate::bus::{Bus, Device};
use crate::sens::{Result, SensorError};

/// Fixed chip address.
pub const DEFAULT_ADDRESS: u8 = 0x70;

#[allow(unused)]
mod command {
    pub const READ_ID: u16 = 0xEFC8;
    pub const SOFT_RESET: u16 = 0x805D;
    pub const SLEEP: u16 = 0xB098;
    pub const WAKEUP: u16 = 0x3517;
    /// Temperature first, clock stretching off, normal mode.
    pub const MEASURE_NORMAL: u16 = 0x7866;
    /// Temperature first, clock stretching off, low power mode.
    pub const MEASURE_LOW_POWER: u16 = 0x609C;
}

const CRC_POLYNOMIAL: u8 = 0x31;
const CRC_INIT: u8 = 0xFF;

const WAKEUP_DELAY: Duration = Duration::from_micros(240);
const MEASURE_DELAY_NORMAL: Duration = Duration::from_micros(12_100);
const MEASURE_DELAY_LOW_POWER: Duration = Duration::from_micros(800);

/// Sensirion CRC-8 over `data`.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = CRC_INIT;
    for byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ CRC_POLYNOMIAL
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Check a word and its trailing CRC byte.
fn checked_word(bytes: &[u8]) -> Result<u16> {
    let expected = crc8(&bytes[..2]);
    if expected != bytes[2] {
        return Err(SensorError::Crc { expected, actual: bytes[2] });
    }
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub fn raw_to_celsius(raw: u16) -> f64 {
    175.0 * (raw as f64 / 65536.0) - 45.0
}

pub fn raw_to_humidity(raw: u16) -> f64 {
    100.0 * (raw as f64 / 65536.0)
}

/// A temperature and humidity pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Measurement {
    pub celsius: f64,
    pub humidity: f64,
}

/// Driver for the SHTC3.
#[derive(Debug)]
pub struct Shtc3 {
    device: Device,
}

impl Shtc3 {
    pub fn new(bus: &Bus, address: u8) -> Shtc3 {
        Shtc3 {
            device: bus.device(address),
        }
    }

    pub fn wake_up(&self) -> Result<()> {
        self.device.write_command(command::WAKEUP)?;
        thread::sleep(WAKEUP_DELAY);
        Ok(())
    }

    pub fn sleep(&self) -> Result<()> {
        Ok(self.device.write_command(command::SLEEP)?)
    }

    pub fn reset(&self) -> Result<()> {
        Ok(self.device.write_command(command::SOFT_RESET)?)
    }

    /// Product code register.
    pub fn id(&self) -> Result<u16> {
        self.device.write_command(command::READ_ID)?;
        let mut buf = [0u8; 3];
        self.device.read_bytes(&mut buf)?;
        checked_word(&buf)
    }

    /// Wake the sensor, measure temperature then humidity, and put it back to sleep.
    pub fn measure(&self, low_power: bool) -> Result<Measurement> {
        let (cmd, delay) = if low_power {
            (command::MEASURE_LOW_POWER, MEASURE_DELAY_LOW_POWER)
        } else {
            (command::MEASURE_NORMAL, MEASURE_DELAY_NORMAL)
        };

        self.wake_up()?;
        self.device.write_command(cmd)?;
        thread::sleep(delay);

        let mut buf = [0u8; 6];
        self.device.read_bytes(&mut buf)?;
        self.sleep()?;

        let temperature = checked_word(&buf[0..3])?;
        let humidity = checked_word(&buf[3..6])?;

        Ok(Measurement {
            celsius: raw_to_celsius(temperature),
            humidity: raw_to_humidity(humidity),
        })
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::bus::mock::{MockBus, Peripheral, Shared};

    /// Answers every read with a fixed temperature/humidity frame.
    struct FakeShtc3 {
        commands: Vec<u16>,
        frame: Vec<u8>,
    }

    impl FakeShtc3 {
        fn new(temperature: u16, humidity: u16) -> FakeShtc3 {
            let mut frame = Vec::new();
            for word in &[temperature, humidity] {
                let bytes = word.to_be_bytes();
                frame.extend_from_slice(&bytes);
                frame.push(crc8(&bytes));
            }
            FakeShtc3 { commands: Vec::new(), frame }
        }
    }

    impl Peripheral for FakeShtc3 {
        fn write(&mut self, bytes: &[u8]) -> crate::bus::Result<()> {
            self.commands.push(u16::from_be_bytes([bytes[0], bytes[1]]));
            Ok(())
        }

        fn read(&mut self, buffer: &mut [u8]) -> crate::bus::Result<()> {
            buffer.copy_from_slice(&self.frame[..buffer.len()]);
            Ok(())
        }
    }

    #[test]
    pub fn crc_reference_value() {
        assert_eq!(crc8(&[0xBE, 0xEF]), 0x92);
    }

    #[test]
    pub fn conversion() {
        assert!((raw_to_celsius(0x6666) - 25.0).abs() < 0.01);
        assert!((raw_to_humidity(0x8000) - 50.0).abs() < 1e-9);
    }

    #[test]
    pub fn measurement_sequence() {
        let fake = Shared::new(FakeShtc3::new(0x6666, 0x8000));
        let bus = Bus::new(1, MockBus::new().attach(DEFAULT_ADDRESS, fake.clone()));
        let sensor = Shtc3::new(&bus, DEFAULT_ADDRESS);

        let m = sensor.measure(true).unwrap();
        assert!((m.celsius - 25.0).abs() < 0.01);
        assert!((m.humidity - 50.0).abs() < 1e-9);
        assert_eq!(fake.lock().commands, vec![command::WAKEUP, command::MEASURE_LOW_POWER, command::SLEEP]);
    }

    #[test]
    pub fn corrupted_frame_is_rejected() {
        let fake = Shared::new(FakeShtc3::new(0x6666, 0x8000));
        fake.lock().frame[5] ^= 0xFF;
        let bus = Bus::new(1, MockBus::new().attach(DEFAULT_ADDRESS, fake));
        let sensor = Shtc3::new(&bus, DEFAULT_ADDRESS);

        assert!(matches!(sensor.measure(false), Err(SensorError::Crc { .. })));
    }
}
