//! Bosch BME280 temperature, pressure and humidity sensor.

use std::thread;
use std::time::Duration;

use log::debug;

use crate::bus::{Bus, Device};
use crate::sens::{Result, SensorError};

#[allow(unused)]
mod register {
    pub const CALIB_00: u8  = 0x88;
    pub const DIG_H1: u8    = 0xA1;
    pub const CHIP_ID: u8   = 0xD0;
    pub const RESET: u8     = 0xE0;
    pub const CALIB_26: u8  = 0xE1;
    pub const CTRL_HUM: u8  = 0xF2;
    pub const STATUS: u8    = 0xF3;
    pub const CTRL_MEAS: u8 = 0xF4;
    pub const CONFIG: u8    = 0xF5;
    pub const PRESS_MSB: u8 = 0xF7;
}

/// Address with SDO grounded.
pub const DEFAULT_ADDRESS: u8 = 0x76;

const CHIP_ID: u8 = 0x60;
const RESET_VALUE: u8 = 0xB6;
const STATUS_MEASURING: u8 = 0x08;

const READY_POLL: Duration = Duration::from_millis(5);
const READY_TIMEOUT: Duration = Duration::from_millis(500);
/// Upper bound of one ×1 conversion of all three channels.
const FIRST_MEASUREMENT: Duration = Duration::from_millis(10);

/// Oversampling setting per channel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Oversampling {
    Skipped,
    X1,
    X2,
    X4,
    X8,
    X16,
}

impl Oversampling {
    fn code(self) -> u8 {
        self as u8
    }
}

/// Inactive time between measurements in normal mode.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Standby {
    Ms0_5,
    Ms62_5,
    Ms125,
    Ms250,
    Ms500,
    Ms1000,
    Ms10,
    Ms20,
}

impl Standby {
    fn code(self) -> u8 {
        self as u8
    }
}

/// IIR filter coefficient.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Filter {
    Off,
    X2,
    X4,
    X8,
    X16,
}

impl Filter {
    fn code(self) -> u8 {
        self as u8
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Mode {
    Sleep,
    Forced,
    Normal,
}

impl Mode {
    fn code(self) -> u8 {
        match self {
            Mode::Sleep => 0b00,
            Mode::Forced => 0b01,
            Mode::Normal => 0b11,
        }
    }
}

/// Factory trimming parameters.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Calibration {
    pub t1: u16,
    pub t2: i16,
    pub t3: i16,
    pub p1: u16,
    pub p2: i16,
    pub p3: i16,
    pub p4: i16,
    pub p5: i16,
    pub p6: i16,
    pub p7: i16,
    pub p8: i16,
    pub p9: i16,
    pub h1: u8,
    pub h2: i16,
    pub h3: u8,
    pub h4: i16,
    pub h5: i16,
    pub h6: i8,
}

impl Calibration {
    /// Decode the 26 bytes at 0x88 and the 7 bytes at 0xE1.
    pub fn from_blocks(low: &[u8; 26], high: &[u8; 7]) -> Calibration {
        let u16_at = |i: usize| u16::from_le_bytes([low[i], low[i + 1]]);
        let i16_at = |i: usize| u16_at(i) as i16;

        Calibration {
            t1: u16_at(0),
            t2: i16_at(2),
            t3: i16_at(4),
            p1: u16_at(6),
            p2: i16_at(8),
            p3: i16_at(10),
            p4: i16_at(12),
            p5: i16_at(14),
            p6: i16_at(16),
            p7: i16_at(18),
            p8: i16_at(20),
            p9: i16_at(22),
            // low[24] is unused.
            h1: low[25],
            h2: i16::from_le_bytes([high[0], high[1]]),
            h3: high[2],
            h4: ((high[3] as i8 as i16) << 4) | (high[4] & 0x0F) as i16,
            h5: ((high[5] as i8 as i16) << 4) | (high[4] >> 4) as i16,
            h6: high[6] as i8,
        }
    }

    /// Fine temperature shared by the pressure and humidity compensation.
    ///
    /// Intermediates are 64-bit and wrap on garbage input.
    pub fn t_fine(&self, adc_t: i32) -> i32 {
        let adc_t = adc_t as i64;
        let t1 = self.t1 as i64;
        let var1 = ((adc_t >> 3) - (t1 << 1)).wrapping_mul(self.t2 as i64) >> 11;
        let dt = (adc_t >> 4) - t1;
        let var2 = (dt.wrapping_mul(dt) >> 12).wrapping_mul(self.t3 as i64) >> 14;
        var1.wrapping_add(var2) as i32
    }

    /// Degrees Celsius for a fine temperature.
    pub fn temperature(t_fine: i32) -> f64 {
        ((t_fine as i64 * 5 + 128) >> 8) as f64 / 100.0
    }

    /// Pressure in pascals (64-bit integer compensation).
    pub fn pressure(&self, adc_p: i32, t_fine: i32) -> Option<f64> {
        let mut var1 = t_fine as i64 - 128_000;
        let mut var2 = var1.wrapping_mul(var1).wrapping_mul(self.p6 as i64);
        var2 = var2.wrapping_add(var1.wrapping_mul(self.p5 as i64) << 17);
        var2 = var2.wrapping_add((self.p4 as i64) << 35);
        var1 = (var1.wrapping_mul(var1).wrapping_mul(self.p3 as i64) >> 8)
            .wrapping_add(var1.wrapping_mul(self.p2 as i64) << 12);
        var1 = (1i64 << 47).wrapping_add(var1).wrapping_mul(self.p1 as i64) >> 33;
        if var1 == 0 {
            return None;
        }

        let mut p = 1_048_576 - adc_p as i64;
        p = (p << 31).wrapping_sub(var2).wrapping_mul(3125).wrapping_div(var1);
        let var1 = (self.p9 as i64).wrapping_mul(p >> 13).wrapping_mul(p >> 13) >> 25;
        let var2 = (self.p8 as i64).wrapping_mul(p) >> 19;
        p = (p.wrapping_add(var1).wrapping_add(var2) >> 8).wrapping_add((self.p7 as i64) << 4);

        Some(p as f64 / 256.0)
    }

    /// Relative humidity in percent, clamped to 0..=100.
    pub fn humidity(&self, adc_h: i32, t_fine: i32) -> f64 {
        let h = t_fine as f64 - 76800.0;
        let h = (adc_h as f64 - (self.h4 as f64 * 64.0 + self.h5 as f64 / 16384.0 * h))
            * (self.h2 as f64 / 65536.0
               * (1.0 + self.h6 as f64 / 67_108_864.0 * h
                  * (1.0 + self.h3 as f64 / 67_108_864.0 * h)));
        let h = h * (1.0 - self.h1 as f64 * h / 524_288.0);

        h.max(0.0).min(100.0)
    }
}

/// Dew point approximation valid above 50 %RH.
pub fn dew_point(celsius: f64, humidity: f64) -> f64 {
    celsius - (100.0 - humidity) / 5.0
}

/// Compensated measurement.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Measurement {
    pub celsius: f64,
    /// Hectopascals.
    pub pressure: f64,
    pub humidity: f64,
}

impl Measurement {
    pub fn dew_point(&self) -> f64 {
        dew_point(self.celsius, self.humidity)
    }
}

/// Driver for the BME280.
#[derive(Debug)]
pub struct Bme280 {
    device: Device,
    calibration: Calibration,
}

impl Bme280 {
    /// Verify the chip id, load the calibration and start normal mode
    /// (×1 oversampling, 250 ms standby, filter off).
    pub fn new(bus: &Bus, address: u8) -> Result<Bme280> {
        let device = bus.device(address);
        let id = device.read_u8(register::CHIP_ID)?;
        if id != CHIP_ID {
            return Err(SensorError::ChipId { expected: CHIP_ID, actual: id });
        }

        let mut low = [0u8; 26];
        let mut high = [0u8; 7];
        device.read_block(register::CALIB_00, &mut low)?;
        device.read_block(register::CALIB_26, &mut high)?;

        let bme = Bme280 {
            device,
            calibration: Calibration::from_blocks(&low, &high),
        };
        bme.set_spi3w(false)?;
        bme.set_oversampling(Oversampling::X1, Oversampling::X1, Oversampling::X1)?;
        bme.set_standby(Standby::Ms250)?;
        bme.set_filter(Filter::Off)?;
        bme.set_mode(Mode::Normal)?;
        thread::sleep(FIRST_MEASUREMENT);
        debug!("BME280 0x{:02X} ready", address);

        Ok(bme)
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn reset(&self) -> Result<()> {
        Ok(self.device.write_u8(register::RESET, RESET_VALUE)?)
    }

    /// Oversampling for temperature, pressure and humidity.
    ///
    /// Humidity only takes effect with the next write to ctrl_meas, which
    /// this also performs.
    pub fn set_oversampling(&self, temperature: Oversampling, pressure: Oversampling,
                            humidity: Oversampling) -> Result<()> {
        self.update(register::CTRL_HUM, 0b111, 0, humidity.code())?;
        self.update(register::CTRL_MEAS, 0b111, 5, temperature.code())?;
        self.update(register::CTRL_MEAS, 0b111, 2, pressure.code())
    }

    pub fn set_mode(&self, mode: Mode) -> Result<()> {
        self.update(register::CTRL_MEAS, 0b11, 0, mode.code())
    }

    pub fn set_standby(&self, standby: Standby) -> Result<()> {
        self.update(register::CONFIG, 0b111, 5, standby.code())
    }

    pub fn set_filter(&self, filter: Filter) -> Result<()> {
        self.update(register::CONFIG, 0b111, 2, filter.code())
    }

    /// Enable the 3-wire SPI interface bit.
    pub fn set_spi3w(&self, enabled: bool) -> Result<()> {
        self.update(register::CONFIG, 0b1, 0, enabled as u8)
    }

    /// Read all channels from one burst and compensate them.
    pub fn measure(&self) -> Result<Measurement> {
        self.wait_ready()?;

        let mut data = [0u8; 8];
        self.device.read_block(register::PRESS_MSB, &mut data)?;
        let adc_p = (data[0] as i32) << 12 | (data[1] as i32) << 4 | (data[2] as i32) >> 4;
        let adc_t = (data[3] as i32) << 12 | (data[4] as i32) << 4 | (data[5] as i32) >> 4;
        let adc_h = (data[6] as i32) << 8 | data[7] as i32;

        let t_fine = self.calibration.t_fine(adc_t);
        let pressure = self.calibration.pressure(adc_p, t_fine)
            .ok_or(SensorError::InvalidRaw(adc_p as i64))?;

        Ok(Measurement {
            celsius: Calibration::temperature(t_fine),
            pressure: pressure / 100.0,
            humidity: self.calibration.humidity(adc_h, t_fine),
        })
    }

    fn wait_ready(&self) -> Result<()> {
        let mut waited = Duration::from_millis(0);
        while self.device.read_u8(register::STATUS)? & STATUS_MEASURING != 0 {
            if waited >= READY_TIMEOUT {
                return Err(SensorError::Timeout);
            }
            thread::sleep(READY_POLL);
            waited += READY_POLL;
        }
        Ok(())
    }

    fn update(&self, register: u8, mask: u8, shift: u8, value: u8) -> Result<()> {
        let old = self.device.read_u8(register)?;
        let new = (old & !(mask << shift)) | ((value & mask) << shift);
        self.device.write_u8(register, new)?;
        Ok(())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::bus::mock::{MockBus, RegisterFile, Shared};

    fn datasheet_calibration() -> Calibration {
        Calibration {
            t1: 27504,
            t2: 26435,
            t3: -1000,
            p1: 36477,
            p2: -10685,
            p3: 3024,
            p4: 2855,
            p5: 140,
            p6: -7,
            p7: 15500,
            p8: -14600,
            p9: 6000,
            h1: 75,
            h2: 362,
            h3: 0,
            h4: 313,
            h5: 50,
            h6: 30,
        }
    }

    #[test]
    pub fn temperature_compensation() {
        let cal = datasheet_calibration();
        let t_fine = cal.t_fine(519888);
        assert_eq!(t_fine, 128422);
        assert_eq!(Calibration::temperature(t_fine), 25.08);
    }

    #[test]
    pub fn pressure_compensation() {
        let cal = datasheet_calibration();
        let pascal = cal.pressure(415148, 128422).unwrap();
        assert!((pascal - 100653.27).abs() < 1.0, "got {}", pascal);
    }

    #[test]
    pub fn humidity_is_clamped() {
        let cal = datasheet_calibration();
        assert_eq!(cal.humidity(0, 128422), 0.0);
        assert_eq!(cal.humidity(65535, 128422), 100.0);
        let mid = cal.humidity(30000, 128422);
        assert!(mid > 0.0 && mid < 100.0);
    }

    #[test]
    pub fn calibration_block_decoding() {
        let mut low = [0u8; 26];
        low[0..2].copy_from_slice(&27504u16.to_le_bytes());
        low[4..6].copy_from_slice(&(-1000i16).to_le_bytes());
        low[25] = 75;
        // H4 = 0x139 (313), H5 = 0x032 (50) share byte 0xE5.
        let high = [0x6A, 0x01, 0x00, 0x13, 0x29, 0x03, 0x1E];

        let cal = Calibration::from_blocks(&low, &high);
        assert_eq!(cal.t1, 27504);
        assert_eq!(cal.t3, -1000);
        assert_eq!(cal.h1, 75);
        assert_eq!(cal.h2, 362);
        assert_eq!(cal.h4, 313);
        assert_eq!(cal.h5, 50);
        assert_eq!(cal.h6, 30);
    }

    /// An unpowered chip reads back 0xFF everywhere.
    #[test]
    pub fn floating_bus_does_not_overflow() {
        let cal = Calibration::from_blocks(&[0xFF; 26], &[0xFF; 7]);
        let adc_t = (0xFF << 12) | (0xFF << 4) | (0xFF >> 4);

        let t_fine = cal.t_fine(adc_t);
        let _ = Calibration::temperature(t_fine);
        let _ = cal.pressure(adc_t, t_fine);
        let _ = cal.pressure(adc_t, i32::MIN);
        let _ = cal.pressure(i32::MIN, i32::MAX);
        let _ = cal.humidity(0xFFFF, t_fine);

        let extreme = Calibration { t1: u16::MAX, t2: i16::MIN, t3: i16::MIN, ..cal };
        let _ = Calibration::temperature(extreme.t_fine(i32::MAX));
        let _ = Calibration::temperature(extreme.t_fine(i32::MIN));
    }

    #[test]
    pub fn dew_point_approximation() {
        assert_eq!(dew_point(25.0, 60.0), 17.0);
    }

    #[test]
    pub fn wrong_chip_is_rejected() {
        let regs = RegisterFile::bytes().with(register::CHIP_ID, 0x58);
        let bus = Bus::new(1, MockBus::new().attach(DEFAULT_ADDRESS, regs));
        assert!(matches!(Bme280::new(&bus, DEFAULT_ADDRESS),
                         Err(SensorError::ChipId { actual: 0x58, .. })));
    }

    #[test]
    pub fn init_and_measure() {
        let mut regs = RegisterFile::bytes().with(register::CHIP_ID, CHIP_ID as u16);
        let cal = datasheet_calibration();
        let words: [u16; 12] = [
            cal.t1, cal.t2 as u16, cal.t3 as u16, cal.p1, cal.p2 as u16, cal.p3 as u16,
            cal.p4 as u16, cal.p5 as u16, cal.p6 as u16, cal.p7 as u16, cal.p8 as u16, cal.p9 as u16,
        ];
        for (i, word) in words.iter().enumerate() {
            let [lo, hi] = word.to_le_bytes();
            regs.set(register::CALIB_00 + 2 * i as u8, lo as u16);
            regs.set(register::CALIB_00 + 2 * i as u8 + 1, hi as u16);
        }
        // adc_P = 415148 (0x655AC), adc_T = 519888 (0x7EED0), adc_H = 0.
        for (i, byte) in [0x65u8, 0x5A, 0xC0, 0x7E, 0xED, 0x00, 0x00, 0x00].iter().enumerate() {
            regs.set(register::PRESS_MSB + i as u8, *byte as u16);
        }
        let regs = Shared::new(regs);
        let bus = Bus::new(1, MockBus::new().attach(DEFAULT_ADDRESS, regs.clone()));

        let bme = Bme280::new(&bus, DEFAULT_ADDRESS).unwrap();
        assert_eq!(bme.calibration().p9, 6000);
        assert_eq!(regs.lock().get(register::CTRL_MEAS), 0b001_001_11);
        assert_eq!(regs.lock().get(register::CONFIG), 0b011_000_00);

        let m = bme.measure().unwrap();
        assert_eq!(m.celsius, 25.08);
        assert!((m.pressure - 1006.53).abs() < 0.01);
    }
}
