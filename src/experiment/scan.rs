//! I2C bus scan.

use std::io::Write;

use log::info;

use etb_common::bus;
use etb_common::bus::Bus;

use super::Result;

/// `i2cdetect`-style grid of the responding addresses.
pub fn table(found: &[u8]) -> String {
    let mut text = String::from("     0  1  2  3  4  5  6  7  8  9  a  b  c  d  e  f\n");
    for row in (0..0x80u8).step_by(16) {
        text.push_str(&format!("{:02x}:", row));
        for address in row..row + 16 {
            if address < bus::SCAN_START || address >= bus::SCAN_END {
                text.push_str("   ");
            } else if found.contains(&address) {
                text.push_str(&format!(" {:02x}", address));
            } else {
                text.push_str(" --");
            }
        }
        text.push('\n');
    }
    text
}

/// Probe every regular address and print what answered.
pub fn run(bus: &Bus, out: &mut dyn Write) -> Result<Vec<u8>> {
    let found = bus::scan(bus, bus::SCAN_START..bus::SCAN_END);
    info!("{} device(s) on i2c-{}", found.len(), bus.number());

    write!(out, "{}", table(&found))?;
    Ok(found)
}
