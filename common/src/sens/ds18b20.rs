/*! DS18B20 one-wire temperature sensor, read through the Linux `w1` driver.

The kernel exposes every sensor as `/sys/bus/w1/devices/28-<serial>/w1_slave`:

```text
72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
72 01 4b 46 7f ff 0e 10 57 t=23125
```
 */

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::sens::{Result, SensorError};

/// Where the `w1` driver lists its slaves.
pub const W1_DEVICES: &str = "/sys/bus/w1/devices";

/// Family code prefix of DS18B20 slaves.
const FAMILY_PREFIX: &str = "28-";

const MAX_ATTEMPTS: usize = 10;
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// Scratchpad content of a sensor that did not answer.
const EMPTY_SCRATCHPAD: &str = "00 00 00 00 00 00 00 00 00";

/// Temperature in degrees Celsius from `w1_slave` contents.
///
/// `None` if the CRC check failed, the scratchpad is empty or no value is present.
pub fn parse(contents: &str) -> Option<f64> {
    let mut lines = contents.lines();
    let status = lines.next()?.trim();
    if !status.ends_with("YES") || status.contains(EMPTY_SCRATCHPAD) {
        return None;
    }

    let data = lines.next()?;
    let position = data.find("t=")?;
    let millidegrees: i32 = data[position + 2..].trim().parse().ok()?;
    Some(millidegrees as f64 / 1000.0)
}

/// Slave files of every DS18B20 under `devices`.
pub fn discover_in(devices: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(devices)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(FAMILY_PREFIX) {
            found.push(entry.path().join("w1_slave"));
        }
    }
    found.sort();

    Ok(found)
}

/// Slave files of every DS18B20 the kernel knows.
pub fn discover() -> Result<Vec<PathBuf>> {
    discover_in(Path::new(W1_DEVICES))
}

/// One sensor.
#[derive(Clone, Debug)]
pub struct Ds18b20 {
    path: PathBuf,
    attempts: usize,
    retry_delay: Duration,
}

impl Ds18b20 {
    /// Probe whose `w1_slave` file is at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Ds18b20 {
        Ds18b20 {
            path: path.as_ref().to_path_buf(),
            attempts: MAX_ATTEMPTS,
            retry_delay: RETRY_DELAY,
        }
    }

    /// Override how often and how patiently a read is retried.
    pub fn with_retry(mut self, attempts: usize, delay: Duration) -> Ds18b20 {
        self.attempts = attempts.max(1);
        self.retry_delay = delay;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the temperature, retrying while the driver reports bad data.
    pub fn read_temperature(&self) -> Result<f64> {
        for attempt in 1..=self.attempts {
            let contents = fs::read_to_string(&self.path)?;
            if let Some(celsius) = parse(&contents) {
                debug!("{}: {} °C", self.path.display(), celsius);
                return Ok(celsius);
            }

            if attempt < self.attempts {
                thread::sleep(self.retry_delay);
            }
        }

        warn!("{} gave no valid reading after {} attempts", self.path.display(), self.attempts);
        Err(SensorError::Unreadable(self.path.clone()))
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    const GOOD: &str = "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n72 01 4b 46 7f ff 0e 10 57 t=23125\n";
    const BAD_CRC: &str = "72 01 4b 46 7f ff 0e 10 57 : crc=57 NO\n72 01 4b 46 7f ff 0e 10 57 t=23125\n";
    const EMPTY: &str = "00 00 00 00 00 00 00 00 00 : crc=00 YES\n00 00 00 00 00 00 00 00 00 t=0\n";

    #[test]
    pub fn parsing() {
        assert_eq!(parse(GOOD), Some(23.125));
        assert_eq!(parse(BAD_CRC), None);
        assert_eq!(parse(EMPTY), None);
        assert_eq!(parse(""), None);
        assert_eq!(parse("xx : crc=57 YES\nxx t=-1062\n"), Some(-1.062));
    }

    #[test]
    pub fn read_and_give_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w1_slave");
        File::create(&path).unwrap().write_all(GOOD.as_bytes()).unwrap();

        let sensor = Ds18b20::new(&path).with_retry(3, Duration::from_millis(0));
        assert_eq!(sensor.read_temperature().unwrap(), 23.125);

        File::create(&path).unwrap().write_all(BAD_CRC.as_bytes()).unwrap();
        assert!(matches!(sensor.read_temperature(), Err(SensorError::Unreadable(_))));
    }

    #[test]
    pub fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let sensor = Ds18b20::new(dir.path().join("nope"));
        assert!(matches!(sensor.read_temperature(), Err(SensorError::Io(_))));
    }

    #[test]
    pub fn discovery_filters_family() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("28-0316a2794aff")).unwrap();
        fs::create_dir(dir.path().join("28-0000075b6d1a")).unwrap();
        fs::create_dir(dir.path().join("w1_bus_master1")).unwrap();

        let found = discover_in(dir.path()).unwrap();
        assert_eq!(found, vec![
            dir.path().join("28-0000075b6d1a").join("w1_slave"),
            dir.path().join("28-0316a2794aff").join("w1_slave"),
        ]);
    }
}
