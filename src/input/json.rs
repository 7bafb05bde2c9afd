/*! Testbench description in JSON.

```json
{
    "_version": 1,
    "bus": 1,
    "vsm": {
        "mux": "0x70",
        "converter": "0x50",
        "meter": "0x40",
        "calibration": "16V400mA",
        "enable_pins": [5, 6, 19, 26],
        "current_limit": 2
    },
    "adc": "0x48",
    "aux": { "addresses": ["0x41", "0x44"], "calibration": "16V400mA" },
    "sensors": {
        "lm75": "0x49",
        "bme280": "0x76",
        "stemma": "0x36",
        "ds18b20": ["/sys/bus/w1/devices/28-011927fdb603/w1_slave"]
    }
}
```

Everything but `_version` is optional and falls back to the stock board.
 */

use std::convert::TryFrom;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use etb_common::hw::ina219::Calibration;
use etb_common::hw::mic24045::CurrentLimit;
use etb_common::testbench::TestbenchConfig;

use super::{Result, TestbenchProvider};
use super::error::Error;

const CONFIG_VERSION: i64 = 1;

#[derive(Debug)]
pub struct JsonTestbenchParser {
    config_path: PathBuf,
}

impl JsonTestbenchParser {
    pub fn new(config_path: &Path) -> JsonTestbenchParser {
        JsonTestbenchParser {
            config_path: config_path.to_path_buf(),
        }
    }
}

impl TestbenchProvider for JsonTestbenchParser {
    fn testbench_config(&self) -> Result<TestbenchConfig> {
        let text = fs::read_to_string(&self.config_path)?;
        parse(&text)
    }
}

/// Build a configuration from JSON text.
pub fn parse(text: &str) -> Result<TestbenchConfig> {
    let description: Description = serde_json::from_str(text)?;
    if description.version != CONFIG_VERSION {
        return Err(Error::Version {
            provided: description.version,
            required: CONFIG_VERSION,
        });
    }

    description.into_config()
}

/// I2C address written either as a number or as a `"0x.."` string.
#[derive(Deserialize)]
#[serde(untagged)]
enum Address {
    Number(u64),
    Text(String),
}

impl Address {
    fn resolve(&self, what: &str) -> Result<u8> {
        let value = match self {
            Address::Number(n) => Some(*n),
            Address::Text(s) => {
                let s = s.trim();
                match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                    Some(hex) => u64::from_str_radix(hex, 16).ok(),
                    None => s.parse().ok(),
                }
            },
        };

        value.and_then(|v| u8::try_from(v).ok())
            .filter(|v| *v < 0x80)
            .ok_or_else(|| Error::Format(format!("{}: not a 7-bit I2C address", what)))
    }
}

fn resolve_into(address: &Option<Address>, what: &str, target: &mut u8) -> Result<()> {
    if let Some(address) = address {
        *target = address.resolve(what)?;
    }
    Ok(())
}

fn calibration(name: &str) -> Result<Calibration> {
    Calibration::try_from(name).map_err(Error::Format)
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Description {
    #[serde(rename = "_version")]
    version: i64,
    bus: Option<u8>,
    #[serde(default)]
    vsm: VsmDescription,
    adc: Option<Address>,
    #[serde(default)]
    aux: AuxDescription,
    #[serde(default)]
    sensors: SensorDescription,
}

#[derive(Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct VsmDescription {
    mux: Option<Address>,
    converter: Option<Address>,
    meter: Option<Address>,
    calibration: Option<String>,
    enable_pins: Option<[u8; 4]>,
    /// Amps.
    current_limit: Option<u8>,
}

#[derive(Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct AuxDescription {
    addresses: Option<[Address; 2]>,
    calibration: Option<String>,
}

#[derive(Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SensorDescription {
    lm75: Option<Address>,
    bme280: Option<Address>,
    stemma: Option<Address>,
    #[serde(default)]
    ds18b20: Vec<PathBuf>,
}

impl Description {
    fn into_config(self) -> Result<TestbenchConfig> {
        let mut config = TestbenchConfig::default();

        if let Some(bus) = self.bus {
            config.bus = bus;
        }

        let vsm = &self.vsm;
        resolve_into(&vsm.mux, "vsm.mux", &mut config.vsm.mux_address)?;
        resolve_into(&vsm.converter, "vsm.converter", &mut config.vsm.converter_address)?;
        resolve_into(&vsm.meter, "vsm.meter", &mut config.vsm.meter_address)?;
        if let Some(ref name) = vsm.calibration {
            config.vsm.calibration = calibration(name)?;
        }
        if let Some(pins) = vsm.enable_pins {
            config.enable_pins = pins;
        }
        if let Some(amps) = vsm.current_limit {
            let limit = CurrentLimit::try_from(amps)
                .map_err(|e| Error::Format(format!("vsm.current_limit: {}", e)))?;
            config.current_limit = Some(limit);
        }

        resolve_into(&self.adc, "adc", &mut config.adc_address)?;

        if let Some(ref addresses) = self.aux.addresses {
            for (i, address) in addresses.iter().enumerate() {
                config.aux_addresses[i] = address.resolve("aux.addresses")?;
            }
        }
        if let Some(ref name) = self.aux.calibration {
            config.aux_calibration = calibration(name)?;
        }

        let sensors = self.sensors;
        config.sensors.lm75 = sensors.lm75.as_ref()
            .map(|a| a.resolve("sensors.lm75"))
            .transpose()?;
        config.sensors.bme280 = sensors.bme280.as_ref()
            .map(|a| a.resolve("sensors.bme280"))
            .transpose()?;
        config.sensors.stemma = sensors.stemma.as_ref()
            .map(|a| a.resolve("sensors.stemma"))
            .transpose()?;
        config.sensors.ds18b20 = sensors.ds18b20;

        Ok(config)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    pub fn minimal_description_is_stock_board() {
        let config = parse(r#"{ "_version": 1 }"#).unwrap();
        assert_eq!(config, TestbenchConfig::default());
    }

    #[test]
    pub fn full_description() {
        let config = parse(r#"{
            "_version": 1,
            "bus": 0,
            "vsm": { "mux": "0x71", "meter": 69, "calibration": "32V2A",
                     "enable_pins": [1, 2, 3, 4], "current_limit": 3 },
            "adc": "0x49",
            "aux": { "addresses": [65, "0x45"], "calibration": "16V5A" },
            "sensors": { "lm75": "0x4A", "bme280": 118, "stemma": "0x36", "ds18b20": ["/tmp/w1_slave"] }
        }"#).unwrap();

        assert_eq!(config.bus, 0);
        assert_eq!(config.vsm.mux_address, 0x71);
        assert_eq!(config.vsm.converter_address, 0x50);
        assert_eq!(config.vsm.meter_address, 0x45);
        assert_eq!(config.vsm.calibration, Calibration::Range32V2A);
        assert_eq!(config.enable_pins, [1, 2, 3, 4]);
        assert_eq!(config.current_limit, Some(CurrentLimit::A3));
        assert_eq!(config.adc_address, 0x49);
        assert_eq!(config.aux_addresses, [0x41, 0x45]);
        assert_eq!(config.aux_calibration, Calibration::Range16V5A);
        assert_eq!(config.sensors.lm75, Some(0x4A));
        assert_eq!(config.sensors.bme280, Some(0x76));
        assert_eq!(config.sensors.stemma, Some(0x36));
        assert_eq!(config.sensors.ds18b20, vec![PathBuf::from("/tmp/w1_slave")]);
    }

    #[test]
    pub fn version_mismatch() {
        assert!(matches!(
            parse(r#"{ "_version": 2 }"#),
            Err(Error::Version { provided: 2, required: 1 })));
        assert!(matches!(parse(r#"{ "bus": 1 }"#), Err(Error::Json(_))));
    }

    #[test]
    pub fn invalid_values() {
        assert!(matches!(parse(r#"{ "_version": 1, "adc": "0x80" }"#), Err(Error::Format(_))));
        assert!(matches!(parse(r#"{ "_version": 1, "adc": "zz" }"#), Err(Error::Format(_))));
        assert!(matches!(
            parse(r#"{ "_version": 1, "vsm": { "calibration": "5V" } }"#),
            Err(Error::Format(_))));
        assert!(matches!(
            parse(r#"{ "_version": 1, "vsm": { "current_limit": 7 } }"#),
            Err(Error::Format(_))));
        assert!(matches!(parse(r#"{ "_version": 1, "typo": 0 }"#), Err(Error::Json(_))));
    }

    #[test]
    pub fn reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "_version": 1, "bus": 3 }}"#).unwrap();

        let config = JsonTestbenchParser::new(file.path()).testbench_config().unwrap();
        assert_eq!(config.bus, 3);

        let missing = JsonTestbenchParser::new(Path::new("/nonexistent/etb.json"));
        assert!(matches!(missing.testbench_config(), Err(Error::IO(_))));
    }
}
