//! Board description compiled into the binary.

use log::debug;

use etb_common::sens::ds18b20;
use etb_common::testbench::TestbenchConfig;

use super::{Result, TestbenchProvider};

/// The stock ETB board: default addresses, DS18B20 sensors found by the
/// kernel, no other optional sensors.
#[derive(Debug, Default)]
pub struct HardCodedTestbench {  }

impl HardCodedTestbench {
    pub fn new() -> HardCodedTestbench {
        HardCodedTestbench {  }
    }
}

impl TestbenchProvider for HardCodedTestbench {
    fn testbench_config(&self) -> Result<TestbenchConfig> {
        let mut config = TestbenchConfig::default();

        // No w1 driver loaded simply means no sensors.
        match ds18b20::discover() {
            Ok(found) => config.sensors.ds18b20 = found,
            Err(e) => debug!("no one-wire sensors: {}", e),
        }

        Ok(config)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    #[test]
    pub fn board_defaults() {
        let config = HardCodedTestbench::new().testbench_config().unwrap();
        assert_eq!(config.bus, 1);
        assert_eq!(config.enable_pins, [5, 6, 19, 26]);
        assert_eq!(config.aux_addresses, [0x41, 0x44]);
        assert_eq!(config.sensors.lm75, None);
    }
}
