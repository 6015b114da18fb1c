//! Session configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::protocol::constants::*;

/// Which memory an update targets.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateTarget {
    #[default]
    Main,
    Eeprom,
}

/// Settle delays of the protocol.
///
/// Each one covers a device-side latency; see the constants they default to.
/// Serialized as whole microseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    #[serde(with = "micros")]
    pub disable_report: Duration,
    #[serde(with = "micros")]
    pub restore_retry: Duration,
    #[serde(with = "micros")]
    pub iap_reset: Duration,
    #[serde(with = "micros")]
    pub password: Duration,
    #[serde(with = "micros")]
    pub page_commit: Duration,
    #[serde(with = "micros")]
    pub large_page_commit: Duration,
    #[serde(with = "micros")]
    pub block_retry_backoff: Duration,
    #[serde(with = "micros")]
    pub flash_commit: Duration,
    #[serde(with = "micros")]
    pub final_reset: Duration,
    #[serde(with = "micros")]
    pub eeprom_mode: Duration,
    #[serde(with = "micros")]
    pub eeprom_page_commit: Duration,
    #[serde(with = "micros")]
    pub eeprom_checksum_poll: Duration,
    #[serde(with = "micros")]
    pub eeprom_record: Duration,
    #[serde(with = "micros")]
    pub eeprom_reboot: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            disable_report: DISABLE_REPORT_SETTLE,
            restore_retry: RESTORE_RETRY_DELAY,
            iap_reset: IAP_RESET_SETTLE,
            password: PASSWORD_SETTLE,
            page_commit: PAGE_COMMIT_DELAY,
            large_page_commit: LARGE_PAGE_COMMIT_DELAY,
            block_retry_backoff: BLOCK_RETRY_BACKOFF,
            flash_commit: FLASH_COMMIT_SETTLE,
            final_reset: FINAL_RESET_SETTLE,
            eeprom_mode: EEPROM_MODE_SETTLE,
            eeprom_page_commit: EEPROM_PAGE_COMMIT_DELAY,
            eeprom_checksum_poll: EEPROM_CHECKSUM_POLL_INTERVAL,
            eeprom_record: EEPROM_RECORD_SETTLE,
            eeprom_reboot: EEPROM_REBOOT_SETTLE,
        }
    }
}

impl Timing {
    /// No waits at all. Only for simulated devices; real hardware needs the
    /// default delays.
    pub fn immediate() -> Self {
        Self {
            disable_report: Duration::ZERO,
            restore_retry: Duration::ZERO,
            iap_reset: Duration::ZERO,
            password: Duration::ZERO,
            page_commit: Duration::ZERO,
            large_page_commit: Duration::ZERO,
            block_retry_backoff: Duration::ZERO,
            flash_commit: Duration::ZERO,
            final_reset: Duration::ZERO,
            eeprom_mode: Duration::ZERO,
            eeprom_page_commit: Duration::ZERO,
            eeprom_checksum_poll: Duration::ZERO,
            eeprom_record: Duration::ZERO,
            eeprom_reboot: Duration::ZERO,
        }
    }

    /// Commit delay after the last section of a page.
    pub fn commit_delay(&self, page_size: usize) -> Duration {
        if page_size >= 512 {
            self.large_page_commit
        } else {
            self.page_commit
        }
    }
}

/// Sleep unless the delay is zero.
pub(crate) fn settle(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}

mod micros {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_micros() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_micros(u64::deserialize(d)?))
    }
}

/// Configuration for an update or query run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// `/dev/hidrawN` index; skips discovery.
    pub hidraw: Option<u32>,
    /// `/dev/i2c-N` bus index; skips discovery.
    pub i2c_bus: Option<u32>,
    /// 7-bit I2C slave address.
    pub i2c_address: u16,
    pub vid: u16,
    pub pid: u16,
    /// Firmware image path.
    pub firmware: Option<PathBuf>,
    pub target: UpdateTarget,
    pub timing: Timing,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            hidraw: None,
            i2c_bus: None,
            i2c_address: DEFAULT_I2C_ADDRESS,
            vid: ELAN_VENDOR_ID,
            pid: DEFAULT_PRODUCT_ID,
            firmware: None,
            target: UpdateTarget::Main,
            timing: Timing::default(),
        }
    }
}

impl UpdateConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: UpdateConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
