// SPDX-License-Identifier: MIT

//! Per-device configuration overrides.
//!
//! Values are only validated where they are consumed, so a document that names
//! a line rate the chip cannot run still loads and fails at link setup.

use crate::link::error_rate::ErrorRate;
use crate::timeout::{Platform, TimeoutOverrides};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use strum::Display;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum LineRate {
    #[serde(rename = "16G")]
    Gbps16,
    #[serde(rename = "20G")]
    Gbps20,
    #[serde(rename = "25G")]
    Gbps25,
    #[serde(rename = "25.78125G")]
    Gbps25_78125,
    #[serde(rename = "32G")]
    Gbps32,
    #[serde(rename = "40G")]
    Gbps40,
    #[serde(rename = "50G")]
    Gbps50,
    #[serde(rename = "53.125G")]
    Gbps53_125,
    #[serde(rename = "100G")]
    Gbps100,
    #[serde(rename = "106.25G")]
    Gbps106_25,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum TrainingModel {
    Legacy,
    Ali,
}

/// Near-end loopback modes applied before training.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Loopback {
    pub nea: bool,
    pub nedr: bool,
    pub nedw: bool,
}

impl Loopback {
    pub fn any(&self) -> bool {
        self.nea || self.nedr || self.nedw
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxTrainOverrides {
    pub fom_format: Option<u8>,
    pub optimization_algorithm: Option<u8>,
    pub adjustment_algorithm: Option<u8>,
    pub min_train_time_mantissa: Option<u8>,
    pub min_train_time_exponent: Option<u8>,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkipBufferReady {
    pub tlc: bool,
    pub nport: bool,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecalSettings {
    pub min_recal_time_mantissa: u8,
    pub min_recal_time_exponent: u8,
    pub max_recal_period_mantissa: u8,
    pub max_recal_period_exponent: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub platform: Platform,
    pub speed: Option<LineRate>,
    pub reference_clock_mode: Option<u8>,
    pub txtrain: TxTrainOverrides,
    pub block_code_mode: Option<u8>,
    pub ac_coupled_mask: u64,
    pub link_disable_mask: u64,
    pub disabled_remote_end_mask: u64,
    pub crc_bit_error_rate_short: Option<ErrorRate>,
    pub crc_bit_error_rate_long: Option<ErrorRate>,
    pub skip_buffer_ready: SkipBufferReady,
    pub enable_pm: bool,
    pub loopback: BTreeMap<u32, Loopback>,
    pub link_recal: Option<RecalSettings>,
    pub timeouts: TimeoutOverrides,
    pub training_model: Option<TrainingModel>,
}

fn mask_has(mask: u64, link: u32) -> bool {
    link < u64::BITS && mask & (1u64 << link) != 0
}

impl DeviceConfig {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_reader(File::open(path)?)
    }

    pub fn is_link_disabled(&self, link: u32) -> bool {
        mask_has(self.link_disable_mask, link)
    }

    pub fn is_remote_end_disabled(&self, link: u32) -> bool {
        mask_has(self.disabled_remote_end_mask, link)
    }

    pub fn is_ac_coupled(&self, link: u32) -> bool {
        mask_has(self.ac_coupled_mask, link)
    }

    pub fn loopback(&self, link: u32) -> Loopback {
        self.loopback.get(&link).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let json = r#"{
            "platform": "emulation",
            "speed": "53.125G",
            "link_disable_mask": 4,
            "ac_coupled_mask": 1,
            "crc_bit_error_rate_short": {
                "threshold_man": 2, "threshold_exp": 3,
                "timescale_man": 1, "timescale_exp": 4
            },
            "loopback": { "1": { "nea": true } },
            "timeouts": { "ceiling_ms": 25 },
            "training_model": "ali"
        }"#;
        let config = DeviceConfig::from_reader(json.as_bytes()).unwrap();
        assert_eq!(config.platform, Platform::Emulation);
        assert_eq!(config.speed, Some(LineRate::Gbps53_125));
        assert!(config.is_link_disabled(2));
        assert!(!config.is_link_disabled(1));
        assert!(config.is_ac_coupled(0));
        assert!(config.loopback(1).nea);
        assert!(!config.loopback(0).any());
        assert_eq!(config.timeouts.ceiling_ms, Some(25));
        assert_eq!(config.training_model, Some(TrainingModel::Ali));
        let short = config.crc_bit_error_rate_short.unwrap();
        assert_eq!(short.threshold_exp, 3);
        assert!(!config.enable_pm);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = DeviceConfig::from_reader("{}".as_bytes()).unwrap();
        assert_eq!(config, DeviceConfig::default());
        assert!(!config.is_link_disabled(63));
        assert!(!config.is_link_disabled(64));
    }

    #[test]
    fn test_unknown_line_rate_is_rejected() {
        assert!(DeviceConfig::from_reader(r#"{"speed": "7G"}"#.as_bytes()).is_err());
    }
}
