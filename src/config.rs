// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading and saving engine settings.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::hfp::{AgFeatures, HfFeatures};

/// Default SLC retry timeout in milliseconds.
pub const RFCOMM_SLC_TIMEOUT_MS: u64 = 1000;

/// Default number of SLC retries before the connection is dropped.
pub const RFCOMM_SLC_RETRIES: u32 = 10;

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Hands-Free Profile settings.
    pub hfp: HfpConfig,

    /// RFCOMM session settings.
    pub rfcomm: RfcommConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HfpConfig {
    /// Features advertised with `AT+BRSF=` when running as HF.
    pub features_hf: u32,

    /// Features advertised with `+BRSF:` when running as AG.
    pub features_ag: u32,

    /// Offer the mSBC wideband codec.
    pub msbc: bool,

    /// Product name reported in the `+XAPL` reply.
    pub xapl_product_name: String,
}

impl Default for HfpConfig {
    fn default() -> Self {
        Self::with_msbc(true)
    }
}

impl HfpConfig {
    /// Default feature set, with or without wideband speech.
    pub fn with_msbc(msbc: bool) -> Self {
        let mut hf = HfFeatures::CLI | HfFeatures::VOLUME | HfFeatures::ECS | HfFeatures::ECC;
        let mut ag = AgFeatures::REJECT | AgFeatures::ECS | AgFeatures::ECC | AgFeatures::EERC;
        if msbc {
            hf |= HfFeatures::CODEC;
            ag |= AgFeatures::CODEC;
        }
        Self {
            features_hf: hf.bits(),
            features_ag: ag.bits(),
            msbc,
            xapl_product_name: "hfp-rfcomm".to_string(),
        }
    }

    pub fn hf_features(&self) -> HfFeatures {
        HfFeatures::from_bits_truncate(self.features_hf)
    }

    pub fn ag_features(&self) -> AgFeatures {
        AgFeatures::from_bits_truncate(self.features_ag)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RfcommConfig {
    /// Time to wait for a reply during the SLC procedure, in milliseconds.
    pub slc_timeout_ms: u64,

    /// Number of times a SLC step is retried before giving up.
    pub slc_retries: u32,
}

impl Default for RfcommConfig {
    fn default() -> Self {
        Self {
            slc_timeout_ms: RFCOMM_SLC_TIMEOUT_MS,
            slc_retries: RFCOMM_SLC_RETRIES,
        }
    }
}

impl RfcommConfig {
    pub fn slc_timeout(&self) -> Duration {
        Duration::from_millis(self.slc_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hfp: HfpConfig::default(),
            rfcomm: RfcommConfig::default(),
        }
    }
}

impl Config {
    /// Default location of the configuration file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hfp-rfcomm")
            .join("config.toml")
    }

    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        let config_path = Self::default_path();
        if let Some(config_dir) = config_path.parent() {
            std::fs::create_dir_all(config_dir)?;
        }

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Self::default();
            config.save_to(&config_path)?;
            info!("Created default configuration: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from the given file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the given file.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
