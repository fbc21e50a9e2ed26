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
//! Handles loading application settings.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::etc::SessionConfig;

const APP_DIR_NAME: &str = "etc-dash";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for the payment database.
    #[serde(skip)]
    pub data_dir: PathBuf,

    /// Bluetooth settings.
    pub bluetooth: BluetoothConfig,

    /// ETC unit protocol settings.
    pub device: DeviceConfig,

    /// Storage settings.
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Adapter to use, e.g. "hci0". The default adapter when unset.
    pub adapter: Option<String>,

    /// Talk to a simulated unit instead of the radio.
    pub simulate: bool,

    /// Pause between reconnection attempts in milliseconds.
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// How long to wait for the unit to answer a handshake.
    pub handshake_timeout_ms: u64,

    /// Seconds after a payment notification in which the fetched record is
    /// reported as the new payment.
    pub payment_alert_window_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 1000,
            payment_alert_window_secs: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file name inside the data directory.
    pub database_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_file: "payments.db".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR_NAME);

        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::parse(&content)?
        } else {
            let config = Self::default();
            let content = toml::to_string_pretty(&config)?;
            std::fs::write(&config_path, content)?;
            config
        };

        // Set data directory
        config.data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR_NAME);
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(config)
    }

    /// Parse configuration text. Missing keys take their defaults.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.bluetooth.reconnect_delay_ms)
    }

    /// Settings of each session with the unit.
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            handshake_timeout: Duration::from_millis(self.device.handshake_timeout_ms),
            payment_alert_window: Duration::from_secs(self.device.payment_alert_window_secs),
        }
    }
}
