// SPDX-License-Identifier: Apache-2.0

//! Firewall Configuration
//!
//! Stored as JSON. Every field has a default, so a partial or missing file is
//! valid.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::{Mode, Strategy};
use crate::error::{FirewallError, FirewallResult};

pub const CONFIG_FILE: &str = "firewall.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallConfig {
    /// Operating mode, reloadable
    #[serde(default)]
    pub mode: Mode,
    /// Rule lists consulted, reloadable
    #[serde(default)]
    pub engine: Strategy,
    /// Maximum number of rules, fixed once the firewall is open
    #[serde(default = "default_max_rules")]
    pub max_rules: usize,
    /// Persist rules and counters across restarts
    #[serde(default = "default_true")]
    pub save: bool,
    /// Directory holding the text, snapshot and counters files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_max_rules() -> usize {
    5000
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("qoredb")
        .join("firewall")
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            engine: Strategy::default(),
            max_rules: default_max_rules(),
            save: true,
            data_dir: default_data_dir(),
        }
    }
}

impl FirewallConfig {
    /// Default configuration rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> FirewallResult<()> {
        if self.max_rules == 0 {
            return Err(FirewallError::invalid_config("max_rules must be at least 1"));
        }
        Ok(())
    }

    /// Loads `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> FirewallResult<Self> {
        if !path.exists() {
            debug!("No firewall config file found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| FirewallError::invalid_config(format!("Failed to read config: {e}")))?;
        let config: FirewallConfig = serde_json::from_str(&content)
            .map_err(|e| FirewallError::invalid_config(format!("Failed to parse config: {e}")))?;
        config.validate()?;

        info!("Loaded firewall configuration from {:?}", path);
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> FirewallResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| FirewallError::invalid_config(format!("Failed to serialize config: {e}")))?;
        fs::write(path, content)
            .map_err(|e| FirewallError::persistence(format!("Failed to write config: {e}")))?;

        debug!("Saved firewall configuration to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, r#"{ "mode": "enforcing", "engine": "blacklist" }"#).unwrap();

        let config = FirewallConfig::load(&path).unwrap();
        assert_eq!(config.mode, Mode::Enforcing);
        assert_eq!(config.engine, Strategy::Blacklist);
        assert_eq!(config.max_rules, 5000);
        assert!(config.save);
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut config = FirewallConfig::with_data_dir(dir.path());
        config.max_rules = 100;
        config.save(&path).unwrap();
        assert_eq!(FirewallConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, r#"{ "max_rules": 0 }"#).unwrap();
        assert!(matches!(
            FirewallConfig::load(&path),
            Err(FirewallError::InvalidConfig { .. })
        ));

        fs::write(&path, r#"{ "mode": "paranoid" }"#).unwrap();
        assert!(FirewallConfig::load(&path).is_err());
        assert!(FirewallConfig::load(&dir.path().join("missing.json")).is_ok());
    }
}
