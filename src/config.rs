//! Configuration discovery and loading
//!
//! Settings are resolved from the first file found in this hierarchy:
//! 1. Current directory: ./testbed.toml or ./.testbed/config.toml
//! 2. User config: ~/.testbed/config.toml
//! 3. System config: /etc/testbed/config.toml
//! 4. Built-in defaults
//!
//! `TESTBED_STARTUP_TIMEOUT` and `TESTBED_STOP_TIMEOUT` override the
//! corresponding timeouts after the file is loaded.

use crate::container::{ContainerError, Result};
use crate::env;
use serde::{Deserialize, Serialize};
use std::env as std_env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Process-wide testbed settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestbedConfig {
    /// Default time a container may take to become ready
    pub startup_timeout_secs: u64,
    /// Grace period given to a container on stop
    pub stop_timeout_secs: u64,
    /// Pull images that are not present locally
    pub auto_pull: bool,
    /// Prefix for generated container and network names
    pub name_prefix: String,
    /// Roots searched when resolving bundled resources
    pub resource_dirs: Vec<PathBuf>,
    /// Engine address; falls back to `DOCKER_HOST` and local defaults
    pub docker_host: Option<String>,
}

impl Default for TestbedConfig {
    fn default() -> Self {
        Self {
            startup_timeout_secs: env::DEFAULT_STARTUP_TIMEOUT.as_secs(),
            stop_timeout_secs: env::DEFAULT_STOP_TIMEOUT_SECS,
            auto_pull: true,
            name_prefix: env::DEFAULT_NAME_PREFIX.to_string(),
            resource_dirs: vec![PathBuf::from(env::DEFAULT_RESOURCE_DIR)],
            docker_host: None,
        }
    }
}

impl TestbedConfig {
    /// Startup timeout as a [`Duration`].
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    /// Stop timeout as a [`Duration`].
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ContainerError::ConfigError(format!("Invalid configuration: {}", e)))
    }

    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Serialize to a TOML string.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ContainerError::ConfigError(format!("Cannot serialize configuration: {}", e)))
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Apply `TESTBED_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(secs) = read_secs(env::vars::STARTUP_TIMEOUT) {
            self.startup_timeout_secs = secs;
        }
        if let Some(secs) = read_secs(env::vars::STOP_TIMEOUT) {
            self.stop_timeout_secs = secs;
        }
        self
    }
}

fn read_secs(var: &str) -> Option<u64> {
    let value = std_env::var(var).ok()?;
    match value.trim().parse() {
        Ok(secs) => Some(secs),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a number of seconds", var, value);
            None
        }
    }
}

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Discover and load configuration using the hierarchy
    pub fn discover_config() -> Result<TestbedConfig> {
        let config = if let Some(config_path) = Self::find_config_file() {
            info!("Loading configuration from: {:?}", config_path);
            TestbedConfig::from_toml_file(config_path)?
        } else {
            debug!("No configuration file found, using defaults");
            TestbedConfig::default()
        };

        Ok(config.with_env_overrides())
    }

    /// Find configuration file using discovery hierarchy
    pub fn find_config_file() -> Option<PathBuf> {
        for candidate in Self::get_config_candidates() {
            debug!("Checking for config file: {:?}", candidate);
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        None
    }

    /// Get list of configuration file candidates in priority order
    fn get_config_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Ok(current_dir) = std_env::current_dir() {
            candidates.push(current_dir.join(env::ROOT_CONFIG_FILE_NAME));
            candidates.push(env::local_config_file_path(&current_dir));
        }

        if let Some(home_dir) = Self::get_home_dir() {
            candidates.push(env::user_config_file_path(&home_dir));
        }

        #[cfg(unix)]
        candidates.push(PathBuf::from("/etc/testbed/config.toml"));

        #[cfg(windows)]
        if let Ok(program_data) = std_env::var("PROGRAMDATA") {
            candidates.push(PathBuf::from(program_data).join("testbed").join("config.toml"));
        }

        candidates
    }

    fn get_home_dir() -> Option<PathBuf> {
        std_env::var_os("HOME")
            .or_else(|| std_env::var_os("USERPROFILE"))
            .map(PathBuf::from)
    }

    /// Print where configuration would be loaded from.
    pub fn show_discovery_info() {
        println!("Configuration discovery order:");
        for candidate in Self::get_config_candidates() {
            let marker = if candidate.is_file() { "found" } else { "missing" };
            println!("  [{}] {}", marker, candidate.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TestbedConfig::default();
        assert_eq!(config.startup_timeout(), Duration::from_secs(60));
        assert_eq!(config.stop_timeout(), Duration::from_secs(10));
        assert!(config.auto_pull);
        assert_eq!(config.name_prefix, "testbed");
        assert_eq!(config.resource_dirs, vec![PathBuf::from("tests/resources")]);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = TestbedConfig::from_toml_str("startup_timeout_secs = 5\nauto_pull = false\n")
            .unwrap();
        assert_eq!(config.startup_timeout_secs, 5);
        assert!(!config.auto_pull);
        assert_eq!(config.name_prefix, "testbed");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let result = TestbedConfig::from_toml_str("startup_timeout_secs = \"soon\"");
        assert!(matches!(result, Err(ContainerError::ConfigError(_))));
    }
}
