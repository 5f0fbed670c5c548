//! Environment constants and path utilities for testbed.
//!
//! This module centralizes the file names, environment variable names, labels
//! and defaults used throughout the crate.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hidden per-project directory name
pub const TESTBED_DIR_NAME: &str = ".testbed";

/// Configuration file name inside [`TESTBED_DIR_NAME`]
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name at a project root
pub const ROOT_CONFIG_FILE_NAME: &str = "testbed.toml";

/// Default resource root, relative to the working directory
pub const DEFAULT_RESOURCE_DIR: &str = "tests/resources";

/// Prefix for generated container and network names
pub const DEFAULT_NAME_PREFIX: &str = "testbed";

/// Host reported when the engine is reached through a local socket
pub const DEFAULT_HOST: &str = "localhost";

/// Default time a container may take to become ready
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Default grace period given to a container on stop, in seconds
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;

/// Delay between readiness probes
pub const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Environment variables read by testbed
pub mod vars {
    /// Remote engine address, e.g. `tcp://10.0.0.5:2375`
    pub const DOCKER_HOST: &str = "DOCKER_HOST";

    /// Overrides the advertised host for mapped ports
    pub const HOST_OVERRIDE: &str = "TESTBED_HOST_OVERRIDE";

    /// Overrides `startup_timeout_secs`
    pub const STARTUP_TIMEOUT: &str = "TESTBED_STARTUP_TIMEOUT";

    /// Overrides `stop_timeout_secs`
    pub const STOP_TIMEOUT: &str = "TESTBED_STOP_TIMEOUT";

    /// Set to `1` or `true` to skip tests that need a live engine
    pub const SKIP_CONTAINER_TESTS: &str = "SKIP_CONTAINER_TESTS";
}

/// Labels attached to every engine object created by testbed
pub mod labels {
    /// Marks containers and networks as managed by testbed
    pub const MANAGED: &str = "org.testbed.managed";

    /// Identifies the process session that created the object
    pub const SESSION: &str = "org.testbed.session";
}

/// Build the `.testbed` directory path from a project root
pub fn testbed_dir_path(root: &Path) -> PathBuf {
    root.join(TESTBED_DIR_NAME)
}

/// Build the local configuration file path (`<root>/.testbed/config.toml`)
pub fn local_config_file_path(root: &Path) -> PathBuf {
    testbed_dir_path(root).join(CONFIG_FILE_NAME)
}

/// Build the user configuration file path (`~/.testbed/config.toml`)
pub fn user_config_file_path(home: &Path) -> PathBuf {
    testbed_dir_path(home).join(CONFIG_FILE_NAME)
}

/// Derive the host on which mapped ports are reachable from a `DOCKER_HOST` value.
///
/// `tcp://`, `http://` and `https://` addresses yield their host part; local
/// sockets (`unix://`, `npipe://`) and unparsable values yield [`DEFAULT_HOST`].
pub fn host_from_docker_host(docker_host: &str) -> String {
    match url::Url::parse(docker_host) {
        Ok(url) if matches!(url.scheme(), "tcp" | "http" | "https") => url
            .host_str()
            .filter(|h| !h.is_empty())
            .map(|h| h.trim_matches(|c| c == '[' || c == ']').to_string())
            .unwrap_or_else(|| DEFAULT_HOST.to_string()),
        _ => DEFAULT_HOST.to_string(),
    }
}

/// Resolve the host for mapped ports from the process environment.
pub fn resolve_host() -> String {
    if let Ok(host) = std::env::var(vars::HOST_OVERRIDE) {
        if !host.trim().is_empty() {
            return host.trim().to_string();
        }
    }
    std::env::var(vars::DOCKER_HOST)
        .map(|value| host_from_docker_host(&value))
        .unwrap_or_else(|_| DEFAULT_HOST.to_string())
}
