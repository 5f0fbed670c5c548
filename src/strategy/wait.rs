//! Built-in readiness strategies.

use super::decode_options;
use crate::container::{ContainerError, ContainerHandle, Result, WaitCondition};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

pub const HTTP: &str = "http";
pub const HEALTH: &str = "health";
pub const LOG: &str = "log";

/// Configures a handle's wait condition from loose options.
pub trait ReadinessStrategy: Send + Sync {
    /// Configure `handle` and describe what was configured.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::ConfigError`] for missing or invalid options.
    fn configure(
        &self,
        options: &Map<String, Value>,
        handle: &mut ContainerHandle,
    ) -> Result<ReadinessDescriptor>;
}

/// Record of the readiness condition a strategy configured.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadinessDescriptor {
    /// Nothing configured; start does not wait
    #[default]
    Empty,
    Http(HttpWaitOptions),
    Health { healthcheck: bool },
    Log { pattern: String },
    Custom { strategy: String, detail: Value },
}

impl ReadinessDescriptor {
    pub fn is_empty(&self) -> bool {
        matches!(self, ReadinessDescriptor::Empty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

fn default_status_codes() -> Vec<u16> {
    vec![200]
}

/// Options of the `http` strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpWaitOptions {
    pub path: String,
    /// Container port to probe; resolved to the lowest exposed port when omitted
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_status_codes")]
    pub status_codes: Vec<u16>,
    #[serde(default)]
    pub tls: bool,
    /// Accept self-signed certificates when `tls` is set
    #[serde(default)]
    pub allow_insecure: bool,
    #[serde(default)]
    pub read_timeout_secs: Option<u64>,
    #[serde(default)]
    pub basic_auth: Option<BasicAuth>,
    #[serde(default)]
    pub startup_timeout_secs: Option<u64>,
}

impl Default for HttpWaitOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            port: None,
            status_codes: default_status_codes(),
            tls: false,
            allow_insecure: false,
            read_timeout_secs: None,
            basic_auth: None,
            startup_timeout_secs: None,
        }
    }
}

/// Probe an HTTP endpoint until it answers with an accepted status.
pub struct HttpStrategy;

impl ReadinessStrategy for HttpStrategy {
    fn configure(
        &self,
        options: &Map<String, Value>,
        handle: &mut ContainerHandle,
    ) -> Result<ReadinessDescriptor> {
        let mut options: HttpWaitOptions = decode_options(HTTP, options)?;

        if options.path.is_empty() {
            return Err(ContainerError::ConfigError(
                "HTTP readiness requires a non-empty path".to_string(),
            ));
        }
        if options.status_codes.is_empty() {
            return Err(ContainerError::ConfigError(
                "HTTP readiness requires at least one accepted status code".to_string(),
            ));
        }
        let port = match options.port {
            Some(port) if !handle.exposed_ports().contains(&port) => {
                return Err(ContainerError::ConfigError(format!(
                    "HTTP readiness port {} is not an exposed port",
                    port
                )));
            }
            Some(port) => port,
            None => handle.exposed_ports().first().copied().ok_or_else(|| {
                ContainerError::ConfigError(
                    "HTTP readiness needs a port or at least one exposed port".to_string(),
                )
            })?,
        };
        options.port = Some(port);

        apply_startup_timeout(handle, options.startup_timeout_secs);
        handle.set_wait_condition(WaitCondition::Http(options.clone()));
        Ok(ReadinessDescriptor::Http(options))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct HealthWaitOptions {
    #[serde(default)]
    startup_timeout_secs: Option<u64>,
}

/// Delegate readiness to the image's healthcheck.
pub struct HealthStrategy;

impl ReadinessStrategy for HealthStrategy {
    fn configure(
        &self,
        options: &Map<String, Value>,
        handle: &mut ContainerHandle,
    ) -> Result<ReadinessDescriptor> {
        let options: HealthWaitOptions = decode_options(HEALTH, options)?;

        apply_startup_timeout(handle, options.startup_timeout_secs);
        handle.set_wait_condition(WaitCondition::Healthcheck);
        Ok(ReadinessDescriptor::Health { healthcheck: true })
    }
}

fn default_times() -> usize {
    1
}

/// Options of the `log` strategy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogWaitOptions {
    pub message: String,
    #[serde(default = "default_times")]
    pub times: usize,
    #[serde(default)]
    pub startup_timeout_secs: Option<u64>,
}

/// Pattern matching one line of output containing `message`.
pub fn log_pattern(message: &str) -> String {
    format!(".*{}.*\n", message)
}

/// Wait for output lines containing a message.
pub struct LogMessageStrategy;

impl ReadinessStrategy for LogMessageStrategy {
    fn configure(
        &self,
        options: &Map<String, Value>,
        handle: &mut ContainerHandle,
    ) -> Result<ReadinessDescriptor> {
        let options: LogWaitOptions = decode_options(LOG, options)?;

        if options.message.is_empty() {
            return Err(ContainerError::ConfigError(
                "Log readiness requires a non-empty message".to_string(),
            ));
        }
        if options.times == 0 {
            return Err(ContainerError::ConfigError(
                "Log readiness requires times >= 1".to_string(),
            ));
        }

        let matcher = Regex::new(&log_pattern(&regex::escape(&options.message)))
            .map_err(|e| ContainerError::ConfigError(format!("Invalid log pattern: {}", e)))?;

        apply_startup_timeout(handle, options.startup_timeout_secs);
        handle.set_wait_condition(WaitCondition::LogMessage {
            pattern: matcher,
            times: options.times,
        });
        Ok(ReadinessDescriptor::Log {
            pattern: log_pattern(&options.message),
        })
    }
}

fn apply_startup_timeout(handle: &mut ContainerHandle, secs: Option<u64>) {
    if let Some(secs) = secs {
        handle.set_startup_timeout(Duration::from_secs(secs));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ImageSource;
    use crate::engine::memory::MemoryEngine;
    use crate::strategy::{Resolvers, WaitSpec};
    use std::sync::Arc;

    fn handle(ports: &[u16]) -> ContainerHandle {
        let mut handle =
            ContainerHandle::new(Arc::new(MemoryEngine::new()), ImageSource::image("alpine:3"));
        handle.set_exposed_ports(ports);
        handle
    }

    #[test]
    fn test_log_descriptor_holds_literal_pattern() {
        let mut handle = handle(&[]);
        let descriptor = Resolvers::with_builtins()
            .resolve_wait(&WaitSpec::log("accept connections"), &mut handle)
            .unwrap();

        assert_eq!(
            descriptor,
            ReadinessDescriptor::Log {
                pattern: ".*accept connections.*\n".to_string()
            }
        );
        match handle.wait_condition() {
            WaitCondition::LogMessage { pattern, times } => {
                assert_eq!(*times, 1);
                assert!(pattern.is_match("2024 ready to accept connections on 5432\n"));
                assert!(!pattern.is_match("accept connections"));
            }
            other => panic!("unexpected condition {:?}", other),
        }
    }

    #[test]
    fn test_log_message_is_matched_literally() {
        let mut handle = handle(&[]);
        Resolvers::with_builtins()
            .resolve_wait(&WaitSpec::log("listening (v1.2)"), &mut handle)
            .unwrap();

        match handle.wait_condition() {
            WaitCondition::LogMessage { pattern, .. } => {
                assert!(pattern.is_match("server listening (v1.2)\n"));
                assert!(!pattern.is_match("server listening v1x2\n"));
            }
            other => panic!("unexpected condition {:?}", other),
        }
    }

    #[test]
    fn test_http_descriptor_echoes_resolved_options() {
        let mut handle = handle(&[8080]);
        let spec = WaitSpec::http("/health")
            .with_option("port", 8080)
            .with_option("status_codes", vec![200, 204])
            .with_option("read_timeout_secs", 2)
            .with_option("startup_timeout_secs", 5)
            .with_option(
                "basic_auth",
                serde_json::json!({ "username": "user", "password": "secret" }),
            );

        let descriptor = Resolvers::with_builtins().resolve_wait(&spec, &mut handle).unwrap();

        let expected = HttpWaitOptions {
            path: "/health".to_string(),
            port: Some(8080),
            status_codes: vec![200, 204],
            read_timeout_secs: Some(2),
            basic_auth: Some(BasicAuth {
                username: "user".to_string(),
                password: "secret".to_string(),
            }),
            startup_timeout_secs: Some(5),
            ..HttpWaitOptions::default()
        };
        assert_eq!(descriptor, ReadinessDescriptor::Http(expected));
        assert_eq!(handle.startup_timeout(), Duration::from_secs(5));
        assert!(matches!(handle.wait_condition(), WaitCondition::Http(_)));
    }

    #[test]
    fn test_http_requires_path() {
        let mut handle = handle(&[8080]);
        let result = Resolvers::with_builtins().resolve_wait(&WaitSpec::custom("http"), &mut handle);

        assert!(matches!(result, Err(ContainerError::ConfigError(_))));
        assert!(matches!(handle.wait_condition(), WaitCondition::None));
    }

    #[test]
    fn test_http_port_defaults_to_lowest_exposed_port() {
        let mut handle = handle(&[9090, 8080]);
        let descriptor = Resolvers::with_builtins()
            .resolve_wait(&WaitSpec::http("/"), &mut handle)
            .unwrap();

        match descriptor {
            ReadinessDescriptor::Http(options) => assert_eq!(options.port, Some(8080)),
            other => panic!("unexpected descriptor {:?}", other),
        }
        match handle.wait_condition() {
            WaitCondition::Http(options) => assert_eq!(options.port, Some(8080)),
            other => panic!("unexpected condition {:?}", other),
        }
    }

    #[test]
    fn test_http_without_any_port_is_rejected() {
        let mut handle = handle(&[]);
        let result = Resolvers::with_builtins().resolve_wait(&WaitSpec::http("/"), &mut handle);

        assert!(matches!(result, Err(ContainerError::ConfigError(_))));
        assert!(matches!(handle.wait_condition(), WaitCondition::None));
    }

    #[test]
    fn test_http_port_must_be_exposed() {
        let mut handle = handle(&[8080]);
        let spec = WaitSpec::http("/").with_option("port", 9090);
        let result = Resolvers::with_builtins().resolve_wait(&spec, &mut handle);

        assert!(matches!(result, Err(ContainerError::ConfigError(_))));
    }

    #[test]
    fn test_health_descriptor() {
        let mut handle = handle(&[]);
        let descriptor = Resolvers::with_builtins()
            .resolve_wait(&WaitSpec::health(), &mut handle)
            .unwrap();

        assert_eq!(descriptor, ReadinessDescriptor::Health { healthcheck: true });
        assert!(matches!(handle.wait_condition(), WaitCondition::Healthcheck));
    }

    #[test]
    fn test_health_rejects_unknown_options() {
        let mut handle = handle(&[]);
        let spec = WaitSpec::health().with_option("interval", 3);
        let result = Resolvers::with_builtins().resolve_wait(&spec, &mut handle);

        assert!(matches!(result, Err(ContainerError::ConfigError(_))));
    }
}
