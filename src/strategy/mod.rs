//! Open, tag-dispatched readiness and log strategies.
//!
//! A [`WaitSpec`] or [`LogSpec`] names a strategy by tag and carries its
//! options as loose key/value pairs. [`Resolvers`] looks the tag up in a
//! [`StrategyRegistry`] and lets the strategy configure the container handle.
//! New tags can be registered at any time, including on the process-wide
//! [`Resolvers::global`] instance; an unknown tag resolves to "do nothing".
//!
//! ```rust
//! use testbed::strategy::{Resolvers, WaitSpec};
//!
//! let resolvers = Resolvers::with_builtins();
//! assert!(resolvers.readiness().contains("http"));
//!
//! let spec = WaitSpec::http("/health").with_option("port", 8080);
//! assert_eq!(spec.strategy, "http");
//! ```

pub mod logs;
pub mod wait;

pub use logs::{LogAccessor, LogStrategy, StringLogConsumer, StringLogStrategy};
pub use wait::{
    BasicAuth, HealthStrategy, HttpStrategy, HttpWaitOptions, LogMessageStrategy, LogWaitOptions,
    ReadinessDescriptor, ReadinessStrategy,
};

use crate::container::{ContainerError, ContainerHandle, Result};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Tag meaning "no strategy".
pub const NONE: &str = "none";

fn none_tag() -> String {
    NONE.to_string()
}

/// Readiness strategy selection: a tag plus strategy-specific options.
///
/// In TOML: `wait = { strategy = "log", message = "ready" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitSpec {
    #[serde(default = "none_tag")]
    pub strategy: String,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl Default for WaitSpec {
    fn default() -> Self {
        WaitSpec::none()
    }
}

impl WaitSpec {
    /// Spec for an arbitrary (possibly third-party) strategy tag.
    pub fn custom<S: Into<String>>(strategy: S) -> Self {
        Self {
            strategy: strategy.into(),
            options: Map::new(),
        }
    }

    pub fn none() -> Self {
        Self::custom(NONE)
    }

    /// Wait for an HTTP endpoint.
    pub fn http<S: Into<String>>(path: S) -> Self {
        Self::custom(wait::HTTP).with_option("path", path.into())
    }

    /// Wait for the engine healthcheck.
    pub fn health() -> Self {
        Self::custom(wait::HEALTH)
    }

    /// Wait for a line of output containing `message`.
    pub fn log<S: Into<String>>(message: S) -> Self {
        Self::custom(wait::LOG).with_option("message", message.into())
    }

    pub fn with_option<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Log strategy selection: a tag plus strategy-specific options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSpec {
    #[serde(default = "none_tag")]
    pub strategy: String,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl Default for LogSpec {
    fn default() -> Self {
        LogSpec::none()
    }
}

impl LogSpec {
    pub fn custom<S: Into<String>>(strategy: S) -> Self {
        Self {
            strategy: strategy.into(),
            options: Map::new(),
        }
    }

    pub fn none() -> Self {
        Self::custom(NONE)
    }

    /// Capture output into an in-memory string.
    pub fn string() -> Self {
        Self::custom(logs::STRING)
    }

    pub fn with_option<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Decode loose strategy options into a typed struct.
///
/// # Errors
///
/// Missing required fields or mistyped values are configuration errors.
pub fn decode_options<T: DeserializeOwned>(strategy: &str, options: &Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(options.clone())).map_err(|e| {
        ContainerError::ConfigError(format!("Invalid options for '{}' strategy: {}", strategy, e))
    })
}

/// Tag → strategy lookup table.
pub struct StrategyRegistry<S: ?Sized> {
    entries: DashMap<String, Arc<S>>,
}

impl<S: ?Sized> Default for StrategyRegistry<S> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<S: ?Sized> StrategyRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a strategy under `tag`, returning any strategy it replaces.
    pub fn register<T: Into<String>>(&self, tag: T, strategy: Arc<S>) -> Option<Arc<S>> {
        self.entries.insert(tag.into(), strategy)
    }

    pub fn get(&self, tag: &str) -> Option<Arc<S>> {
        self.entries.get(tag).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.entries.contains_key(tag)
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        tags.sort();
        tags
    }
}

static GLOBAL: OnceLock<Arc<Resolvers>> = OnceLock::new();

/// Readiness and log strategy registries.
pub struct Resolvers {
    readiness: StrategyRegistry<dyn ReadinessStrategy>,
    logs: StrategyRegistry<dyn LogStrategy>,
}

impl Resolvers {
    /// Registries with no strategies at all.
    pub fn empty() -> Self {
        Self {
            readiness: StrategyRegistry::new(),
            logs: StrategyRegistry::new(),
        }
    }

    /// Registries holding the built-in `http`, `health`, `log` and `string` strategies.
    pub fn with_builtins() -> Self {
        let resolvers = Self::empty();
        resolvers.readiness.register(wait::HTTP, Arc::new(HttpStrategy));
        resolvers.readiness.register(wait::HEALTH, Arc::new(HealthStrategy));
        resolvers.readiness.register(wait::LOG, Arc::new(LogMessageStrategy));
        resolvers.logs.register(logs::STRING, Arc::new(StringLogStrategy));
        resolvers
    }

    /// Process-wide resolvers used by [`crate::container::init`].
    pub fn global() -> Arc<Resolvers> {
        GLOBAL.get_or_init(|| Arc::new(Resolvers::with_builtins())).clone()
    }

    pub fn readiness(&self) -> &StrategyRegistry<dyn ReadinessStrategy> {
        &self.readiness
    }

    pub fn logs(&self) -> &StrategyRegistry<dyn LogStrategy> {
        &self.logs
    }

    /// Configure the handle's wait condition from `spec`.
    ///
    /// `none` and unregistered tags leave the handle untouched and yield
    /// [`ReadinessDescriptor::Empty`].
    pub fn resolve_wait(
        &self,
        spec: &WaitSpec,
        handle: &mut ContainerHandle,
    ) -> Result<ReadinessDescriptor> {
        if spec.strategy == NONE {
            return Ok(ReadinessDescriptor::Empty);
        }

        match self.readiness.get(&spec.strategy) {
            Some(strategy) => strategy.configure(&spec.options, handle),
            None => {
                debug!(strategy = %spec.strategy, "No readiness strategy registered, not waiting");
                Ok(ReadinessDescriptor::Empty)
            }
        }
    }

    /// Check a log spec's options without attaching anything.
    ///
    /// `none` and unregistered tags always pass.
    pub fn validate_logs(&self, spec: &LogSpec) -> Result<()> {
        if spec.strategy == NONE {
            return Ok(());
        }
        match self.logs.get(&spec.strategy) {
            Some(strategy) => strategy.validate(&spec.options),
            None => Ok(()),
        }
    }

    /// Attach log capture to the handle from `spec`.
    ///
    /// `none` and unregistered tags attach nothing and yield no accessor.
    pub fn resolve_logs(
        &self,
        spec: &LogSpec,
        handle: &mut ContainerHandle,
    ) -> Result<Option<LogAccessor>> {
        if spec.strategy == NONE {
            return Ok(None);
        }

        match self.logs.get(&spec.strategy) {
            Some(strategy) => strategy.attach(&spec.options, handle),
            None => {
                debug!(strategy = %spec.strategy, "No log strategy registered, logs unavailable");
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for Resolvers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolvers")
            .field("readiness", &self.readiness.tags())
            .field("logs", &self.logs.tags())
            .finish()
    }
}

impl Default for Resolvers {
    fn default() -> Self {
        Self::with_builtins()
    }
}
