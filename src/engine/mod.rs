//! Container engine interface.
//!
//! [`Engine`] is the narrow set of primitives testbed needs from a container
//! engine: image resolution, container create/start/stop/remove, file copy,
//! exec, port and health queries, log streaming, and network creation. The
//! lifecycle code in [`crate::container`] only ever talks to this trait.
//!
//! - [`docker`]: Docker/Podman implementation over bollard
//! - `memory`: in-process engine used by the unit tests

#[cfg(feature = "docker")]
pub mod docker;
#[cfg(feature = "docker")]
mod image;
#[cfg(test)]
pub(crate) mod memory;

#[cfg(feature = "docker")]
pub use docker::{DockerEngine, RuntimeType};

use crate::container::{BindMode, Result};
use crate::env;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

/// Where a container image comes from.
///
/// Deserializes from either a plain string (`image = "redis:7"`) or a build
/// table (`image = { context = "docker/app" }`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageSource {
    /// Image reference pulled from a registry when missing
    Image(String),
    /// Image built from a local context directory
    Build {
        /// Build context directory
        context: PathBuf,
        /// Dockerfile path, relative to the context (default `Dockerfile`)
        #[serde(default)]
        dockerfile: Option<PathBuf>,
        /// Tag for the built image (generated when absent)
        #[serde(default)]
        tag: Option<String>,
    },
}

impl ImageSource {
    /// Image reference source.
    pub fn image<S: Into<String>>(reference: S) -> Self {
        ImageSource::Image(reference.into())
    }

    /// Build-context source with the default Dockerfile.
    pub fn build<P: Into<PathBuf>>(context: P) -> Self {
        ImageSource::Build {
            context: context.into(),
            dockerfile: None,
            tag: None,
        }
    }
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageSource::Image(reference) => write!(f, "{}", reference),
            ImageSource::Build { context, tag, .. } => match tag {
                Some(tag) => write!(f, "{} (built from {})", tag, context.display()),
                None => write!(f, "build of {}", context.display()),
            },
        }
    }
}

/// A host path bound into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub mode: BindMode,
}

impl BindMount {
    /// Render as an engine bind string (`host:container:ro`).
    pub fn to_bind_string(&self) -> String {
        format!(
            "{}:{}:{}",
            self.host_path.display(),
            self.container_path,
            self.mode.as_engine_str()
        )
    }
}

/// A single file to place inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCopy {
    pub contents: Vec<u8>,
    pub container_path: String,
    pub mode: u32,
}

/// Everything the engine needs to create a container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    /// Resolved image reference (filled in when the container is created)
    pub image: String,
    /// Container name; the engine generates one when absent
    pub name: Option<String>,
    pub exposed_ports: Vec<u16>,
    pub env: BTreeMap<String, String>,
    pub cmd: Option<Vec<String>>,
    /// Network name to attach to
    pub network: Option<String>,
    pub network_aliases: Vec<String>,
    pub binds: Vec<BindMount>,
    pub labels: BTreeMap<String, String>,
}

/// Engine-reported health of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Healthcheck passing
    Healthy,
    /// Healthcheck failing
    Unhealthy,
    /// Healthcheck defined but not yet decided
    Starting,
    /// Image defines no healthcheck
    None,
}

/// Which output stream a log chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    StdOut,
    StdErr,
}

/// A piece of container output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogChunk {
    pub source: LogSource,
    pub text: String,
}

/// Followed container output, from the first line the container wrote.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<LogChunk>> + Send>>;

/// Output from command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Exit code (None if not available)
    pub exit_code: Option<i64>,
}

impl ExecOutput {
    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Get combined output (stdout + stderr).
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Options for a new network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkOptions {
    /// Enable dual-stack (IPv6) addressing
    pub enable_ipv6: Option<bool>,
    /// Network driver; the engine default applies when absent
    pub driver: Option<String>,
}

/// A network as reported by the engine after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub id: String,
    pub name: String,
    pub driver: String,
    pub enable_ipv6: bool,
}

/// Container engine primitives.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Host on which mapped ports are reachable.
    fn host(&self) -> String;

    /// Default time a container may take to become ready.
    fn startup_timeout(&self) -> Duration {
        env::DEFAULT_STARTUP_TIMEOUT
    }

    /// Prefix for generated container and network names.
    fn name_prefix(&self) -> String {
        env::DEFAULT_NAME_PREFIX.to_string()
    }

    /// Make the image available locally and return its reference.
    async fn ensure_image(&self, source: &ImageSource) -> Result<String>;

    /// Create (but do not start) a container; returns its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Place a file inside a created or running container.
    async fn copy_to_container(&self, container_id: &str, file: &FileCopy) -> Result<()>;

    async fn start_container(&self, container_id: &str) -> Result<()>;

    /// Stop a running container; fails with `NotFound` if it no longer exists.
    async fn stop_container(&self, container_id: &str) -> Result<()>;

    async fn remove_container(&self, container_id: &str) -> Result<()>;

    /// Host port assigned to an exposed container port.
    async fn mapped_port(&self, container_id: &str, port: u16) -> Result<u16>;

    async fn health_status(&self, container_id: &str) -> Result<HealthStatus>;

    /// Follow container output from the beginning.
    fn log_stream(&self, container_id: &str) -> LogStream;

    async fn exec(&self, container_id: &str, cmd: &[String]) -> Result<ExecOutput>;

    /// Create a network named `name`; returns the engine's view of it.
    async fn create_network(&self, name: &str, options: &NetworkOptions) -> Result<NetworkInfo>;

    async fn remove_network(&self, network_id: &str) -> Result<()>;
}
