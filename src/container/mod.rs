//! Container fixtures: configuration record, handle and lifecycle.
//!
//! A fixture moves through three typed states:
//!
//! - [`init`] turns a [`ContainerHandle`] and a [`Declared`] configuration into
//!   a `Container<Unstarted>`, configuring the handle and resolving the
//!   readiness strategy
//! - mount and copy operators extend the unstarted record
//! - [`Container::start`] produces a `Container<Running>` carrying the
//!   container identity, the assigned port mapping and the optional log accessor
//! - [`Container::stop`] drops those runtime facts again
//! - a failed start returns a [`StartError`] holding a `Container<Failed>`,
//!   which can still be stopped or removed
//!
//! ## Components
//!
//! - [`record`]: the configuration record and builder
//! - [`handle`]: the exclusively owned engine-native handle
//! - [`mount`]: bind modes, resource mappings, binds and file copies
//! - [`readiness`]: the runner that blocks `start` until a wait condition holds
//! - [`lifecycle`]: start/stop transitions, exec and removal
//! - [`network`]: network creation
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use testbed::container::{self, ContainerHandle, Declared};
//! use testbed::engine::{DockerEngine, ImageSource};
//! use testbed::strategy::{LogSpec, WaitSpec};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = Arc::new(DockerEngine::new().await?);
//!     let handle = ContainerHandle::new(engine, ImageSource::image("postgres:16"));
//!
//!     let declared = Declared::new()
//!         .exposed_ports([5432])
//!         .env("POSTGRES_PASSWORD", "pw")
//!         .wait(WaitSpec::log("accept connections"))
//!         .log(LogSpec::string());
//!
//!     let postgres = container::init(handle, declared)?.start().await?;
//!     println!("postgres on port {:?}", postgres.host_port(5432));
//!
//!     postgres.stop().await?.remove().await?;
//!     Ok(())
//! }
//! ```

pub mod handle;
pub mod lifecycle;
pub mod mount;
pub mod network;
pub mod readiness;
pub mod record;

pub use handle::{ContainerHandle, LogConsumer};
pub use mount::{
    BindMode, CopySource, CopyToContainer, Directive, FileSystemBind, ResourceMapping, Resources,
};
pub use network::{Network, create_network};
pub use readiness::{ProbeTarget, ReadinessProbe, WaitCondition};
pub use record::{
    Container, Declared, Derived, Failed, Running, Runtime, Stopped, Unstarted, init, init_with,
};

use std::time::Duration;

/// Container runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// Docker/Podman API error
    #[cfg(feature = "docker")]
    #[error("Container API error: {0}")]
    ApiError(#[from] bollard::errors::Error),

    /// Container, network or resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid configuration, detected before the engine is touched
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Readiness condition did not hold in time; the container is left running
    #[error("Container {container_id} was not ready within {timeout:?}")]
    ReadinessTimeout {
        container_id: String,
        timeout: Duration,
    },

    /// Container execution error
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// Network error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// General error
    #[error("Container error: {0}")]
    Other(String),
}

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;

/// A start that failed, carrying the record back so the container it may
/// have created can still be stopped and removed.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct StartError {
    pub source: ContainerError,
    pub container: Box<Container<Failed>>,
}

impl StartError {
    /// Id of the container created before the failure, if any.
    pub fn container_id(&self) -> Option<&str> {
        self.container.container_id()
    }
}

impl From<StartError> for ContainerError {
    fn from(e: StartError) -> Self {
        e.source
    }
}

/// Result of [`Container::start`].
pub type StartResult<T> = std::result::Result<T, StartError>;
