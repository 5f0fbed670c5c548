//! # testbed
//!
//! Disposable, engine-backed container fixtures for tests.
//!
//! Callers declare what a container should look like (image, exposed ports,
//! environment, command, mounts, readiness condition, log capture, network
//! membership); testbed translates the declaration into calls against a
//! Docker or Podman engine, tracks what the engine reports back, and keeps a
//! uniform configuration record throughout the container's life.
//!
//! ## Architecture Overview
//!
//! - **[`container`]**: configuration record, handle, mounts and the
//!   start/stop lifecycle
//! - **[`strategy`]**: open, tag-dispatched readiness and log strategies
//! - **[`engine`]**: the narrow engine interface and its Docker/Podman implementation
//! - **[`fixture`]**: fixture declarations loaded from TOML
//! - **[`config`]**: settings discovery and loading
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use testbed::container::{self, ContainerHandle, Declared};
//! use testbed::engine::{DockerEngine, ImageSource};
//! use testbed::strategy::WaitSpec;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = Arc::new(DockerEngine::new().await?);
//!     let handle = ContainerHandle::new(engine, ImageSource::image("nginx:alpine"));
//!
//!     let nginx = container::init(
//!         handle,
//!         Declared::new().exposed_ports([80]).wait(WaitSpec::http("/")),
//!     )?
//!     .start()
//!     .await?;
//!
//!     println!("nginx at http://{}:{:?}", nginx.host(), nginx.host_port(80));
//!     nginx.stop().await?.remove().await?;
//!     Ok(())
//! }
//! ```

/// Container configuration and lifecycle.
pub mod container;

/// Readiness and log strategy resolution.
pub mod strategy;

/// Container engine interface and implementations.
pub mod engine;

/// Fixture declarations.
pub mod fixture;

/// Settings discovery and loading.
pub mod config;

/// Environment constants and path utilities.
///
/// Centralizes file names, environment variable names and engine labels.
pub mod env;

// CLI module for the testbed binary
pub mod cli;

pub use config::{ConfigDiscovery, TestbedConfig};
pub use container::{
    Container, ContainerError, ContainerHandle, Declared, Network, StartError, init,
};
pub use engine::{Engine, ImageSource, NetworkOptions};
pub use fixture::FixtureDefinition;
pub use strategy::{LogSpec, Resolvers, WaitSpec};
