//! CLI-specific functionality for the testbed binary
//!
//! Argument parsing lives here; configuration discovery is shared with the
//! library in [`crate::config`].

pub mod args;

pub use crate::config::ConfigDiscovery;
pub use args::{Args, ExecutionMode, NetworkConfig, RunConfig};
