//! The configuration record and its builder.

use super::handle::ContainerHandle;
use super::mount::Directive;
use super::network::Network;
use super::{ContainerError, Result};
use crate::engine::ImageSource;
use crate::strategy::{LogAccessor, LogSpec, ReadinessDescriptor, Resolvers, WaitSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Caller-declared configuration, kept verbatim for inspection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Declared {
    pub exposed_ports: Vec<u16>,
    pub env: BTreeMap<String, String>,
    pub command: Option<Vec<String>>,
    #[serde(skip)]
    pub network: Option<Network>,
    pub network_aliases: Vec<String>,
    pub wait: WaitSpec,
    pub log: LogSpec,
}

impl Declared {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exposed_ports<I: IntoIterator<Item = u16>>(mut self, ports: I) -> Self {
        self.exposed_ports = ports.into_iter().collect();
        self
    }

    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn command<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = Some(args.into_iter().map(Into::into).collect());
        self
    }

    pub fn network(mut self, network: &Network) -> Self {
        self.network = Some(network.clone());
        self
    }

    pub fn network_alias<S: Into<String>>(mut self, alias: S) -> Self {
        self.network_aliases.push(alias.into());
        self
    }

    pub fn wait(mut self, spec: WaitSpec) -> Self {
        self.wait = spec;
        self
    }

    pub fn log(mut self, spec: LogSpec) -> Self {
        self.log = spec;
        self
    }

    fn validate(&self) -> Result<()> {
        if !self.network_aliases.is_empty() && self.network.is_none() {
            return Err(ContainerError::ConfigError(format!(
                "Network aliases {:?} require a network",
                self.network_aliases
            )));
        }
        Ok(())
    }
}

/// Configuration computed by [`init`], as reported back by the handle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Derived {
    /// Sorted, de-duplicated
    pub exposed_ports: Vec<u16>,
    pub env: BTreeMap<String, String>,
    pub host: String,
    pub readiness: ReadinessDescriptor,
}

/// Facts that exist only while the container runs.
#[derive(Debug, Clone)]
pub struct Runtime {
    pub container_id: String,
    /// Declared container port → host port
    pub mapped_ports: BTreeMap<u16, u16>,
    pub logs: Option<LogAccessor>,
}

/// Configured, never started. Holds the log spec until start consumes it.
#[derive(Debug)]
pub struct Unstarted {
    pub(crate) log: LogSpec,
}

#[derive(Debug)]
pub struct Running {
    pub(crate) runtime: Runtime,
}

#[derive(Debug)]
pub struct Stopped;

/// A start that did not complete. The container may exist and may be running.
#[derive(Debug)]
pub struct Failed;

/// A container fixture in state `S`.
///
/// Every transition consumes the record and returns a new one; the handle
/// moves along with it.
#[derive(Debug)]
pub struct Container<S> {
    pub(crate) declared: Declared,
    pub(crate) derived: Derived,
    pub(crate) directives: Vec<Directive>,
    pub(crate) handle: ContainerHandle,
    pub(crate) resolvers: Arc<Resolvers>,
    pub(crate) state: S,
}

/// Configure `handle` from `declared` using the global strategy resolvers.
///
/// # Errors
///
/// Returns [`ContainerError::ConfigError`] for aliases without a network or
/// invalid readiness or log options.
pub fn init(handle: ContainerHandle, declared: Declared) -> Result<Container<Unstarted>> {
    init_with(handle, declared, Resolvers::global())
}

/// Configure `handle` from `declared` using explicit resolvers.
pub fn init_with(
    mut handle: ContainerHandle,
    declared: Declared,
    resolvers: Arc<Resolvers>,
) -> Result<Container<Unstarted>> {
    declared.validate()?;

    handle.set_exposed_ports(&declared.exposed_ports);
    for (key, value) in &declared.env {
        handle.add_env(key.clone(), value.clone());
    }
    if let Some(command) = &declared.command {
        handle.set_command(command.clone());
    }
    if let Some(network) = &declared.network {
        handle.set_network(network);
        handle.set_network_aliases(declared.network_aliases.clone());
    }

    resolvers.validate_logs(&declared.log)?;
    let readiness = resolvers.resolve_wait(&declared.wait, &mut handle)?;

    let derived = Derived {
        exposed_ports: handle.exposed_ports().to_vec(),
        env: handle.env().clone(),
        host: handle.host(),
        readiness,
    };

    debug!(
        image = %handle.image(),
        ports = ?derived.exposed_ports,
        readiness = ?derived.readiness,
        network = ?declared.network.as_ref().map(Network::name),
        "Configured container"
    );

    Ok(Container {
        state: Unstarted {
            log: declared.log.clone(),
        },
        declared,
        derived,
        directives: Vec::new(),
        handle,
        resolvers,
    })
}

impl<S> Container<S> {
    pub fn declared(&self) -> &Declared {
        &self.declared
    }

    pub fn derived(&self) -> &Derived {
        &self.derived
    }

    pub fn image(&self) -> &ImageSource {
        self.handle.image()
    }

    pub fn host(&self) -> &str {
        &self.derived.host
    }

    pub fn readiness(&self) -> &ReadinessDescriptor {
        &self.derived.readiness
    }

    /// Mount and copy directives applied before start, in order.
    pub fn mounts(&self) -> &[Directive] {
        &self.directives
    }

    pub fn handle(&self) -> &ContainerHandle {
        &self.handle
    }
}

impl Container<Unstarted> {
    /// Log spec that start will apply.
    pub fn pending_log(&self) -> &LogSpec {
        &self.state.log
    }
}
