//! Start/stop transitions.
//!
//! ```text
//! Unstarted --start--> Running --stop--> Stopped --start--> Running
//!     |                                     |
//!     +--start fails--> Failed --stop-------+--remove--> (gone)
//! ```

use super::handle::ContainerHandle;
use super::record::{Container, Declared, Failed, Running, Runtime, Stopped, Unstarted};
use super::{ContainerError, Result, StartError, StartResult};
use crate::engine::ExecOutput;
use crate::strategy::{LogAccessor, LogSpec, Resolvers};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

impl Container<Unstarted> {
    /// Create and start the container, wait for readiness, then attach log
    /// capture and record the identity and port mapping.
    ///
    /// # Errors
    ///
    /// Any failure returns a [`StartError`] holding the record as
    /// `Container<Failed>`. On [`ContainerError::ReadinessTimeout`] the
    /// container is left running.
    pub async fn start(self) -> StartResult<Container<Running>> {
        let log = self.state.log.clone();
        self.start_with(Some(&log)).await
    }
}

impl Container<Stopped> {
    /// Start the stopped container again. No log spec remains, so the
    /// restarted record has no log accessor.
    pub async fn start(self) -> StartResult<Container<Running>> {
        self.start_with(None).await
    }

    /// Remove the stopped container from the engine.
    pub async fn remove(self) -> Result<()> {
        let mut handle = self.handle;
        if handle.container_id().is_none() {
            debug!("No container was created, nothing to remove");
            return Ok(());
        }
        handle.remove().await
    }
}

impl Container<Failed> {
    /// Id of the container created before the failure, if any.
    pub fn container_id(&self) -> Option<&str> {
        self.handle.container_id()
    }

    /// Stop the container if the failed start left it running.
    pub async fn stop(self) -> Result<Container<Stopped>> {
        let mut container = self;
        if container.handle.is_running() {
            container.handle.stop().await?;
        }
        Ok(container.with_state(Stopped))
    }

    /// Remove whatever the failed start created.
    pub async fn remove(self) -> Result<()> {
        let mut handle = self.handle;
        match handle.container_id() {
            Some(id) => {
                debug!("Removing container {} after failed start", id);
                handle.remove().await
            }
            None => Ok(()),
        }
    }
}

impl<S> Container<S> {
    fn with_state<T>(self, state: T) -> Container<T> {
        Container {
            declared: self.declared,
            derived: self.derived,
            directives: self.directives,
            handle: self.handle,
            resolvers: self.resolvers,
            state,
        }
    }

    async fn start_with(mut self, log: Option<&LogSpec>) -> StartResult<Container<Running>> {
        match bring_up(&mut self.handle, &self.declared, &self.resolvers, log).await {
            Ok(runtime) => Ok(self.with_state(Running { runtime })),
            Err(source) => {
                warn!(
                    container_id = ?self.handle.container_id(),
                    error = %source,
                    "Container start failed"
                );
                Err(StartError {
                    source,
                    container: Box::new(self.with_state(Failed)),
                })
            }
        }
    }
}

async fn bring_up(
    handle: &mut ContainerHandle,
    declared: &Declared,
    resolvers: &Resolvers,
    log: Option<&LogSpec>,
) -> Result<Runtime> {
    handle.start().await?;
    let logs = match log {
        Some(spec) => resolvers.resolve_logs(spec, handle)?,
        None => None,
    };

    let container_id = handle
        .container_id()
        .ok_or_else(|| ContainerError::Other("Started container has no id".to_string()))?
        .to_string();

    let mut mapped_ports = BTreeMap::new();
    for &port in &declared.exposed_ports {
        mapped_ports.insert(port, handle.mapped_port(port).await?);
    }

    info!(
        container_id = %container_id,
        image = %handle.image(),
        ports = ?mapped_ports,
        "Container running"
    );

    Ok(Runtime {
        container_id,
        mapped_ports,
        logs,
    })
}

impl Container<Running> {
    /// Stop the container, dropping identity, port mapping and log accessor.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::NotFound`] if the engine no longer knows the
    /// container; an already-gone container is not treated as stopped.
    pub async fn stop(mut self) -> Result<Container<Stopped>> {
        self.handle.stop().await?;
        debug!("Container {} stopped", self.state.runtime.container_id);
        Ok(self.with_state(Stopped))
    }

    pub fn runtime(&self) -> &Runtime {
        &self.state.runtime
    }

    pub fn container_id(&self) -> &str {
        &self.state.runtime.container_id
    }

    /// Declared container port → host port.
    pub fn mapped_ports(&self) -> &BTreeMap<u16, u16> {
        &self.state.runtime.mapped_ports
    }

    /// Host port for a declared exposed port.
    pub fn host_port(&self, container_port: u16) -> Option<u16> {
        self.state.runtime.mapped_ports.get(&container_port).copied()
    }

    /// Captured output, if a log strategy was attached at start.
    pub fn logs(&self) -> Option<&LogAccessor> {
        self.state.runtime.logs.as_ref()
    }

    /// Run a command inside the container.
    pub async fn exec<I, S>(&self, cmd: I) -> Result<ExecOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cmd: Vec<String> = cmd.into_iter().map(Into::into).collect();
        if cmd.is_empty() {
            return Err(ContainerError::ConfigError("Empty command".to_string()));
        }
        self.handle.exec(&cmd).await
    }
}
