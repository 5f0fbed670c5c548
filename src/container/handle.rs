//! The engine-native container handle.
//!
//! A [`ContainerHandle`] accumulates everything the engine needs to create a
//! container, then tracks the container it created. It is deliberately not
//! `Clone`: exactly one configuration record owns a live handle, and records
//! hand it on by move.

use super::readiness::{self, ProbeTarget, WaitCondition};
use super::{ContainerError, Result};
use crate::container::Network;
use crate::engine::{BindMount, ContainerSpec, Engine, FileCopy, ImageSource, LogChunk};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Receives container output as it is produced.
pub trait LogConsumer: Send + Sync {
    fn accept(&self, chunk: &LogChunk);
}

/// Exclusively owned engine-side representation of one container.
pub struct ContainerHandle {
    engine: Arc<dyn Engine>,
    image: ImageSource,
    spec: ContainerSpec,
    pending_copies: Vec<FileCopy>,
    wait: WaitCondition,
    startup_timeout: Duration,
    consumers: Vec<Arc<dyn LogConsumer>>,
    container_id: Option<String>,
    running: bool,
}

impl ContainerHandle {
    /// Create a handle for an image or build source.
    pub fn new(engine: Arc<dyn Engine>, image: ImageSource) -> Self {
        let startup_timeout = engine.startup_timeout();
        Self {
            engine,
            image,
            spec: ContainerSpec::default(),
            pending_copies: Vec::new(),
            wait: WaitCondition::None,
            startup_timeout,
            consumers: Vec::new(),
            container_id: None,
            running: false,
        }
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn image(&self) -> &ImageSource {
        &self.image
    }

    /// Engine-facing creation spec as configured so far.
    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    /// Replace the exposed ports. Stored sorted and de-duplicated.
    pub fn set_exposed_ports(&mut self, ports: &[u16]) {
        let mut ports = ports.to_vec();
        ports.sort_unstable();
        ports.dedup();
        self.spec.exposed_ports = ports;
    }

    pub fn exposed_ports(&self) -> &[u16] {
        &self.spec.exposed_ports
    }

    pub fn add_env<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.spec.env.insert(key.into(), value.into());
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.spec.env
    }

    pub fn set_command(&mut self, cmd: Vec<String>) {
        self.spec.cmd = Some(cmd);
    }

    pub fn command(&self) -> Option<&[String]> {
        self.spec.cmd.as_deref()
    }

    /// Attach the container to a network on creation.
    pub fn set_network(&mut self, network: &Network) {
        self.spec.network = Some(network.name().to_string());
    }

    pub fn set_network_aliases(&mut self, aliases: Vec<String>) {
        self.spec.network_aliases = aliases;
    }

    pub fn add_bind(&mut self, bind: BindMount) {
        self.spec.binds.push(bind);
    }

    /// Queue a file to be copied in after creation, before the container starts.
    pub fn queue_copy(&mut self, file: FileCopy) {
        self.pending_copies.push(file);
    }

    pub fn pending_copies(&self) -> &[FileCopy] {
        &self.pending_copies
    }

    /// Copy a file into the created container right away.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the container has not been created.
    pub async fn copy_now(&self, file: &FileCopy) -> Result<()> {
        let id = self.require_id()?;
        self.engine.copy_to_container(id, file).await
    }

    /// Set the condition `start` blocks on. Takes effect at the next start.
    pub fn set_wait_condition(&mut self, condition: WaitCondition) {
        self.wait = condition;
    }

    pub fn wait_condition(&self) -> &WaitCondition {
        &self.wait
    }

    pub fn set_startup_timeout(&mut self, timeout: Duration) {
        self.startup_timeout = timeout;
    }

    pub fn startup_timeout(&self) -> Duration {
        self.startup_timeout
    }

    /// Attach a log consumer. Before start it is registered and begins
    /// following output when the container starts; afterwards it follows
    /// immediately. Either way it sees the output from the beginning.
    pub fn attach_log_consumer(&mut self, consumer: Arc<dyn LogConsumer>) {
        match (&self.container_id, self.running) {
            (Some(id), true) => self.follow_logs(id, consumer),
            _ => self.consumers.push(consumer),
        }
    }

    /// Host on which mapped ports are reachable.
    pub fn host(&self) -> String {
        self.engine.host()
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Create (on first use) and start the container, then block until its
    /// wait condition holds or the startup timeout elapses.
    ///
    /// # Errors
    ///
    /// Engine failures propagate unchanged; an unmet wait condition yields
    /// [`ContainerError::ReadinessTimeout`] with the container left running.
    pub async fn start(&mut self) -> Result<()> {
        let container_id = match self.container_id.clone() {
            Some(id) => {
                self.engine.start_container(&id).await?;
                id
            }
            None => {
                self.spec.image = self.engine.ensure_image(&self.image).await?;
                let id = self.engine.create_container(&self.spec).await?;
                self.container_id = Some(id.clone());

                for file in &self.pending_copies {
                    self.engine.copy_to_container(&id, file).await?;
                }

                self.engine.start_container(&id).await?;
                id
            }
        };
        self.running = true;

        for consumer in std::mem::take(&mut self.consumers) {
            self.follow_logs(&container_id, consumer);
        }

        let host = self.engine.host();
        let target = ProbeTarget {
            engine: self.engine.as_ref(),
            container_id: &container_id,
            host: &host,
        };
        readiness::await_ready(
            &target,
            &self.spec.exposed_ports,
            &self.wait,
            self.startup_timeout,
        )
        .await?;

        info!("Container {} is ready ({})", container_id, self.image);
        Ok(())
    }

    /// Stop the running container.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::NotFound`] if the engine no longer knows the container.
    pub async fn stop(&mut self) -> Result<()> {
        let id = self.require_id()?.to_string();
        self.engine.stop_container(&id).await?;
        self.running = false;
        Ok(())
    }

    /// Remove the container from the engine. The handle can be started
    /// again afterwards, which creates a fresh container.
    pub async fn remove(&mut self) -> Result<()> {
        let id = self.require_id()?.to_string();
        self.engine.remove_container(&id).await?;
        self.container_id = None;
        self.running = false;
        Ok(())
    }

    /// Host port assigned to an exposed container port.
    pub async fn mapped_port(&self, port: u16) -> Result<u16> {
        let id = self.require_id()?;
        self.engine.mapped_port(id, port).await
    }

    /// Run a command inside the running container.
    pub async fn exec(&self, cmd: &[String]) -> Result<crate::engine::ExecOutput> {
        let id = self.require_id()?;
        self.engine.exec(id, cmd).await
    }

    fn require_id(&self) -> Result<&str> {
        self.container_id.as_deref().ok_or_else(|| {
            ContainerError::ConfigError(format!("Container for {} has not been created", self.image))
        })
    }

    fn follow_logs(&self, container_id: &str, consumer: Arc<dyn LogConsumer>) {
        let mut stream = self.engine.log_stream(container_id);
        let id = container_id.to_string();

        tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(chunk) => consumer.accept(&chunk),
                    Err(e) => {
                        debug!("Log stream of {} ended: {}", id, e);
                        break;
                    }
                }
            }
        });
    }
}

impl std::fmt::Debug for ContainerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerHandle")
            .field("image", &self.image)
            .field("spec", &self.spec)
            .field("pending_copies", &self.pending_copies.len())
            .field("wait", &self.wait)
            .field("startup_timeout", &self.startup_timeout)
            .field("container_id", &self.container_id)
            .field("running", &self.running)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::MemoryEngine;

    fn handle(engine: &Arc<MemoryEngine>) -> ContainerHandle {
        ContainerHandle::new(engine.clone(), ImageSource::image("alpine:3"))
    }

    #[test]
    fn test_exposed_ports_are_canonicalized() {
        let engine = Arc::new(MemoryEngine::new());
        let mut handle = handle(&engine);
        handle.set_exposed_ports(&[8080, 80, 8080]);
        assert_eq!(handle.exposed_ports(), &[80, 8080]);
    }

    #[tokio::test]
    async fn test_queued_copies_are_applied_before_start() {
        let engine = Arc::new(MemoryEngine::new());
        let mut handle = handle(&engine);
        handle.queue_copy(FileCopy {
            contents: b"hello".to_vec(),
            container_path: "/opt/test.sql".to_string(),
            mode: 0o644,
        });

        handle.start().await.unwrap();
        let id = handle.container_id().unwrap().to_string();

        let output = engine.exec(&id, &["cat".to_string(), "/opt/test.sql".to_string()]).await;
        assert_eq!(output.unwrap().stdout, "hello");
    }

    #[tokio::test]
    async fn test_operations_before_creation_are_rejected() {
        let engine = Arc::new(MemoryEngine::new());
        let handle = handle(&engine);

        assert!(matches!(handle.mapped_port(80).await, Err(ContainerError::ConfigError(_))));
        assert!(matches!(
            handle.exec(&["true".to_string()]).await,
            Err(ContainerError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_restart_reuses_container() {
        let engine = Arc::new(MemoryEngine::new());
        let mut handle = handle(&engine);

        handle.start().await.unwrap();
        let first = handle.container_id().unwrap().to_string();
        handle.stop().await.unwrap();
        assert!(!handle.is_running());

        handle.start().await.unwrap();
        assert_eq!(handle.container_id(), Some(first.as_str()));
        assert_eq!(engine.created_count(), 1);
    }
}
