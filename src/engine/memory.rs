//! In-process engine for unit tests.

use super::{
    ContainerSpec, Engine, ExecOutput, FileCopy, HealthStatus, ImageSource, LogChunk, LogSource,
    LogStream, NetworkInfo, NetworkOptions,
};
use crate::container::{ContainerError, Result};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const FIRST_HOST_PORT: u16 = 49153;

struct FakeContainer {
    spec: ContainerSpec,
    running: bool,
    files: BTreeMap<String, Vec<u8>>,
    ports: BTreeMap<u16, u16>,
    history: Vec<LogChunk>,
    followers: Vec<mpsc::UnboundedSender<Result<LogChunk>>>,
}

impl FakeContainer {
    fn emit(&mut self, chunk: LogChunk) {
        self.followers
            .retain(|follower| follower.unbounded_send(Ok(chunk.clone())).is_ok());
        self.history.push(chunk);
    }
}

#[derive(Default)]
struct State {
    containers: HashMap<String, FakeContainer>,
    networks: HashMap<String, NetworkInfo>,
    port_overrides: HashMap<u16, u16>,
    startup_logs: Vec<String>,
    health: Option<HealthStatus>,
    next_port: u16,
    created: usize,
}

/// Engine double holding containers and networks in memory.
pub(crate) struct MemoryEngine {
    state: Mutex<State>,
}

impl MemoryEngine {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_port: FIRST_HOST_PORT,
                ..State::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("memory engine state poisoned")
    }

    /// Map a container port to a fixed host port instead of an allocated one.
    pub(crate) fn set_port_override(&self, container_port: u16, host_port: u16) {
        self.state().port_overrides.insert(container_port, host_port);
    }

    pub(crate) fn set_health(&self, health: HealthStatus) {
        self.state().health = Some(health);
    }

    /// Output every container writes when it starts.
    pub(crate) fn set_startup_logs<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state().startup_logs = lines.into_iter().map(Into::into).collect();
    }

    pub(crate) fn emit_log(&self, container_id: &str, source: LogSource, text: &str) {
        if let Some(container) = self.state().containers.get_mut(container_id) {
            container.emit(LogChunk {
                source,
                text: text.to_string(),
            });
        }
    }

    /// Drop a container behind the caller's back.
    pub(crate) fn forget(&self, container_id: &str) {
        self.state().containers.remove(container_id);
    }

    pub(crate) fn contains(&self, container_id: &str) -> bool {
        self.state().containers.contains_key(container_id)
    }

    pub(crate) fn is_running(&self, container_id: &str) -> bool {
        self.state()
            .containers
            .get(container_id)
            .is_some_and(|container| container.running)
    }

    pub(crate) fn created_count(&self) -> usize {
        self.state().created
    }

    pub(crate) fn network_count(&self) -> usize {
        self.state().networks.len()
    }
}

fn missing(container_id: &str) -> ContainerError {
    ContainerError::NotFound(format!("Container {}", container_id))
}

fn read_file(container: &FakeContainer, path: &str) -> Option<Vec<u8>> {
    if let Some(contents) = container.files.get(path) {
        return Some(contents.clone());
    }

    container.spec.binds.iter().find_map(|bind| {
        let host_path = if bind.container_path == path {
            bind.host_path.clone()
        } else {
            let relative = path.strip_prefix(&format!("{}/", bind.container_path))?;
            bind.host_path.join(relative)
        };
        std::fs::read(&host_path).ok()
    })
}

#[async_trait]
impl Engine for MemoryEngine {
    fn host(&self) -> String {
        "localhost".to_string()
    }

    async fn ensure_image(&self, source: &ImageSource) -> Result<String> {
        Ok(match source {
            ImageSource::Image(reference) => reference.clone(),
            ImageSource::Build { tag, .. } => tag.clone().unwrap_or_else(|| "testbed-build:latest".to_string()),
        })
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let mut state = self.state();
        if let Some(network) = &spec.network
            && !state.networks.values().any(|info| &info.name == network)
        {
            return Err(ContainerError::NotFound(format!("Network {}", network)));
        }

        let id = Uuid::new_v4().simple().to_string();
        state.containers.insert(
            id.clone(),
            FakeContainer {
                spec: spec.clone(),
                running: false,
                files: BTreeMap::new(),
                ports: BTreeMap::new(),
                history: Vec::new(),
                followers: Vec::new(),
            },
        );
        state.created += 1;
        Ok(id)
    }

    async fn copy_to_container(&self, container_id: &str, file: &FileCopy) -> Result<()> {
        let mut state = self.state();
        let container = state
            .containers
            .get_mut(container_id)
            .ok_or_else(|| missing(container_id))?;
        container
            .files
            .insert(file.container_path.clone(), file.contents.clone());
        Ok(())
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        let mut state = self.state();
        let State {
            containers,
            port_overrides,
            startup_logs,
            next_port,
            ..
        } = &mut *state;
        let container = containers
            .get_mut(container_id)
            .ok_or_else(|| missing(container_id))?;

        container.running = true;
        container.ports.clear();
        for &port in &container.spec.exposed_ports {
            let host_port = match port_overrides.get(&port) {
                Some(&host_port) => host_port,
                None => {
                    *next_port += 1;
                    *next_port - 1
                }
            };
            container.ports.insert(port, host_port);
        }
        for line in startup_logs.iter() {
            container.emit(LogChunk {
                source: LogSource::StdOut,
                text: line.clone(),
            });
        }
        Ok(())
    }

    async fn stop_container(&self, container_id: &str) -> Result<()> {
        let mut state = self.state();
        let container = state
            .containers
            .get_mut(container_id)
            .ok_or_else(|| missing(container_id))?;
        container.running = false;
        container.ports.clear();
        container.followers.clear();
        Ok(())
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        self.state()
            .containers
            .remove(container_id)
            .map(|_| ())
            .ok_or_else(|| missing(container_id))
    }

    async fn mapped_port(&self, container_id: &str, port: u16) -> Result<u16> {
        let state = self.state();
        let container = state
            .containers
            .get(container_id)
            .ok_or_else(|| missing(container_id))?;
        container.ports.get(&port).copied().ok_or_else(|| {
            ContainerError::NotFound(format!("Port {} is not published by {}", port, container_id))
        })
    }

    async fn health_status(&self, container_id: &str) -> Result<HealthStatus> {
        let state = self.state();
        if !state.containers.contains_key(container_id) {
            return Err(missing(container_id));
        }
        Ok(state.health.unwrap_or(HealthStatus::None))
    }

    fn log_stream(&self, container_id: &str) -> LogStream {
        let mut state = self.state();
        let Some(container) = state.containers.get_mut(container_id) else {
            return stream::iter(vec![Err(missing(container_id))]).boxed();
        };

        let history: Vec<Result<LogChunk>> = container.history.iter().cloned().map(Ok).collect();
        if !container.running {
            return stream::iter(history).boxed();
        }

        let (sender, receiver) = mpsc::unbounded();
        container.followers.push(sender);
        stream::iter(history).chain(receiver).boxed()
    }

    async fn exec(&self, container_id: &str, cmd: &[String]) -> Result<ExecOutput> {
        let state = self.state();
        let container = state
            .containers
            .get(container_id)
            .ok_or_else(|| missing(container_id))?;
        if !container.running {
            return Err(ContainerError::ExecutionError(format!(
                "Container {} is not running",
                container_id
            )));
        }

        let output = match cmd {
            [program, path] if program == "cat" => match read_file(container, path) {
                Some(contents) => ExecOutput {
                    stdout: String::from_utf8_lossy(&contents).into_owned(),
                    stderr: String::new(),
                    exit_code: Some(0),
                },
                None => ExecOutput {
                    stdout: String::new(),
                    stderr: format!("cat: {}: No such file or directory\n", path),
                    exit_code: Some(1),
                },
            },
            [program, args @ ..] if program == "echo" => ExecOutput {
                stdout: format!("{}\n", args.join(" ")),
                stderr: String::new(),
                exit_code: Some(0),
            },
            _ => ExecOutput {
                stdout: String::new(),
                stderr: format!("{:?}: command not found\n", cmd),
                exit_code: Some(127),
            },
        };
        Ok(output)
    }

    async fn create_network(&self, name: &str, options: &NetworkOptions) -> Result<NetworkInfo> {
        let mut state = self.state();
        if state.networks.values().any(|info| info.name == name) {
            return Err(ContainerError::NetworkError(format!("Network {} already exists", name)));
        }

        let info = NetworkInfo {
            id: Uuid::new_v4().simple().to_string(),
            name: name.to_string(),
            driver: options.driver.clone().unwrap_or_else(|| "bridge".to_string()),
            enable_ipv6: options.enable_ipv6.unwrap_or(false),
        };
        state.networks.insert(info.id.clone(), info.clone());
        Ok(info)
    }

    async fn remove_network(&self, network_id: &str) -> Result<()> {
        self.state()
            .networks
            .remove(network_id)
            .map(|_| ())
            .ok_or_else(|| ContainerError::NotFound(format!("Network {}", network_id)))
    }
}
