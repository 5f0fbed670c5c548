//! Docker/Podman engine.
//!
//! Implements [`Engine`] over the bollard Docker API with automatic
//! connection handling: an explicitly configured host first, then local
//! defaults (including `DOCKER_HOST`), then rootless and system Podman
//! sockets.

use super::image::ImageManager;
use super::{
    ContainerSpec, Engine, ExecOutput, FileCopy, HealthStatus, ImageSource, LogChunk, LogSource,
    LogStream, NetworkInfo, NetworkOptions,
};
use crate::config::{ConfigDiscovery, TestbedConfig};
use crate::container::{ContainerError, Result};
use crate::env;
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{
    ContainerCreateBody, EndpointSettings, HealthStatusEnum, HostConfig, NetworkCreateRequest,
    NetworkingConfig,
};
use bollard::query_parameters::{
    CreateContainerOptions, InspectContainerOptions, InspectNetworkOptions, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    UploadToContainerOptions,
};
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const CONNECT_TIMEOUT_SECS: u64 = 120;

/// Docker/Podman engine.
#[derive(Clone)]
pub struct DockerEngine {
    docker: Arc<Docker>,
    images: ImageManager,
    config: TestbedConfig,
    host: String,
    session: String,
}

impl DockerEngine {
    /// Connect using the discovered configuration.
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid or no engine is reachable.
    pub async fn new() -> Result<Self> {
        Self::with_config(ConfigDiscovery::discover_config()?).await
    }

    /// Connect with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns error if connection to the container runtime fails.
    pub async fn with_config(config: TestbedConfig) -> Result<Self> {
        let docker = Self::connect(config.docker_host.as_deref()).await?;

        let host = match std::env::var(env::vars::HOST_OVERRIDE) {
            Ok(host) if !host.trim().is_empty() => host.trim().to_string(),
            _ => match config.docker_host.as_deref() {
                Some(docker_host) => env::host_from_docker_host(docker_host),
                None => env::resolve_host(),
            },
        };

        Ok(Self {
            images: ImageManager::new(docker.clone()),
            docker: Arc::new(docker),
            config,
            host,
            session: uuid::Uuid::new_v4().to_string(),
        })
    }

    /// Connect to Docker or Podman daemon.
    ///
    /// Tries connection strategies in order and keeps the first that answers a ping:
    /// 1. Explicitly configured host
    /// 2. Local defaults (`DOCKER_HOST`, Unix socket or Windows named pipe)
    /// 3. Podman sockets
    async fn connect(explicit_host: Option<&str>) -> Result<Docker> {
        debug!("Attempting to connect to container runtime...");

        let mut candidates: Vec<(String, std::result::Result<Docker, bollard::errors::Error>)> =
            Vec::new();

        if let Some(host) = explicit_host {
            let docker = if host.starts_with("unix://") {
                Docker::connect_with_socket(host, CONNECT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
            } else {
                Docker::connect_with_http(host, CONNECT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
            };
            candidates.push((format!("configured host {}", host), docker));
        }

        candidates.push(("local defaults".to_string(), Docker::connect_with_defaults()));

        #[cfg(unix)]
        {
            if let Ok(home) = std::env::var("HOME") {
                let podman_socket = format!("unix://{}/run/podman/podman.sock", home);
                let docker = Docker::connect_with_socket(
                    &podman_socket,
                    CONNECT_TIMEOUT_SECS,
                    bollard::API_DEFAULT_VERSION,
                );
                candidates.push((format!("Podman socket {}", podman_socket), docker));
            }

            let system_socket = "unix:///run/podman/podman.sock";
            candidates.push((
                format!("Podman socket {}", system_socket),
                Docker::connect_with_socket(
                    system_socket,
                    CONNECT_TIMEOUT_SECS,
                    bollard::API_DEFAULT_VERSION,
                ),
            ));
        }

        for (label, docker) in candidates {
            match docker {
                Ok(docker) => match docker.ping().await {
                    Ok(_) => {
                        info!("Connected to container runtime via {}", label);
                        return Ok(docker);
                    }
                    Err(e) => debug!("{} did not answer ping: {}", label, e),
                },
                Err(e) => debug!("{} failed: {}", label, e),
            }
        }

        Err(ContainerError::Other(
            "Failed to connect to Docker or Podman. Please ensure Docker or Podman is installed and running.".to_string()
        ))
    }

    /// Get the underlying Docker client.
    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    /// Configuration this engine was created with.
    pub fn config(&self) -> &TestbedConfig {
        &self.config
    }

    /// Check if the runtime is Docker or Podman.
    ///
    /// # Errors
    ///
    /// Returns error if the version query fails.
    pub async fn runtime_type(&self) -> Result<RuntimeType> {
        let version = self.docker.version().await?;

        let is_podman = version
            .components
            .unwrap_or_default()
            .iter()
            .any(|c| c.name.to_lowercase().contains("podman"));

        if is_podman {
            Ok(RuntimeType::Podman)
        } else {
            Ok(RuntimeType::Docker)
        }
    }

    fn labels(&self) -> HashMap<String, String> {
        HashMap::from([
            (env::labels::MANAGED.to_string(), "true".to_string()),
            (env::labels::SESSION.to_string(), self.session.clone()),
        ])
    }
}

/// Map a 404 from the engine to [`ContainerError::NotFound`].
fn not_found_as(e: bollard::errors::Error, what: &str) -> ContainerError {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => ContainerError::NotFound(what.to_string()),
        e => ContainerError::ApiError(e),
    }
}

/// Wrap a single file in a tar archive rooted at `/`.
fn single_file_archive(file: &FileCopy) -> Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header.set_size(file.contents.len() as u64);
    header.set_mode(file.mode);
    header.set_entry_type(tar::EntryType::Regular);

    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(
        &mut header,
        file.container_path.trim_start_matches('/'),
        file.contents.as_slice(),
    )?;
    Ok(builder.into_inner()?)
}

#[async_trait]
impl Engine for DockerEngine {
    fn host(&self) -> String {
        self.host.clone()
    }

    fn startup_timeout(&self) -> Duration {
        self.config.startup_timeout()
    }

    fn name_prefix(&self) -> String {
        self.config.name_prefix.clone()
    }

    async fn ensure_image(&self, source: &ImageSource) -> Result<String> {
        match source {
            ImageSource::Image(reference) => {
                if self.images.image_exists(reference).await? {
                    debug!("Image {} already exists locally", reference);
                } else if self.config.auto_pull {
                    self.images.pull_image(reference).await?;
                } else {
                    return Err(ContainerError::ConfigError(format!(
                        "Image '{}' is not present locally and auto_pull is disabled",
                        reference
                    )));
                }
                Ok(reference.clone())
            }
            ImageSource::Build {
                context,
                dockerfile,
                tag,
            } => {
                let tag = tag.clone().unwrap_or_else(|| {
                    format!("{}-build:{}", self.config.name_prefix, uuid::Uuid::new_v4())
                });
                self.images
                    .build_image(context, dockerfile.as_deref(), &tag)
                    .await
            }
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let name = spec
            .name
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.config.name_prefix, uuid::Uuid::new_v4()));

        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .exposed_ports
            .iter()
            .map(|port| (format!("{}/tcp", port), HashMap::new()))
            .collect();

        let binds: Vec<String> = spec.binds.iter().map(|b| b.to_bind_string()).collect();

        let host_config = HostConfig {
            binds: if binds.is_empty() { None } else { Some(binds) },
            publish_all_ports: Some(!spec.exposed_ports.is_empty()),
            network_mode: spec.network.clone(),
            ..Default::default()
        };

        let networking_config = spec.network.as_ref().map(|network| {
            let endpoint = EndpointSettings {
                aliases: if spec.network_aliases.is_empty() {
                    None
                } else {
                    Some(spec.network_aliases.clone())
                },
                ..Default::default()
            };
            NetworkingConfig {
                endpoints_config: Some(HashMap::from([(network.clone(), endpoint)])),
            }
        });

        let mut labels = self.labels();
        labels.extend(spec.labels.iter().map(|(k, v)| (k.clone(), v.clone())));

        let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();

        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            cmd: spec.cmd.clone(),
            env: if env.is_empty() { None } else { Some(env) },
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            labels: Some(labels),
            host_config: Some(host_config),
            networking_config,
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: Some(name.clone()),
            ..Default::default()
        };

        debug!("Creating container: {}", name);

        let response = self.docker.create_container(Some(options), body).await?;

        info!("Created container: {} ({})", name, response.id);

        Ok(response.id)
    }

    async fn copy_to_container(&self, container_id: &str, file: &FileCopy) -> Result<()> {
        debug!(
            "Copying {} bytes to {}:{}",
            file.contents.len(),
            container_id,
            file.container_path
        );

        let archive = single_file_archive(file)?;
        let options = UploadToContainerOptions {
            path: "/".to_string(),
            ..Default::default()
        };

        self.docker
            .upload_to_container(container_id, Some(options), bollard::body_full(archive.into()))
            .await
            .map_err(|e| not_found_as(e, container_id))
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        debug!("Starting container: {}", container_id);

        self.docker
            .start_container(container_id, None::<StartContainerOptions>)
            .await
            .map_err(|e| not_found_as(e, container_id))?;

        info!("Started container: {}", container_id);
        Ok(())
    }

    async fn stop_container(&self, container_id: &str) -> Result<()> {
        debug!("Stopping container: {}", container_id);

        let options = StopContainerOptions {
            t: Some(self.config.stop_timeout().as_secs() as i32),
            signal: None,
        };

        self.docker
            .stop_container(container_id, Some(options))
            .await
            .map_err(|e| not_found_as(e, container_id))?;

        info!("Stopped container: {}", container_id);
        Ok(())
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        debug!("Removing container: {}", container_id);

        self.docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| not_found_as(e, container_id))?;

        info!("Removed container: {}", container_id);
        Ok(())
    }

    async fn mapped_port(&self, container_id: &str, port: u16) -> Result<u16> {
        let inspect = self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| not_found_as(e, container_id))?;

        let key = format!("{}/tcp", port);
        inspect
            .network_settings
            .and_then(|settings| settings.ports)
            .and_then(|mut ports| ports.remove(&key))
            .flatten()
            .and_then(|bindings| {
                bindings
                    .into_iter()
                    .find_map(|binding| binding.host_port.and_then(|p| p.parse::<u16>().ok()))
            })
            .ok_or_else(|| {
                ContainerError::Other(format!(
                    "Port {} of container {} is not mapped to the host",
                    port, container_id
                ))
            })
    }

    async fn health_status(&self, container_id: &str) -> Result<HealthStatus> {
        let inspect = self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| not_found_as(e, container_id))?;

        let status = inspect
            .state
            .and_then(|state| state.health)
            .and_then(|health| health.status);

        Ok(match status {
            Some(HealthStatusEnum::HEALTHY) => HealthStatus::Healthy,
            Some(HealthStatusEnum::UNHEALTHY) => HealthStatus::Unhealthy,
            Some(HealthStatusEnum::STARTING) => HealthStatus::Starting,
            _ => HealthStatus::None,
        })
    }

    fn log_stream(&self, container_id: &str) -> LogStream {
        let options = LogsOptions {
            follow: true,
            stdout: true,
            stderr: true,
            tail: "all".to_string(),
            ..Default::default()
        };

        let id = container_id.to_string();
        let stream = self.docker.logs(container_id, Some(options)).filter_map(move |item| {
            let chunk = match item {
                Ok(LogOutput::StdErr { message }) => Some(Ok(LogChunk {
                    source: LogSource::StdErr,
                    text: String::from_utf8_lossy(&message).into_owned(),
                })),
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                    Some(Ok(LogChunk {
                        source: LogSource::StdOut,
                        text: String::from_utf8_lossy(&message).into_owned(),
                    }))
                }
                Ok(LogOutput::StdIn { .. }) => None,
                Err(e) => Some(Err(not_found_as(e, &id))),
            };
            futures::future::ready(chunk)
        });

        Box::pin(stream)
    }

    async fn exec(&self, container_id: &str, cmd: &[String]) -> Result<ExecOutput> {
        debug!("Executing command in container {}: {:?}", container_id, cmd);

        let exec_options = CreateExecOptions {
            cmd: Some(cmd.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container_id, exec_options)
            .await
            .map_err(|e| not_found_as(e, container_id))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        match self.docker.start_exec(&exec.id, None).await? {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(result) = output.next().await {
                    match result {
                        Ok(LogOutput::StdErr { message }) => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(LogOutput::StdIn { .. }) => {}
                        Err(e) => {
                            return Err(ContainerError::ExecutionError(format!(
                                "Failed to read output: {}",
                                e
                            )));
                        }
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(ContainerError::ExecutionError(
                    "Unexpected detached execution".to_string(),
                ));
            }
        }

        let exit_code = self.docker.inspect_exec(&exec.id).await?.exit_code;

        debug!("Command executed with exit code: {:?}", exit_code);

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    async fn create_network(&self, name: &str, options: &NetworkOptions) -> Result<NetworkInfo> {
        debug!("Creating network: {}", name);

        let request = NetworkCreateRequest {
            name: name.to_string(),
            driver: options.driver.clone(),
            enable_ipv6: options.enable_ipv6,
            labels: Some(self.labels()),
            ..Default::default()
        };

        let response = self
            .docker
            .create_network(request)
            .await
            .map_err(|e| ContainerError::NetworkError(format!("{}: {}", name, e)))?;

        let network = self
            .docker
            .inspect_network(&response.id, None::<InspectNetworkOptions>)
            .await
            .map_err(|e| not_found_as(e, &response.id))?;

        let info = NetworkInfo {
            id: network.id.unwrap_or(response.id),
            name: network.name.unwrap_or_else(|| name.to_string()),
            driver: network.driver.unwrap_or_default(),
            enable_ipv6: network.enable_ipv6.unwrap_or(false),
        };

        info!("Created network: {} ({}, driver {})", info.name, info.id, info.driver);

        Ok(info)
    }

    async fn remove_network(&self, network_id: &str) -> Result<()> {
        debug!("Removing network: {}", network_id);
        self.docker
            .remove_network(network_id)
            .await
            .map_err(|e| not_found_as(e, network_id))?;
        info!("Removed network: {}", network_id);
        Ok(())
    }
}

/// Type of container runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeType {
    /// Docker runtime
    Docker,
    /// Podman runtime
    Podman,
}

impl std::fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeType::Docker => write!(f, "Docker"),
            RuntimeType::Podman => write!(f, "Podman"),
        }
    }
}
