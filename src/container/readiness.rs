//! Readiness runner: blocks `start` until the configured wait condition holds.

use super::{ContainerError, Result};
use crate::engine::{Engine, HealthStatus};
use crate::env::READINESS_POLL_INTERVAL;
use crate::strategy::wait::HttpWaitOptions;
use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// The single condition a handle waits on after engine start.
#[derive(Clone, Default)]
pub enum WaitCondition {
    /// Ready as soon as the engine reports the container started
    #[default]
    None,
    /// An HTTP endpoint answers with an accepted status code
    Http(HttpWaitOptions),
    /// The engine's own healthcheck reports healthy
    Healthcheck,
    /// Container output contains `times` lines matching `pattern`
    LogMessage { pattern: Regex, times: usize },
    /// A caller-supplied probe returns true
    Custom(Arc<dyn ReadinessProbe>),
}

impl std::fmt::Debug for WaitCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitCondition::None => write!(f, "None"),
            WaitCondition::Http(options) => f.debug_tuple("Http").field(options).finish(),
            WaitCondition::Healthcheck => write!(f, "Healthcheck"),
            WaitCondition::LogMessage { pattern, times } => f
                .debug_struct("LogMessage")
                .field("pattern", &pattern.as_str())
                .field("times", times)
                .finish(),
            WaitCondition::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// What a probe may inspect.
pub struct ProbeTarget<'a> {
    pub engine: &'a dyn Engine,
    pub container_id: &'a str,
    pub host: &'a str,
}

/// Readiness check polled until it returns `true` or the startup timeout elapses.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn is_ready(&self, target: &ProbeTarget<'_>) -> Result<bool>;
}

/// Wait for `condition`, bounded by `timeout`.
///
/// # Errors
///
/// [`ContainerError::ReadinessTimeout`] when the bound elapses; condition
/// specific failures (no healthcheck defined, log stream closed) otherwise.
pub async fn await_ready(
    target: &ProbeTarget<'_>,
    exposed_ports: &[u16],
    condition: &WaitCondition,
    timeout: Duration,
) -> Result<()> {
    if matches!(condition, WaitCondition::None) {
        return Ok(());
    }

    debug!(
        container_id = target.container_id,
        ?condition,
        ?timeout,
        "Waiting for container readiness"
    );

    match tokio::time::timeout(timeout, wait_for(target, exposed_ports, condition)).await {
        Ok(result) => result,
        Err(_) => Err(ContainerError::ReadinessTimeout {
            container_id: target.container_id.to_string(),
            timeout,
        }),
    }
}

async fn wait_for(
    target: &ProbeTarget<'_>,
    exposed_ports: &[u16],
    condition: &WaitCondition,
) -> Result<()> {
    match condition {
        WaitCondition::None => Ok(()),
        WaitCondition::Http(options) => wait_for_http(target, exposed_ports, options).await,
        WaitCondition::Healthcheck => wait_for_health(target).await,
        WaitCondition::LogMessage { pattern, times } => {
            wait_for_log(target, pattern, *times).await
        }
        WaitCondition::Custom(probe) => loop {
            if probe.is_ready(target).await? {
                return Ok(());
            }
            sleep(READINESS_POLL_INTERVAL).await;
        },
    }
}

async fn wait_for_http(
    target: &ProbeTarget<'_>,
    exposed_ports: &[u16],
    options: &HttpWaitOptions,
) -> Result<()> {
    let container_port = options
        .port
        .or_else(|| exposed_ports.first().copied())
        .ok_or_else(|| {
            ContainerError::ConfigError(
                "HTTP readiness needs a port or at least one exposed port".to_string(),
            )
        })?;
    let host_port = target
        .engine
        .mapped_port(target.container_id, container_port)
        .await?;

    let scheme = if options.tls { "https" } else { "http" };
    let path = if options.path.starts_with('/') {
        options.path.clone()
    } else {
        format!("/{}", options.path)
    };
    let url = format!("{}://{}:{}{}", scheme, target.host, host_port, path);

    let mut builder = reqwest::Client::builder().danger_accept_invalid_certs(options.allow_insecure);
    if let Some(secs) = options.read_timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    let client = builder
        .build()
        .map_err(|e| ContainerError::Other(format!("Failed to build HTTP client: {}", e)))?;

    loop {
        let mut request = client.get(&url);
        if let Some(auth) = &options.basic_auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }

        match request.send().await {
            Ok(response) if options.status_codes.contains(&response.status().as_u16()) => {
                debug!("{} answered {}", url, response.status());
                return Ok(());
            }
            Ok(response) => debug!("{} answered {}, still waiting", url, response.status()),
            Err(e) => debug!("{} not reachable yet: {}", url, e),
        }

        sleep(READINESS_POLL_INTERVAL).await;
    }
}

async fn wait_for_health(target: &ProbeTarget<'_>) -> Result<()> {
    loop {
        match target.engine.health_status(target.container_id).await? {
            HealthStatus::Healthy => return Ok(()),
            HealthStatus::None => {
                return Err(ContainerError::ConfigError(format!(
                    "Container {} has no healthcheck to wait on",
                    target.container_id
                )));
            }
            status => debug!("Container {} health: {:?}", target.container_id, status),
        }

        sleep(READINESS_POLL_INTERVAL).await;
    }
}

async fn wait_for_log(target: &ProbeTarget<'_>, pattern: &Regex, times: usize) -> Result<()> {
    let mut stream = target.engine.log_stream(target.container_id);
    let mut pending = String::new();
    let mut matched = 0;

    while let Some(chunk) = stream.next().await {
        pending.push_str(&chunk?.text);

        while let Some(end) = pending.find('\n') {
            let line: String = pending.drain(..=end).collect();
            if pattern.is_match(&line) {
                matched += 1;
                if matched >= times {
                    return Ok(());
                }
            }
        }
    }

    Err(ContainerError::ExecutionError(format!(
        "Output of {} ended after {} of {} lines matching {}",
        target.container_id,
        matched,
        times,
        pattern.as_str()
    )))
}
