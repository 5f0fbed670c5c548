use anyhow::Context;
use std::sync::Arc;
use testbed::cli::{Args, ConfigDiscovery, ExecutionMode, NetworkConfig, RunConfig};
use testbed::config::TestbedConfig;
use testbed::container::{ContainerError, Resources, create_network};
use testbed::engine::{DockerEngine, Engine, NetworkOptions};
use testbed::fixture::FixtureDefinition;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("testbed=info")),
        )
        .init();

    let args = Args::parse();
    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match mode {
        ExecutionMode::Run(config) => run_fixture(config).await,
        ExecutionMode::CreateNetwork(config) => run_create_network(config).await,
        ExecutionMode::ShowConfig => {
            ConfigDiscovery::show_discovery_info();
            let config = ConfigDiscovery::discover_config()?;
            println!();
            println!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn load_config(config_override: Option<&std::path::Path>) -> anyhow::Result<TestbedConfig> {
    let config = match config_override {
        Some(path) => {
            info!("Loading configuration override from: {:?}", path);
            TestbedConfig::from_toml_file(path)?.with_env_overrides()
        }
        None => ConfigDiscovery::discover_config()?,
    };
    Ok(config)
}

async fn run_fixture(config: RunConfig) -> anyhow::Result<()> {
    let settings = load_config(config.config_override.as_deref())?;
    let resources = Resources::from_config(&settings);
    let engine: Arc<dyn Engine> = Arc::new(DockerEngine::with_config(settings).await?);

    let fixture = FixtureDefinition::from_toml_file(&config.fixture)
        .with_context(|| format!("Failed to load fixture {}", config.fixture.display()))?;
    let prepared = fixture.prepare(engine.clone(), &resources).await?;

    let running = match prepared.container.start().await {
        Ok(running) => running,
        Err(e) => {
            warn!("Fixture failed to start ({}), cleaning up", e.source);
            e.container.remove().await?;
            if let Some(network) = prepared.network {
                network.remove().await?;
            }
            return Err(match e.source {
                ContainerError::ReadinessTimeout { timeout, .. } => {
                    anyhow::anyhow!("Fixture did not become ready within {:?}", timeout)
                }
                source => source.into(),
            });
        }
    };

    println!("Container: {}", running.container_id());
    println!("Image:     {}", running.image());
    println!("Host:      {}", running.host());
    for (container_port, host_port) in running.mapped_ports() {
        println!("Port:      {} -> {}:{}", container_port, running.host(), host_port);
    }
    if let Some(network) = &prepared.network {
        println!("Network:   {} ({})", network.name(), network.driver());
    }
    println!("Press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;

    if let Some(logs) = running.logs() {
        println!("--- captured output ---");
        print!("{}", logs.get());
    }

    if config.keep {
        info!("Leaving container {} in place", running.container_id());
        return Ok(());
    }

    running.stop().await?.remove().await?;
    if let Some(network) = prepared.network {
        network.remove().await?;
    }
    info!("Fixture stopped and removed");
    Ok(())
}

async fn run_create_network(config: NetworkConfig) -> anyhow::Result<()> {
    let settings = load_config(config.config_override.as_deref())?;
    let engine = Arc::new(DockerEngine::with_config(settings).await?);

    let options = NetworkOptions {
        enable_ipv6: config.enable_ipv6,
        driver: config.driver,
    };
    let network = create_network(engine, options).await?;

    println!("Network: {}", network.name());
    println!("Id:      {}", network.id());
    println!("Driver:  {}", network.driver());
    println!("IPv6:    {}", network.enable_ipv6());
    Ok(())
}
