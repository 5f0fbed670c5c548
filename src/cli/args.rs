//! Command line argument parsing
//!
//! Subcommands:
//! - `run`: Start a fixture from a TOML declaration and keep it up until Ctrl-C
//! - `network create`: Create a network and print what the engine reports
//! - `show-config`: Show configuration discovery information

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug)]
pub enum ExecutionMode {
    Run(RunConfig),
    CreateNetwork(NetworkConfig),
    ShowConfig,
}

#[derive(Debug)]
pub struct RunConfig {
    pub fixture: PathBuf,
    pub config_override: Option<PathBuf>,
    /// Leave the container in place after Ctrl-C
    pub keep: bool,
}

#[derive(Debug)]
pub struct NetworkConfig {
    pub enable_ipv6: Option<bool>,
    pub driver: Option<String>,
    pub config_override: Option<PathBuf>,
}

#[derive(Debug, Parser)]
#[command(name = "testbed")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Disposable container fixtures for tests")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start a fixture and keep it running until Ctrl-C
    Run {
        /// Fixture declaration (TOML)
        fixture: PathBuf,
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
        /// Do not stop and remove the container on exit
        #[arg(long = "keep")]
        keep: bool,
    },
    /// Manage networks
    Network {
        #[command(subcommand)]
        command: NetworkCommands,
    },
    /// Show configuration discovery information
    ShowConfig,
}

#[derive(Debug, Subcommand)]
pub enum NetworkCommands {
    /// Create a network
    Create {
        /// Enable IPv6 (dual-stack)
        #[arg(long = "ipv6")]
        ipv6: bool,
        /// Network driver (engine default when omitted)
        #[arg(short = 'd', long = "driver")]
        driver: Option<String>,
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Run {
                fixture,
                config,
                keep,
            }) => Ok(ExecutionMode::Run(RunConfig {
                fixture: fixture.clone(),
                config_override: config.clone(),
                keep: *keep,
            })),
            Some(Commands::Network {
                command:
                    NetworkCommands::Create {
                        ipv6,
                        driver,
                        config,
                    },
            }) => Ok(ExecutionMode::CreateNetwork(NetworkConfig {
                // Unset rather than false so the engine default applies
                enable_ipv6: ipv6.then_some(true),
                driver: driver.clone(),
                config_override: config.clone(),
            })),
            Some(Commands::ShowConfig) => Ok(ExecutionMode::ShowConfig),
            None => Err(
                "No command specified. Use 'testbed --help' to see available commands.".to_string(),
            ),
        }
    }
}
