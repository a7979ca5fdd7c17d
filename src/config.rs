// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present Pluribus Contributors

//! Configuration management for the hypervisor
//!
//! Supports both command-line arguments and configuration files. Files may
//! be TOML or JSON, chosen by extension. The principal list is static and
//! its record order determines principal id assignment (0-based).

use crate::error::ConfigError;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_listen_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    6633
}

/// Wait this long after the features reply before requesting the port list.
/// Gives the switch time to finish adding loopback ports.
fn default_port_discovery_delay_ms() -> u64 {
    10_000
}

/// Virtualization strategy, selected once at load time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Inter-principal links via physical loopback port pairs
    LogicalPort,
    /// Inter-principal forwarding via early/late table chaining
    ChainedTable,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::LogicalPort => write!(f, "logical_port"),
            Strategy::ChainedTable => write!(f, "chained_table"),
        }
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "logical_port" => Ok(Strategy::LogicalPort),
            "chained_table" => Ok(Strategy::ChainedTable),
            _ => Err(format!(
                "Invalid strategy: {}. Use 'logical_port' or 'chained_table'",
                s
            )),
        }
    }
}

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "pluribus")]
#[command(version = "0.1.0")]
#[command(about = "Switch hypervisor for table-based flow programming", long_about = None)]
pub struct CliArgs {
    /// Path to a TOML or JSON configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: PathBuf,

    /// Override the virtualization strategy from the file
    #[arg(long, value_name = "STRATEGY")]
    pub strategy: Option<Strategy>,

    /// Override the port discovery delay (milliseconds)
    #[arg(long, value_name = "MS")]
    pub port_discovery_delay_ms: Option<u64>,
}

/// One principal record from static configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalConfig {
    /// Port numbers this principal physically controls; disjoint across
    /// principals
    pub physical_ports: Vec<u32>,
    pub listening_ip: String,
    pub listening_port: u16,
}

impl PrincipalConfig {
    /// Address the principal session connects to
    pub fn address(&self) -> String {
        format!("{}:{}", self.listening_ip, self.listening_port)
    }
}

/// Switch session section of the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchSection {
    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
}

impl Default for SwitchSection {
    fn default() -> Self {
        Self {
            listen_ip: default_listen_ip(),
            listen_port: default_listen_port(),
        }
    }
}

/// Hypervisor section of the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypervisorSection {
    pub strategy: Strategy,
    #[serde(default = "default_port_discovery_delay_ms")]
    pub port_discovery_delay_ms: u64,
}

/// Configuration file structure (TOML or JSON)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub switch: SwitchSection,
    pub hypervisor: HypervisorSection,
    #[serde(default)]
    pub principal: Vec<PrincipalConfig>,
}

/// Unified configuration after parsing CLI and file
#[derive(Debug, Clone)]
pub struct HypervisorConfig {
    /// Address the controller listens on for the physical switch
    pub listen_address: String,
    pub strategy: Strategy,
    pub port_discovery_delay: Duration,
    /// Record order determines principal ids, 0-based
    pub principals: Vec<PrincipalConfig>,
}

impl HypervisorConfig {
    /// Creates configuration from command-line arguments
    pub fn from_cli(args: CliArgs) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(&args.config)?;
        if let Some(strategy) = args.strategy {
            config.strategy = strategy;
        }
        if let Some(delay_ms) = args.port_discovery_delay_ms {
            config.port_discovery_delay = Duration::from_millis(delay_ms);
        }
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML or JSON file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed(e.to_string()))?;

        let is_json = path.extension().is_some_and(|ext| ext == "json");
        let file: FileConfig = if is_json {
            serde_json::from_str(&contents).map_err(|e| ConfigError::ParseFailed(e.to_string()))?
        } else {
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(e.to_string()))?
        };

        Ok(Self {
            listen_address: format!("{}:{}", file.switch.listen_ip, file.switch.listen_port),
            strategy: file.hypervisor.strategy,
            port_discovery_delay: Duration::from_millis(file.hypervisor.port_discovery_delay_ms),
            principals: file.principal,
        })
    }

    /// Validates the principal list
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.principals.is_empty() {
            return Err(ConfigError::NoPrincipals);
        }

        let mut seen: BTreeSet<u32> = BTreeSet::new();
        for principal in &self.principals {
            for &port in &principal.physical_ports {
                if !seen.insert(port) {
                    return Err(ConfigError::OverlappingPhysicalPorts { port });
                }
            }
        }
        Ok(())
    }
}
