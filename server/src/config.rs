use clap::{Parser, ValueEnum};
use figment::{
    providers::{Data, Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What happens when a connection claims a name that is already online.
#[derive(ValueEnum, Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum NamePolicy {
    /// Last registration wins; the previous owner is detached from the name
    #[default]
    Overwrite,
    /// The second claimant is told the name is taken and stays unregistered
    Reject,
}

/// Chat relay server
///
/// Only flags actually given on the command line are merged, so an unset
/// flag never shadows the TOML file or the environment.
#[derive(Parser, Serialize, Clone, Debug, Default)]
#[command(name = "chat-relay-server", version, about = "Real-time chat relay server")]
pub struct Cli {
    /// Port to listen on [default: 7070]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file [default: ./relay.toml]
    #[arg(long)]
    #[serde(skip)]
    pub config: Option<String>,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long)]
    #[serde(skip_serializing_if = "is_false")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "is_false")]
    pub generate_config: bool,

    /// Duplicate name handling [default: overwrite]
    #[arg(long, value_enum)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_policy: Option<NamePolicy>,

    /// Seconds between server pings, 0 disables the heartbeat [default: 30]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_interval_secs: Option<u64>,

    /// Seconds to wait for a pong before closing the connection [default: 10]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pong_timeout_secs: Option<u64>,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

const DEFAULT_CONFIG_PATH: &str = "./relay.toml";

/// Resolved server settings.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub json_logs: bool,
    pub generate_config: bool,
    pub name_policy: NamePolicy,
    pub ping_interval_secs: u64,
    pub pong_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 7070,
            bind_address: "0.0.0.0".to_string(),
            json_logs: false,
            generate_config: false,
            name_policy: NamePolicy::Overwrite,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
        }
    }
}

/// Server-initiated liveness check for idle connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (RELAY_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Cli::parse();
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        layered(Toml::file(&config_path), cli).extract()
    }

    /// Heartbeat settings, or `None` when pings are disabled.
    pub fn heartbeat(&self) -> Option<Heartbeat> {
        if self.ping_interval_secs == 0 {
            return None;
        }
        Some(Heartbeat {
            interval: Duration::from_secs(self.ping_interval_secs),
            timeout: Duration::from_secs(self.pong_timeout_secs.max(1)),
        })
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

fn layered(file: Data<Toml>, cli: Cli) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(file)
        .merge(Env::prefixed("RELAY_"))
        .merge(Serialized::defaults(cli))
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Chat Relay Server Configuration
# Place this file at ./relay.toml or specify with --config <path>
# All settings can be overridden via environment variables (RELAY_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 7070)
# port = 7070

# Bind address (default: 0.0.0.0 - all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# What to do when a name that is already online is claimed again:
#   "overwrite" - last registration wins (default)
#   "reject"    - the newcomer is told the name is taken
# name_policy = "overwrite"

# ---- Heartbeat ----
# Seconds between server pings; 0 disables idle-connection detection
# ping_interval_secs = 30

# Seconds to wait for the pong before closing the connection
# pong_timeout_secs = 10
"#
    .to_string()
}
