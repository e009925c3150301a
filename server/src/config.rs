use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ws::actor::KeepAlive;
use crate::ws::HubSettings;

/// Social network messaging server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "social-server", version, about = "Social network messaging server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "SOCIAL_PORT", default_value = "8080")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "SOCIAL_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./social.toml")]
    pub config: String,

    /// Enable structured JSON logging
    #[arg(long, env = "SOCIAL_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for the database and stored images
    #[arg(long, env = "SOCIAL_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Live connection tuning (loaded from [realtime] section in TOML)
    #[arg(skip)]
    #[serde(default, skip_serializing)]
    pub realtime: RealtimeConfig,

    /// Upload limits (loaded from [uploads] section in TOML)
    #[arg(skip)]
    #[serde(default, skip_serializing)]
    pub uploads: UploadsConfig,
}

/// Configuration for WebSocket connections and fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Upper bound for a single write to one connection (default: 2000)
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Frames buffered per connection before writes start waiting (default: 64)
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,

    /// Seconds between server pings (default: 30)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before closing (default: 10)
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: 2000,
            outbound_queue: 64,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
        }
    }
}

impl RealtimeConfig {
    pub fn hub_settings(&self) -> HubSettings {
        HubSettings {
            write_timeout: Duration::from_millis(self.write_timeout_ms.max(1)),
            outbound_queue: self.outbound_queue.max(1),
        }
    }

    pub fn keepalive(&self) -> KeepAlive {
        KeepAlive {
            ping_interval: Duration::from_secs(self.ping_interval_secs.max(1)),
            pong_timeout: Duration::from_secs(self.pong_timeout_secs.max(1)),
        }
    }
}

fn default_write_timeout_ms() -> u64 {
    2000
}

fn default_outbound_queue() -> usize {
    64
}

fn default_ping_interval() -> u64 {
    30
}

fn default_pong_timeout() -> u64 {
    10
}

/// Limits for uploaded message images.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadsConfig {
    /// Largest accepted image in bytes (default: 4 MiB)
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: default_max_image_bytes(),
        }
    }
}

fn default_max_image_bytes() -> usize {
    4 * 1024 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            config: "./social.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            realtime: RealtimeConfig::default(),
            uploads: UploadsConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (SOCIAL_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        Self::figment(cli).extract()
    }

    fn figment(cli: Config) -> Figment {
        let config_path = cli.config.clone();
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("SOCIAL_").split("__"))
            .merge(Serialized::defaults(cli))
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Social network messaging server configuration
# Place this file at ./social.toml or specify with --config <path>
# All settings can be overridden via environment variables (SOCIAL_PORT,
# SOCIAL_REALTIME__WRITE_TIMEOUT_MS, etc.) or CLI flags (--port, etc.)

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging
# json_logs = false

# Data directory for the SQLite database and message images
# data_dir = "./data"

# ---- Live connections ----
# [realtime]

# Upper bound in milliseconds for one write to one connection.
# A connection that cannot accept a frame in time is dropped.
# write_timeout_ms = 2000

# Frames buffered per connection
# outbound_queue = 64

# Keepalive: ping cadence and how long to wait for the pong
# ping_interval_secs = 30
# pong_timeout_secs = 10

# ---- Uploads ----
# [uploads]

# Largest accepted message image in bytes (default: 4 MiB)
# max_image_bytes = 4194304
"#
    .to_string()
}
