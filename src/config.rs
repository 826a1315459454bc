use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "sudoroot",
    about = "Membership-gated writeups server with tiered chat"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create (or reset the password of) an admin account
    CreateAdmin { username: String, password: String },
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub cache: CacheConfig,
    pub stream: StreamConfig,
    pub membership: MembershipConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub cookie_name: String,
    pub admin_cookie_name: String,
    pub session_hours: u64,
    pub admin_session_hours: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CacheConfig {
    /// Self-hosted Redis, tried first on every call.
    pub redis_url: Option<String>,
    /// Hosted Redis REST endpoint used when the primary fails.
    pub rest_url: Option<String>,
    pub rest_token: Option<String>,
    pub primary_timeout_ms: u64,
    pub fallback_timeout_ms: u64,
    pub retry_primary_after_secs: u64,
    pub max_len: usize,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct StreamConfig {
    pub poll_interval_ms: u64,
    pub max_lifetime_secs: u64,
    pub batch_size: usize,
    pub reconnect_delay_ms: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct MembershipConfig {
    pub webhook_secret: Option<String>,
    pub api_key: Option<String>,
    pub sweep_interval_secs: u64,
    pub paid_days: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: "user_session".to_string(),
            admin_cookie_name: "admin_session".to_string(),
            session_hours: 24,
            admin_session_hours: 24,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            rest_url: None,
            rest_token: None,
            primary_timeout_ms: 3000,
            fallback_timeout_ms: 5000,
            retry_primary_after_secs: 30,
            max_len: 100,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            max_lifetime_secs: 300,
            batch_size: 5,
            reconnect_delay_ms: 3000,
        }
    }
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            webhook_secret: None,
            api_key: None,
            sweep_interval_secs: 3600,
            paid_days: 29,
        }
    }
}

impl CacheConfig {
    pub fn primary_timeout(&self) -> Duration {
        Duration::from_millis(self.primary_timeout_ms)
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_timeout_ms)
    }

    pub fn retry_primary_after(&self) -> Duration {
        Duration::from_secs(self.retry_primary_after_secs)
    }
}

impl StreamConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }

        if config.database.path.is_none() {
            config.database.path = Some(data_dir.join("sudoroot.db"));
        }

        Ok(config)
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".sudoroot")
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("sudoroot.db"))
    }
}
