//! Configuration for the relay server.
//!
//! Sources, lowest to highest precedence:
//! 1. built-in defaults,
//! 2. an optional TOML file (`--config relay.toml`),
//! 3. environment variables,
//! 4. command-line flags.
//!
//! Environment variables:
//!
//! - `RELAY_BIND_ADDR`         (default: "0.0.0.0")
//! - `RELAY_PORT`              (default: "7000")
//! - `RELAY_MAX_CLIENTS`       (default: "1024")
//! - `RELAY_QUEUE_CAPACITY`    (default: "256")
//! - `RELAY_EVICT_AFTER_DROPS` (default: unset, slow consumers are tolerated)
//! - `RELAY_TRANSPORT`         (default: "ws", or "tcp")
//! - `RELAY_WS_PATH`           (default: "/ws")
//! - `RELAY_MAX_FRAME_LEN`     (default: "1048576")
//! - `RELAY_LOG`               (default: "info")

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::Parser;
use relay_core::BackpressurePolicy;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidEnv {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("ws_path must start with '/' and differ from /health, got {0:?}")]
    InvalidWsPath(String),

    #[error("{0} must be at least 1")]
    Zero(&'static str),
}

/// Which framing the listener speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// HTTP server with a WebSocket upgrade endpoint.
    Ws,
    /// Raw TCP with u32 big-endian length-prefixed frames.
    Tcp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Ws => f.write_str("ws"),
            TransportKind::Tcp => f.write_str("tcp"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ws" | "websocket" => Ok(TransportKind::Ws),
            "tcp" => Ok(TransportKind::Tcp),
            other => Err(format!("unknown transport {other:?} (expected ws or tcp)")),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// IP address / interface to bind to (e.g. "0.0.0.0" or "127.0.0.1").
    pub bind_addr: String,

    /// Port to listen on. `0` lets the OS pick one.
    pub port: u16,

    /// Maximum number of simultaneously connected clients.
    pub max_clients: usize,

    /// Outbound queue capacity per connection.
    pub queue_capacity: usize,

    /// Evict a connection after this many consecutive dropped messages.
    pub evict_after_drops: Option<u32>,

    pub transport: TransportKind,

    /// Path of the WebSocket upgrade endpoint.
    pub ws_path: String,

    /// Largest TCP frame accepted or sent, in bytes.
    pub max_frame_len: usize,

    /// Default `tracing` filter when `RUST_LOG` is not set.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: "0.0.0.0".to_string(),
            port: 7000,
            max_clients: 1024,
            queue_capacity: relay_core::DEFAULT_QUEUE_CAPACITY,
            evict_after_drops: None,
            transport: TransportKind::Ws,
            ws_path: "/ws".to_string(),
            max_frame_len: 1024 * 1024,
            log_level: "info".to_string(),
        }
    }
}

/// Command-line flags. Anything left out falls back to env / file / defaults.
#[derive(Debug, Default, Parser)]
#[command(name = "relay-server")]
#[command(about = "Single-room message relay over WebSocket or TCP")]
pub struct Cli {
    /// TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Maximum concurrent clients
    #[arg(long)]
    pub max_clients: Option<usize>,

    /// Outbound queue capacity per connection
    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// Evict a client after this many consecutive dropped messages
    #[arg(long)]
    pub evict_after_drops: Option<u32>,

    /// Transport to serve
    #[arg(short, long, value_enum)]
    pub transport: Option<TransportKind>,

    /// WebSocket endpoint path
    #[arg(long)]
    pub ws_path: Option<String>,

    /// Largest frame accepted or sent, in bytes
    #[arg(long)]
    pub max_frame_len: Option<usize>,

    /// Default log filter (RUST_LOG wins)
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Config {
    /// Build the effective configuration from all sources.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env()?;
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields with any `RELAY_*` variables that are set.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(addr) = env::var("RELAY_BIND_ADDR") {
            self.bind_addr = addr;
        }
        read_env_into("RELAY_PORT", &mut self.port)?;
        read_env_into("RELAY_MAX_CLIENTS", &mut self.max_clients)?;
        read_env_into("RELAY_QUEUE_CAPACITY", &mut self.queue_capacity)?;
        if let Some(n) = read_env::<u32>("RELAY_EVICT_AFTER_DROPS")? {
            self.evict_after_drops = Some(n);
        }
        read_env_into("RELAY_TRANSPORT", &mut self.transport)?;
        if let Ok(path) = env::var("RELAY_WS_PATH") {
            self.ws_path = path;
        }
        read_env_into("RELAY_MAX_FRAME_LEN", &mut self.max_frame_len)?;
        if let Ok(level) = env::var("RELAY_LOG") {
            self.log_level = level;
        }
        Ok(())
    }

    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(bind) = &cli.bind {
            self.bind_addr = bind.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(n) = cli.max_clients {
            self.max_clients = n;
        }
        if let Some(n) = cli.queue_capacity {
            self.queue_capacity = n;
        }
        if let Some(n) = cli.evict_after_drops {
            self.evict_after_drops = Some(n);
        }
        if let Some(t) = cli.transport {
            self.transport = t;
        }
        if let Some(path) = &cli.ws_path {
            self.ws_path = path.clone();
        }
        if let Some(n) = cli.max_frame_len {
            self.max_frame_len = n;
        }
        if let Some(level) = &cli.log_level {
            self.log_level = level.clone();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.ws_path.starts_with('/') || self.ws_path == "/health" {
            return Err(ConfigError::InvalidWsPath(self.ws_path.clone()));
        }
        if self.max_clients == 0 {
            return Err(ConfigError::Zero("max_clients"));
        }
        if self.max_frame_len == 0 {
            return Err(ConfigError::Zero("max_frame_len"));
        }
        Ok(())
    }

    /// Convenience: `addr:port` socket string.
    pub fn socket_addr_string(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    pub fn backpressure(&self) -> BackpressurePolicy {
        BackpressurePolicy::new(self.queue_capacity, self.evict_after_drops)
    }
}

fn read_env<T>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(val) => val
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnv {
                key,
                value: val,
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

fn read_env_into<T>(key: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    if let Some(v) = read_env(key)? {
        *slot = v;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn file_values_override_defaults_and_keep_the_rest() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            "port = 9100\ntransport = \"tcp\"\nevict_after_drops = 5\nqueue_capacity = 32"
        )
        .expect("write");

        let config = Config::from_file(file.path()).expect("valid toml");

        assert_eq!(config.port, 9100);
        assert_eq!(config.transport, TransportKind::Tcp);
        assert_eq!(config.evict_after_drops, Some(5));
        assert_eq!(config.bind_addr, "0.0.0.0");
        assert_eq!(config.ws_path, "/ws");
        assert_eq!(config.backpressure(), BackpressurePolicy::new(32, Some(5)));
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "prot = 1").expect("write");

        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn cli_flags_win() {
        let cli = Cli::parse_from([
            "relay-server",
            "--port",
            "0",
            "--transport",
            "tcp",
            "--evict-after-drops",
            "3",
            "--ws-path",
            "/chat",
            "--max-frame-len",
            "4096",
        ]);
        let mut config = Config::default();
        config.apply_cli(&cli);

        assert_eq!(config.port, 0);
        assert_eq!(config.transport, TransportKind::Tcp);
        assert_eq!(config.evict_after_drops, Some(3));
        assert_eq!(config.ws_path, "/chat");
        assert_eq!(config.max_frame_len, 4096);
        assert_eq!(config.max_clients, 1024);
    }

    #[test]
    fn ws_path_must_be_absolute() {
        let config = Config {
            ws_path: "ws".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidWsPath(_))));
    }

    #[test]
    fn zero_max_clients_is_rejected() {
        let config = Config {
            max_clients: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Zero("max_clients"))));
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn transport_parses_case_insensitively() {
        assert_eq!("WS".parse::<TransportKind>(), Ok(TransportKind::Ws));
        assert_eq!("tcp".parse::<TransportKind>(), Ok(TransportKind::Tcp));
        assert!("udp".parse::<TransportKind>().is_err());
    }
}
