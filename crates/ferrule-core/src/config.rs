//! Server and client configuration
//!
//! Resolved once (defaults, TOML file or environment) and treated as
//! immutable afterwards.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default message cap: 8 MiB
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive usable in an `EnvFilter`
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(Error::InvalidConfig(format!("unknown log level: {other}"))),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Service name reported in activity events
    pub name: Option<String>,
    /// Host to bind to
    pub host: String,
    /// Port to bind to; 0 picks an ephemeral port
    pub port: u16,
    pub log_level: LogLevel,
    /// Open-connection cap; `None` means unbounded
    pub max_connections: Option<usize>,
    /// Number of runtime worker threads
    pub workers: usize,
    /// Largest message the assembler will buffer before answering 413
    pub max_message_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: None,
            host: "127.0.0.1".to_string(),
            port: 9090,
            log_level: LogLevel::Info,
            max_connections: None,
            workers: num_cpus::get(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn max_message_bytes(mut self, bytes: usize) -> Self {
        self.max_message_bytes = bytes;
        self
    }

    /// Parse and validate TOML
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ServerConfig =
            toml::from_str(content).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Defaults overlaid with `APP_NAME`, `HOST`, `PORT`, `LOG_LEVEL` and `MAX_CONNECTIONS`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`ServerConfig::from_env`] with an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(name) = lookup("APP_NAME").filter(|n| !n.is_empty()) {
            config.name = Some(name);
        }
        if let Some(host) = lookup("HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("PORT") {
            config.port = port
                .trim()
                .parse()
                .map_err(|_| Error::InvalidConfig(format!("PORT is not a valid port: {port}")))?;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = level.parse()?;
        }
        if let Some(max) = lookup("MAX_CONNECTIONS") {
            config.max_connections = Some(max.trim().parse().map_err(|_| {
                Error::InvalidConfig(format!("MAX_CONNECTIONS is not a number: {max}"))
            })?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::InvalidConfig("host must not be empty".to_string()));
        }
        if self.max_connections == Some(0) {
            return Err(Error::InvalidConfig(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(Error::InvalidConfig("workers must be at least 1".to_string()));
        }
        if self.max_message_bytes == 0 {
            return Err(Error::InvalidConfig(
                "max_message_bytes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// `host:port`
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn service_name(&self) -> &str {
        self.name.as_deref().unwrap_or(crate::activity::UNNAMED_SERVICE)
    }

    /// Environment variable holding this service's API key: `<NAME>_API_KEY`
    pub fn api_key_symbol(&self) -> Result<String> {
        let name = self
            .name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| Error::Misconfigured("service name is not set".to_string()))?;
        let stem: String = name
            .trim()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        Ok(format!("{stem}_API_KEY"))
    }
}

/// Outbound client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Deadline for a whole request/response exchange
    pub timeout: Duration,
    /// How often the caller checks the shared result slot
    pub poll_interval: Duration,
    /// Largest response the client will buffer
    pub max_message_bytes: usize,
    pub tls: Option<ClientTlsConfig>,
}

/// Pinned-TLS settings; names are resolved by a material provider
#[derive(Debug, Clone)]
pub struct ClientTlsConfig {
    /// Directory searched for `<name>.pem`
    pub material_dir: PathBuf,
    /// Name of the pinned CA certificate
    pub ca: String,
    /// Name of the client identity (certificate chain plus key), if any
    pub identity: Option<String>,
    /// Server name to verify; defaults to `host`
    pub server_name: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9090,
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            tls: None,
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn tls(mut self, tls: ClientTlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Value sent in the `Host` header
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
