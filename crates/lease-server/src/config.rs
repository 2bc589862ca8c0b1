//! Configuration for the lease server.

use crate::error::LeaseError;
use address_space::AddressRange;
use anyhow::{bail, Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Listener and client authentication
    #[serde(default)]
    pub server: ServerConfig,

    /// Address range to lease from
    #[serde(default)]
    pub lease: LeaseConfig,

    /// Lease store location
    #[serde(default)]
    pub store: StoreConfig,

    /// cjdns admin interface
    #[serde(default)]
    pub tunnel: TunnelConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Shared secret clients must present
    #[serde(default)]
    pub password: Option<SecretString>,

    /// How long to wait for a client's request line
    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,

    /// Largest accepted request payload
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaseConfig {
    /// First address of the range (seeds the cursor, never issued)
    #[serde(default = "default_range_start")]
    pub range_start: String,

    /// Last issuable address
    #[serde(default = "default_range_end")]
    pub range_end: String,

    /// CIDR block to lease from; overrides range_start/range_end
    #[serde(default)]
    pub cidr: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Lease database directory
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Enable persistence (if false, leases are in-memory only)
    #[serde(default = "default_true")]
    pub persist: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TunnelConfig {
    /// cjdns admin address
    #[serde(default = "default_admin_addr")]
    pub admin_addr: String,

    /// cjdns admin port
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,

    /// cjdns admin password
    #[serde(default)]
    pub admin_password: Option<SecretString>,

    /// This node's public key, handed to clients so they can connect
    #[serde(default)]
    pub public_key: Option<String>,

    /// Prefix length announced with each tunnel address
    #[serde(default)]
    pub prefix: u8,

    /// Admin call timeout
    #[serde(default = "default_admin_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Global requests per minute
    #[serde(default = "default_global_rpm")]
    pub per_minute: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "plain" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default implementations
impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_port(),
            password: None,
            read_timeout: default_read_timeout(),
            max_request_bytes: default_max_request_bytes(),
        }
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            range_start: default_range_start(),
            range_end: default_range_end(),
            cidr: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            persist: true,
        }
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            admin_addr: default_admin_addr(),
            admin_port: default_admin_port(),
            admin_password: None,
            public_key: None,
            prefix: 0,
            timeout: default_admin_timeout(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: default_global_rpm(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_listen_addr() -> String {
    "::".into()
}

fn default_port() -> u16 {
    4132
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_request_bytes() -> usize {
    64 * 1024
}

fn default_range_start() -> String {
    "2a03:b0c0:2:d0::1c0:f000".into()
}

fn default_range_end() -> String {
    "2a03:b0c0:2:d0::1c0:f00f".into()
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./db")
}

fn default_true() -> bool {
    true
}

fn default_admin_addr() -> String {
    "127.0.0.1".into()
}

fn default_admin_port() -> u16 {
    11234
}

fn default_admin_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_global_rpm() -> u32 {
    600
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "plain".into()
}

impl LeaseConfig {
    /// The configured allocation range.
    pub fn range(&self) -> Result<AddressRange, LeaseError> {
        let range = match &self.cidr {
            Some(cidr) => AddressRange::from_cidr(cidr)?,
            None => AddressRange::parse(&self.range_start, &self.range_end)?,
        };
        Ok(range)
    }
}

impl ServerConfig {
    /// Socket address to listen on.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .listen_addr
            .parse()
            .with_context(|| format!("Invalid listen address: {}", self.listen_addr))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl TunnelConfig {
    /// Socket address of the cjdns admin interface.
    pub fn admin_socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .admin_addr
            .parse()
            .with_context(|| format!("Invalid cjdns admin address: {}", self.admin_addr))?;
        Ok(SocketAddr::new(ip, self.admin_port))
    }
}

impl Config {
    /// Load configuration from an optional `lease-server` file and the environment.
    ///
    /// Environment variables override the file, using `__` between section
    /// and key (`SERVER__PASSWORD`, `LEASE__CIDR`, ...).
    pub fn load() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("lease-server").required(false))
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(false),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the server cannot start with.
    pub fn validate(&self) -> Result<()> {
        match &self.server.password {
            Some(p) if !p.expose_secret().is_empty() => {}
            _ => bail!("server.password must be set"),
        }

        self.lease
            .range()
            .context("Invalid lease range configuration")?;
        self.server.socket_addr()?;
        self.tunnel.admin_socket_addr()?;

        match self.log.format.as_str() {
            "plain" | "json" => Ok(()),
            other => bail!("Unknown log format: {}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_from(json: &str) -> Config {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = config_from("{}");

        assert_eq!(config.server.port, 4132);
        assert_eq!(config.server.read_timeout, Duration::from_secs(10));
        assert_eq!(config.tunnel.admin_port, 11234);
        assert!(config.store.persist);
        assert_eq!(config.log.level, "info");

        let range = config.lease.range().unwrap();
        assert_eq!(
            range.start().to_string(),
            "2a03:b0c0:0002:00d0:0000:0000:01c0:f000"
        );
        assert_eq!(
            range.end().to_string(),
            "2a03:b0c0:0002:00d0:0000:0000:01c0:f00f"
        );
    }

    #[test]
    fn test_password_required() {
        let config = config_from("{}");
        assert!(config.validate().is_err());

        let config = config_from(r#"{"server": {"password": ""}}"#);
        assert!(config.validate().is_err());

        let config = config_from(r#"{"server": {"password": "testPassword"}}"#);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cidr_overrides_bounds() {
        let config = config_from(r#"{"lease": {"cidr": "fc00::/120"}}"#);
        let range = config.lease.range().unwrap();
        assert_eq!(range.end().to_string(), "fc00:0000:0000:0000:0000:0000:0000:00ff");
    }

    #[test]
    fn test_invalid_range_is_rejected() {
        let config = config_from(
            r#"{"server": {"password": "x"}, "lease": {"range_start": "::2", "range_end": "::1"}}"#,
        );
        assert!(config.validate().is_err());
        assert!(matches!(
            config.lease.range(),
            Err(LeaseError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_humantime_durations() {
        let json = r#"{"server": {"read_timeout": "250ms"}, "tunnel": {"timeout": "1m"}}"#;
        let config = config_from(json);
        assert_eq!(config.server.read_timeout, Duration::from_millis(250));
        assert_eq!(config.tunnel.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_socket_addrs() {
        let config = config_from(r#"{"server": {"listen_addr": "127.0.0.1", "port": 9000}}"#);
        assert_eq!(
            config.server.socket_addr().unwrap(),
            "127.0.0.1:9000".parse().unwrap()
        );
        assert_eq!(
            config.tunnel.admin_socket_addr().unwrap(),
            "127.0.0.1:11234".parse().unwrap()
        );

        let config = config_from(r#"{"server": {"listen_addr": "localhost"}}"#);
        assert!(config.server.socket_addr().is_err());
    }
}
