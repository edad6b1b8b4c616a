//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// HTTP/WebSocket binding address
    pub http_addr: SocketAddr,
    /// UDP game socket address
    pub udp_addr: SocketAddr,
    /// Whether to open the UDP socket at all
    pub udp_enabled: bool,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origin for CORS (comma-separated, `*` for any)
    pub client_origin: String,

    /// Shared secret the dedicated server presents on `/server`
    pub upstream_token: Option<String>,
    /// Reject clients that do not present a known session token
    pub require_session: bool,

    /// Connections silent for longer than this are torn down
    pub idle_timeout: Duration,
    /// WebSocket ping interval
    pub heartbeat_interval: Duration,
    /// How often the idle sweep runs
    pub sweep_interval: Duration,
    /// Sessions without a heartbeat for this long are dropped
    pub session_ttl: Duration,

    /// Upper bound on concurrent broadcast workers
    pub broadcast_workers: usize,
    /// Interest radius for UDP recipients, in meters
    pub interest_radius_m: f32,
    /// Spatial grid cell edge, in meters
    pub spatial_cell_m: f32,
    pub compress_broadcasts: bool,
    /// Payloads under this many bytes are never compressed
    pub compression_threshold: usize,

    /// UDP send and receive buffer size
    pub udp_socket_buffer_bytes: usize,
    /// Inputs per second allowed per connection
    pub input_rate_limit: u32,
    /// Idle snapshots kept by the pool
    pub snapshot_pool_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            udp_addr: SocketAddr::from(([0, 0, 0, 0], 7777)),
            udp_enabled: true,
            log_level: "info".to_string(),
            client_origin: "*".to_string(),
            upstream_token: None,
            require_session: false,
            idle_timeout: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(15),
            sweep_interval: Duration::from_secs(5),
            session_ttl: Duration::from_secs(300),
            broadcast_workers: 50,
            interest_radius_m: 300.0,
            spatial_cell_m: 100.0,
            compress_broadcasts: false,
            compression_threshold: 256,
            udp_socket_buffer_bytes: 4 * 1024 * 1024,
            input_rate_limit: 150,
            snapshot_pool_size: 256,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        // PORT (set by most hosting platforms) wins over HTTP_ADDR
        let http_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port.trim())
                .parse()
                .map_err(|_| ConfigError::InvalidAddress("PORT"))?,
            None => parse_addr(&lookup, "HTTP_ADDR", defaults.http_addr)?,
        };

        Ok(Self {
            http_addr,
            udp_addr: parse_addr(&lookup, "UDP_ADDR", defaults.udp_addr)?,
            udp_enabled: parse_bool(&lookup, "UDP_ENABLED", defaults.udp_enabled)?,
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            client_origin: lookup("CLIENT_ORIGIN").unwrap_or(defaults.client_origin),
            upstream_token: lookup("UPSTREAM_TOKEN").filter(|t| !t.is_empty()),
            require_session: parse_bool(&lookup, "REQUIRE_SESSION", defaults.require_session)?,
            idle_timeout: parse_secs(&lookup, "IDLE_TIMEOUT_SECS", defaults.idle_timeout)?,
            heartbeat_interval: parse_secs(
                &lookup,
                "HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            )?,
            sweep_interval: parse_secs(&lookup, "SWEEP_INTERVAL_SECS", defaults.sweep_interval)?,
            session_ttl: parse_secs(&lookup, "SESSION_TTL_SECS", defaults.session_ttl)?,
            broadcast_workers: parse_positive(
                &lookup,
                "BROADCAST_WORKERS",
                defaults.broadcast_workers,
            )?,
            interest_radius_m: parse(&lookup, "INTEREST_RADIUS_M", defaults.interest_radius_m)?,
            spatial_cell_m: parse(&lookup, "SPATIAL_CELL_M", defaults.spatial_cell_m)?,
            compress_broadcasts: parse_bool(
                &lookup,
                "COMPRESS_BROADCASTS",
                defaults.compress_broadcasts,
            )?,
            compression_threshold: parse(
                &lookup,
                "COMPRESSION_THRESHOLD",
                defaults.compression_threshold,
            )?,
            udp_socket_buffer_bytes: parse_positive(
                &lookup,
                "UDP_SOCKET_BUFFER_BYTES",
                defaults.udp_socket_buffer_bytes,
            )?,
            input_rate_limit: parse_positive(
                &lookup,
                "INPUT_RATE_LIMIT",
                defaults.input_rate_limit,
            )?,
            snapshot_pool_size: parse(&lookup, "SNAPSHOT_POOL_SIZE", defaults.snapshot_pool_size)?,
        })
    }
}

fn parse<T, F>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        None => Ok(default),
    }
}

fn parse_positive<T, F>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    F: Fn(&str) -> Option<String>,
{
    let value = parse(lookup, name, default)?;
    if value <= T::default() {
        return Err(ConfigError::Invalid(name));
    }
    Ok(value)
}

fn parse_secs<F>(lookup: &F, name: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: u64 = parse(lookup, name, default.as_secs())?;
    if secs == 0 {
        return Err(ConfigError::Invalid(name));
    }
    Ok(Duration::from_secs(secs))
}

fn parse_bool<F>(lookup: &F, name: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid(name)),
        },
    }
}

fn parse_addr<F>(
    lookup: &F,
    name: &'static str,
    default: SocketAddr,
) -> Result<SocketAddr, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(name)),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid socket address in {0}")]
    InvalidAddress(&'static str),
}
