//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "community-node";
const ENV_PREFIX: &str = "COMMUNITY_NODE";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8003;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_UPSTREAM_URL: &str = "http://127.0.0.1:8001";
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;
const DEFAULT_UPSTREAM_MAX_CONNECTIONS: u64 = 100;
const DEFAULT_UPSTREAM_MAX_IDLE_CONNECTIONS: usize = 20;
const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
const DEFAULT_REDIS_POOL_SIZE: u64 = 20;
const DEFAULT_REFRESH_CONCURRENCY: u64 = 16;
const DEFAULT_PUBLIC_URL: &str = "http://localhost:8003";
const DEFAULT_NODE_NAME: &str = "Community Node";
const DEFAULT_NODE_TAG: &str = "Community";
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;
const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 1;
const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u64 = 100;
const DEFAULT_ALLOWED_ORIGINS: [&str; 4] = [
    "http://localhost:5173",
    "http://127.0.0.1:5173",
    "https://sos.info.vn",
    "https://www.sos.info.vn",
];

/// Command-line arguments for the community node binary.
#[derive(Debug, Parser)]
#[command(
    name = "community-node",
    version,
    about = "Caching community node for the SOS registry"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "COMMUNITY_NODE_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    /// Overrides used when no subcommand is given.
    #[command(flatten)]
    pub serve: ServeArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the caching gateway and the registration heartbeat.
    Serve(Box<ServeArgs>),
    /// Resolve and validate the configuration, then exit.
    #[command(name = "check-config")]
    CheckConfig(ServeArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct NodeOverrides {
    /// Public URL this node advertises to the registry.
    #[arg(long = "node-public-url", env = "MY_URL", value_name = "URL")]
    pub public_url: Option<String>,

    /// Display name sent with every registration.
    #[arg(long = "node-name", env = "NODE_NAME", value_name = "NAME")]
    pub name: Option<String>,

    #[arg(long = "contact-zalo", env = "CONTACT_ZALO", value_name = "VALUE")]
    pub zalo: Option<String>,

    #[arg(long = "contact-phone", env = "CONTACT_PHONE", value_name = "VALUE")]
    pub phone: Option<String>,

    #[arg(long = "contact-email", env = "CONTACT_EMAIL", value_name = "VALUE")]
    pub email: Option<String>,

    #[arg(long = "contact-name", env = "CONTACT_NAME", value_name = "VALUE")]
    pub contact_name: Option<String>,

    #[arg(long = "contact-facebook", env = "CONTACT_FB", value_name = "VALUE")]
    pub facebook: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub node: NodeOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the registry base URL.
    #[arg(long = "upstream-base-url", env = "REGISTRY_URL", value_name = "URL")]
    pub upstream_base_url: Option<String>,

    /// Override the registry request timeout.
    #[arg(long = "upstream-timeout-seconds", value_name = "SECONDS")]
    pub upstream_timeout_seconds: Option<u64>,

    /// Override the ceiling on simultaneous registry requests.
    #[arg(long = "upstream-max-connections", value_name = "COUNT")]
    pub upstream_max_connections: Option<u64>,

    /// Select the cache backend (redis|memory).
    #[arg(long = "cache-backend", value_name = "BACKEND")]
    pub cache_backend: Option<String>,

    /// Override the Redis connection URL.
    #[arg(long = "cache-redis-url", env = "REDIS_URL", value_name = "URL")]
    pub cache_redis_url: Option<String>,

    /// Override the Redis pool size.
    #[arg(long = "cache-pool-size", value_name = "COUNT")]
    pub cache_pool_size: Option<u64>,

    /// Override the number of background refreshes allowed to run at once.
    #[arg(long = "cache-refresh-concurrency", value_name = "COUNT")]
    pub cache_refresh_concurrency: Option<u64>,

    /// Enable or disable the registration heartbeat.
    #[arg(
        long = "heartbeat-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub heartbeat_enabled: Option<bool>,

    /// Override the heartbeat period.
    #[arg(long = "heartbeat-interval-seconds", value_name = "SECONDS")]
    pub heartbeat_interval_seconds: Option<u64>,

    /// Override the rate limit window size.
    #[arg(long = "rate-limit-window-seconds", value_name = "SECONDS")]
    pub rate_limit_window_seconds: Option<u64>,

    /// Override the rate limit request ceiling.
    #[arg(long = "rate-limit-max-requests", value_name = "COUNT")]
    pub rate_limit_max_requests: Option<u64>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub upstream: UpstreamSettings,
    pub cache: CacheSettings,
    pub node: NodeSettings,
    pub heartbeat: HeartbeatSettings,
    pub rate_limit: RateLimitSettings,
    pub cors: CorsSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub base_url: Url,
    pub timeout: Duration,
    pub max_connections: NonZeroU32,
    pub max_idle_connections: usize,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: CacheBackend,
    pub refresh_concurrency: NonZeroU32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    Redis { url: String, pool_size: NonZeroU32 },
    Memory,
}

#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub public_url: Url,
    pub name: String,
    pub tag: String,
    pub zalo: String,
    pub phone: String,
    pub email: String,
    pub contact_name: String,
    pub facebook: String,
}

#[derive(Debug, Clone)]
pub struct HeartbeatSettings {
    pub enabled: bool,
    pub interval: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub window_seconds: NonZeroU32,
    pub max_requests: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct CorsSettings {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

impl CliArgs {
    /// The subcommand to run; bare invocations serve with the top-level overrides.
    pub fn into_command(self) -> Command {
        match self.command {
            Some(command) => command,
            None => Command::Serve(Box::new(self.serve)),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("cors.allowed_origins"),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::CheckConfig(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&cli.serve.overrides),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    upstream: RawUpstreamSettings,
    cache: RawCacheSettings,
    node: RawNodeSettings,
    heartbeat: RawHeartbeatSettings,
    rate_limit: RawRateLimitSettings,
    cors: RawCorsSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.upstream_base_url.as_ref() {
            self.upstream.base_url = Some(url.clone());
        }
        if let Some(seconds) = overrides.upstream_timeout_seconds {
            self.upstream.timeout_seconds = Some(seconds);
        }
        if let Some(max) = overrides.upstream_max_connections {
            self.upstream.max_connections = Some(max);
        }
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(url) = overrides.cache_redis_url.as_ref() {
            self.cache.redis_url = Some(url.clone());
        }
        if let Some(size) = overrides.cache_pool_size {
            self.cache.pool_size = Some(size);
        }
        if let Some(value) = overrides.cache_refresh_concurrency {
            self.cache.refresh_concurrency = Some(value);
        }
        if let Some(enabled) = overrides.heartbeat_enabled {
            self.heartbeat.enabled = Some(enabled);
        }
        if let Some(seconds) = overrides.heartbeat_interval_seconds {
            self.heartbeat.interval_seconds = Some(seconds);
        }
        if let Some(window) = overrides.rate_limit_window_seconds {
            self.rate_limit.window_seconds = Some(window);
        }
        if let Some(max) = overrides.rate_limit_max_requests {
            self.rate_limit.max_requests = Some(max);
        }

        self.apply_node_overrides(&overrides.node);
    }

    fn apply_node_overrides(&mut self, overrides: &NodeOverrides) {
        let node = &mut self.node;
        for (target, value) in [
            (&mut node.public_url, &overrides.public_url),
            (&mut node.name, &overrides.name),
            (&mut node.zalo, &overrides.zalo),
            (&mut node.phone, &overrides.phone),
            (&mut node.email, &overrides.email),
            (&mut node.contact_name, &overrides.contact_name),
            (&mut node.facebook, &overrides.facebook),
        ] {
            if let Some(value) = value.as_ref() {
                *target = Some(value.clone());
            }
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            upstream,
            cache,
            node,
            heartbeat,
            rate_limit,
            cors,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let upstream = build_upstream_settings(upstream)?;
        let cache = build_cache_settings(cache)?;
        let node = build_node_settings(node)?;
        let heartbeat = build_heartbeat_settings(heartbeat)?;
        let rate_limit = build_rate_limit_settings(rate_limit)?;
        let cors = build_cors_settings(cors)?;

        Ok(Self {
            server,
            logging,
            upstream,
            cache,
            node,
            heartbeat,
            rate_limit,
            cors,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr =
        parse_socket_addr(&host, port).map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_upstream_settings(upstream: RawUpstreamSettings) -> Result<UpstreamSettings, LoadError> {
    let base_url = parse_http_url(
        upstream.base_url.as_deref().unwrap_or(DEFAULT_UPSTREAM_URL),
        "upstream.base_url",
    )?;

    let timeout = non_zero_seconds(
        upstream
            .timeout_seconds
            .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS),
        "upstream.timeout_seconds",
    )?;

    let max_connections = non_zero_u32(
        upstream
            .max_connections
            .unwrap_or(DEFAULT_UPSTREAM_MAX_CONNECTIONS),
        "upstream.max_connections",
    )?;

    Ok(UpstreamSettings {
        base_url,
        timeout,
        max_connections,
        max_idle_connections: upstream
            .max_idle_connections
            .unwrap_or(DEFAULT_UPSTREAM_MAX_IDLE_CONNECTIONS),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let refresh_concurrency = non_zero_u32(
        cache
            .refresh_concurrency
            .unwrap_or(DEFAULT_REFRESH_CONCURRENCY),
        "cache.refresh_concurrency",
    )?;

    let backend = match cache.backend.as_deref().map(str::trim) {
        None | Some("redis") => {
            let url = cache
                .redis_url
                .map(|value| value.trim().to_string())
                .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());
            if !(url.starts_with("redis://") || url.starts_with("rediss://")) {
                return Err(LoadError::invalid(
                    "cache.redis_url",
                    format!("`{url}` is not a redis:// or rediss:// URL"),
                ));
            }
            let pool_size = non_zero_u32(
                cache.pool_size.unwrap_or(DEFAULT_REDIS_POOL_SIZE),
                "cache.pool_size",
            )?;
            CacheBackend::Redis { url, pool_size }
        }
        Some("memory") => CacheBackend::Memory,
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.backend",
                format!("unknown backend `{other}` (expected redis or memory)"),
            ));
        }
    };

    Ok(CacheSettings {
        backend,
        refresh_concurrency,
    })
}

fn build_node_settings(node: RawNodeSettings) -> Result<NodeSettings, LoadError> {
    let public_url = parse_http_url(
        node.public_url.as_deref().unwrap_or(DEFAULT_PUBLIC_URL),
        "node.public_url",
    )?;

    let name = node
        .name
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_NODE_NAME.to_string());

    Ok(NodeSettings {
        public_url,
        name,
        tag: node.tag.unwrap_or_else(|| DEFAULT_NODE_TAG.to_string()),
        zalo: node.zalo.unwrap_or_default(),
        phone: node.phone.unwrap_or_default(),
        email: node.email.unwrap_or_default(),
        contact_name: node.contact_name.unwrap_or_default(),
        facebook: node.facebook.unwrap_or_default(),
    })
}

fn build_heartbeat_settings(
    heartbeat: RawHeartbeatSettings,
) -> Result<HeartbeatSettings, LoadError> {
    Ok(HeartbeatSettings {
        enabled: heartbeat.enabled.unwrap_or(true),
        interval: non_zero_seconds(
            heartbeat
                .interval_seconds
                .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            "heartbeat.interval_seconds",
        )?,
        timeout: non_zero_seconds(
            heartbeat
                .timeout_seconds
                .unwrap_or(DEFAULT_HEARTBEAT_TIMEOUT_SECS),
            "heartbeat.timeout_seconds",
        )?,
    })
}

fn build_rate_limit_settings(
    rate_limit: RawRateLimitSettings,
) -> Result<RateLimitSettings, LoadError> {
    let window_seconds_val = rate_limit
        .window_seconds
        .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_SECS);
    let window_seconds = non_zero_u32(window_seconds_val, "rate_limit.window_seconds")?;

    let max_requests_val = rate_limit
        .max_requests
        .unwrap_or(DEFAULT_RATE_LIMIT_MAX_REQUESTS);
    let max_requests = non_zero_u32(max_requests_val, "rate_limit.max_requests")?;

    Ok(RateLimitSettings {
        window_seconds,
        max_requests,
    })
}

fn build_cors_settings(cors: RawCorsSettings) -> Result<CorsSettings, LoadError> {
    let allowed_origins = match cors.allowed_origins {
        Some(origins) => origins
            .into_iter()
            .map(|origin| origin.trim().trim_end_matches('/').to_string())
            .filter(|origin| !origin.is_empty())
            .collect::<Vec<_>>(),
        None => DEFAULT_ALLOWED_ORIGINS
            .iter()
            .map(|origin| origin.to_string())
            .collect(),
    };

    for origin in &allowed_origins {
        parse_http_url(origin, "cors.allowed_origins")?;
    }

    Ok(CorsSettings { allowed_origins })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUpstreamSettings {
    base_url: Option<String>,
    timeout_seconds: Option<u64>,
    max_connections: Option<u64>,
    max_idle_connections: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    backend: Option<String>,
    redis_url: Option<String>,
    pool_size: Option<u64>,
    refresh_concurrency: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawNodeSettings {
    public_url: Option<String>,
    name: Option<String>,
    tag: Option<String>,
    zalo: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    contact_name: Option<String>,
    facebook: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHeartbeatSettings {
    enabled: Option<bool>,
    interval_seconds: Option<u64>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRateLimitSettings {
    window_seconds: Option<u64>,
    max_requests: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCorsSettings {
    allowed_origins: Option<Vec<String>>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_http_url(value: &str, key: &'static str) -> Result<Url, LoadError> {
    let url = Url::parse(value.trim())
        .map_err(|err| LoadError::invalid(key, format!("invalid URL `{value}`: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(LoadError::invalid(
            key,
            format!("unsupported scheme `{scheme}` (expected http or https)"),
        )),
    }
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_seconds(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
