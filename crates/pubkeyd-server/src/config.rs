use pubkeyd_core::{KeyCacheConfig, RefreshConfig};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Identity directory (OneLogin) access
    #[serde(default)]
    pub onelogin: OneLoginConfig,
    #[serde(default)]
    pub refresh: RefreshSettings,
    /// Public key source (GitHub) and key cache
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.request_timeout_ms == 0 {
            return Err("server.request_timeout_ms must be > 0".into());
        }
        // Directory validations
        if self.onelogin.client_id.trim().is_empty() || self.onelogin.client_secret.trim().is_empty()
        {
            return Err("onelogin.client_id and onelogin.client_secret are required".into());
        }
        if self.onelogin.shard.trim().is_empty() && self.onelogin.base_url.is_none() {
            return Err("onelogin.shard must not be empty".into());
        }
        if self.onelogin.alias_attribute.trim().is_empty() {
            return Err("onelogin.alias_attribute must not be empty".into());
        }
        if self.onelogin.timeout_ms == 0 {
            return Err("onelogin.timeout_ms must be > 0".into());
        }
        url::Url::parse(&self.onelogin.api_base())
            .map_err(|e| format!("onelogin base url is invalid: {e}"))?;
        // Refresh validations
        if self.refresh.interval_secs == 0 {
            return Err("refresh.interval_secs must be > 0".into());
        }
        if self.refresh.timeout_ms == 0 {
            return Err("refresh.timeout_ms must be > 0".into());
        }
        // Key source validations
        if self.keys.timeout_ms == 0 {
            return Err("keys.timeout_ms must be > 0".into());
        }
        if self.keys.ttl_secs == 0 {
            return Err("keys.ttl_secs must be > 0".into());
        }
        if self.keys.sweep_interval_secs == 0 {
            return Err("keys.sweep_interval_secs must be > 0".into());
        }
        if self.keys.max_concurrent_fetches == 0 {
            return Err("keys.max_concurrent_fetches must be > 0".into());
        }
        url::Url::parse(&self.keys.base_url)
            .map_err(|e| format!("keys.base_url is invalid: {e}"))?;
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        let ip: std::net::IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(std::net::IpAddr::from([0, 0, 0, 0]));
        SocketAddr::new(ip, self.server.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    2020
}
fn default_request_timeout_ms() -> u64 {
    15_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneLoginConfig {
    #[serde(default = "default_shard")]
    pub shard: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Custom user attribute holding the GitHub login
    #[serde(default = "default_alias_attribute")]
    pub alias_attribute: String,
    /// Overrides `https://api.{shard}.onelogin.com`
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_onelogin_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for OneLoginConfig {
    fn default() -> Self {
        Self {
            shard: default_shard(),
            client_id: String::new(),
            client_secret: String::new(),
            alias_attribute: default_alias_attribute(),
            base_url: None,
            timeout_ms: default_onelogin_timeout_ms(),
        }
    }
}

impl OneLoginConfig {
    /// API root without a trailing slash.
    pub fn api_base(&self) -> String {
        match self.base_url.as_deref().filter(|u| !u.is_empty()) {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://api.{}.onelogin.com", self.shard.trim()),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_shard() -> String {
    "us".to_string()
}
fn default_alias_attribute() -> String {
    "githubname".to_string()
}
fn default_onelogin_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshSettings {
    #[serde(default = "default_refresh_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_refresh_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_refresh_interval_secs(),
            timeout_ms: default_refresh_timeout_ms(),
        }
    }
}

impl RefreshSettings {
    pub fn to_refresh_config(&self) -> RefreshConfig {
        RefreshConfig::default()
            .with_interval(Duration::from_secs(self.interval_secs))
            .with_fetch_timeout(Duration::from_millis(self.timeout_ms))
    }
}

fn default_refresh_interval_secs() -> u64 {
    900
}
fn default_refresh_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysConfig {
    #[serde(default = "default_keys_base_url")]
    pub base_url: String,
    #[serde(default = "default_keys_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_keys_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Upper bound on simultaneous key fetches for one role lookup.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            base_url: default_keys_base_url(),
            timeout_ms: default_keys_timeout_ms(),
            ttl_secs: default_keys_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
        }
    }
}

impl KeysConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn to_cache_config(&self) -> KeyCacheConfig {
        KeyCacheConfig::default()
            .with_ttl(Duration::from_secs(self.ttl_secs))
            .with_fetch_timeout(self.timeout())
            .with_sweep_interval(Duration::from_secs(self.sweep_interval_secs))
            .with_max_concurrent_fetches(self.max_concurrent_fetches)
    }
}

fn default_keys_base_url() -> String {
    "https://github.com".to_string()
}
fn default_keys_timeout_ms() -> u64 {
    10_000
}
fn default_keys_ttl_secs() -> u64 {
    120
}
fn default_sweep_interval_secs() -> u64 {
    600
}
fn default_max_concurrent_fetches() -> usize {
    8
}

/// Shared query tokens guarding the key and refresh routes.
///
/// Empty strings count as unset so the gate can be disabled from the
/// environment.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl AuthConfig {
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }

    /// Token for `/refresh`, falling back to the general token.
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .or_else(|| self.token())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Default configuration file, relative to the working directory.
    pub const DEFAULT_CONFIG_PATH: &str = "pubkeyd.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., PUBKEYD__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("PUBKEYD")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
