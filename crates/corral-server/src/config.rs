use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use corral_events::PublisherConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub token: TokenConfig,
    pub cache: CacheConfig,
    pub events: EventsConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: StorageBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub secret: String,
    pub issuer: String,
    pub access_ttl_secs: u64,
    pub refresh_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub policy_ttl_secs: u64,
    pub key_ttl_secs: u64,
    pub connectivity_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub stream: String,
    pub max_len: u64,
    pub probe_timeout_ms: u64,
    pub drain_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8189,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            url: "postgresql://localhost:5432/corral".to_string(),
            max_connections: 10,
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            issuer: corral_core::token::DEFAULT_ISSUER.to_string(),
            access_ttl_secs: 3600,
            refresh_ttl_secs: 86_400,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            policy_ttl_secs: 300,
            key_ttl_secs: 300,
            connectivity_ttl_secs: 300,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            stream: "corral.auth".to_string(),
            max_len: 1_000_000,
            probe_timeout_ms: 100,
            drain_interval_ms: 5000,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e.to_string()))?;
            toml::from_str::<AppConfig>(&contents)
                .map_err(|e| ConfigError::ParseToml(e.to_string()))?
        } else {
            AppConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CORRAL_HTTP_HOST") {
            self.http.host = v;
        }
        if let Ok(v) = std::env::var("CORRAL_HTTP_PORT")
            && let Ok(port) = v.parse()
        {
            self.http.port = port;
        }
        if let Ok(v) = std::env::var("CORRAL_DATABASE_BACKEND") {
            match v.as_str() {
                "memory" => self.database.backend = StorageBackend::Memory,
                "postgres" => self.database.backend = StorageBackend::Postgres,
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("CORRAL_DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = std::env::var("CORRAL_DATABASE_MAX_CONNECTIONS")
            && let Ok(n) = v.parse()
        {
            self.database.max_connections = n;
        }
        if let Ok(v) = std::env::var("CORRAL_TOKEN_SECRET") {
            self.token.secret = v;
        }
        if let Ok(v) = std::env::var("CORRAL_TOKEN_ISSUER") {
            self.token.issuer = v;
        }
        if let Ok(v) = std::env::var("CORRAL_TOKEN_ACCESS_TTL_SECS")
            && let Ok(n) = v.parse()
        {
            self.token.access_ttl_secs = n;
        }
        if let Ok(v) = std::env::var("CORRAL_TOKEN_REFRESH_TTL_SECS")
            && let Ok(n) = v.parse()
        {
            self.token.refresh_ttl_secs = n;
        }
        if let Ok(v) = std::env::var("CORRAL_CACHE_POLICY_TTL_SECS")
            && let Ok(n) = v.parse()
        {
            self.cache.policy_ttl_secs = n;
        }
        if let Ok(v) = std::env::var("CORRAL_CACHE_KEY_TTL_SECS")
            && let Ok(n) = v.parse()
        {
            self.cache.key_ttl_secs = n;
        }
        if let Ok(v) = std::env::var("CORRAL_CACHE_CONNECTIVITY_TTL_SECS")
            && let Ok(n) = v.parse()
        {
            self.cache.connectivity_ttl_secs = n;
        }
        if let Ok(v) = std::env::var("CORRAL_EVENTS_STREAM") {
            self.events.stream = v;
        }
        if let Ok(v) = std::env::var("CORRAL_EVENTS_MAX_LEN")
            && let Ok(n) = v.parse()
        {
            self.events.max_len = n;
        }
        if let Ok(v) = std::env::var("CORRAL_EVENTS_PROBE_TIMEOUT_MS")
            && let Ok(n) = v.parse()
        {
            self.events.probe_timeout_ms = n;
        }
        if let Ok(v) = std::env::var("CORRAL_EVENTS_DRAIN_INTERVAL_MS")
            && let Ok(n) = v.parse()
        {
            self.events.drain_interval_ms = n;
        }
        if let Ok(v) = std::env::var("CORRAL_LOG_LEVEL") {
            self.log.level = v;
        }
        if let Ok(v) = std::env::var("CORRAL_LOG_FORMAT") {
            match v.as_str() {
                "json" => self.log.format = LogFormat::Json,
                "pretty" => self.log.format = LogFormat::Pretty,
                _ => {}
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.http.port == 0 {
            return Err(ConfigError::Validation(
                "http.port must be non-zero".to_string(),
            ));
        }
        if self.token.secret.is_empty() {
            return Err(ConfigError::Validation(
                "token.secret must be set".to_string(),
            ));
        }
        if self.token.access_ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "token.access_ttl_secs must be non-zero".to_string(),
            ));
        }
        if self.token.refresh_ttl_secs <= self.token.access_ttl_secs {
            return Err(ConfigError::Validation(
                "token.refresh_ttl_secs must exceed token.access_ttl_secs".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Validation(
                "database.max_connections must be non-zero".to_string(),
            ));
        }
        if self.events.probe_timeout_ms == 0 || self.events.drain_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "events.probe_timeout_ms and events.drain_interval_ms must be non-zero"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http.host, self.http.port)
    }

    pub fn access_ttl(&self) -> Duration {
        Duration::from_secs(self.token.access_ttl_secs)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::from_secs(self.token.refresh_ttl_secs)
    }

    pub fn to_publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            stream: self.events.stream.clone(),
            max_len: self.events.max_len,
            probe_timeout: Duration::from_millis(self.events.probe_timeout_ms),
            drain_interval: Duration::from_millis(self.events.drain_interval_ms),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{0}': {1}")]
    ReadFile(String, String),

    #[error("failed to parse TOML config: {0}")]
    ParseToml(String),

    #[error("config validation failed: {0}")]
    Validation(String),
}
