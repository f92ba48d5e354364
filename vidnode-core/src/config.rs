use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub cluster: ClusterConfig,
    pub logging: LoggingConfig,
    pub chat: ChatConfig,
    pub turnstile: TurnstileConfig,
    pub bandwidth: BandwidthConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub tls: TlsConfig,
    /// Upper bound for draining in-flight HTTP requests during a restart.
    pub drain_timeout_secs: u64,
    /// How long to wait for WebSocket writers to flush their close frames.
    pub ws_close_timeout_ms: u64,
    pub ws_max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            tls: TlsConfig::default(),
            drain_timeout_secs: 30,
            ws_close_timeout_ms: 2000,
            ws_max_message_size: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file, relative paths resolve against the working directory.
    pub path: PathBuf,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/db/node.sqlite"),
            max_connections: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Number of worker processes, 0 means one per available core.
    pub workers: usize,
    pub stats_interval_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            stats_interval_ms: 1000,
        }
    }
}

impl ClusterConfig {
    #[must_use]
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub max_message_length: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_length: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnstileConfig {
    pub enabled: bool,
    pub site_key: String,
    pub secret_key: String,
    pub verify_url: String,
}

impl Default for TurnstileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            site_key: String::new(),
            secret_key: String::new(),
            verify_url: "https://challenges.cloudflare.com/turnstile/v0/siteverify".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BandwidthConfig {
    pub flush_interval_secs: u64,
    /// Pending byte total that forces an early flush.
    pub flush_threshold_bytes: u64,
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 10,
            flush_threshold_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Fixed token signing secret. Generated per coordinator run when unset,
    /// which invalidates every token on restart.
    pub jwt_secret: Option<String>,
    pub token_ttl_hours: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_ttl_hours: 24,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // VIDNODE_SERVER__PORT, VIDNODE_TURNSTILE__SECRET_KEY, ...
        builder = builder.add_source(
            Environment::with_prefix("VIDNODE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Check cross-field constraints, collecting every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        if self.server.tls.enabled {
            if self.server.tls.cert_path.is_none() {
                problems.push("server.tls.cert_path is required when TLS is enabled".to_string());
            }
            if self.server.tls.key_path.is_none() {
                problems.push("server.tls.key_path is required when TLS is enabled".to_string());
            }
        }
        if self.turnstile.enabled && self.turnstile.secret_key.is_empty() {
            problems.push("turnstile.secret_key is required when turnstile is enabled".to_string());
        }
        if self.cluster.stats_interval_ms == 0 {
            problems.push("cluster.stats_interval_ms must be positive".to_string());
        }
        if self.bandwidth.flush_interval_secs == 0 {
            problems.push("bandwidth.flush_interval_secs must be positive".to_string());
        }
        if let Some(secret) = &self.auth.jwt_secret {
            if secret.len() < 32 {
                problems.push("auth.jwt_secret must be at least 32 characters".to_string());
            }
        }
        if self.auth.token_ttl_hours <= 0 {
            problems.push("auth.token_ttl_hours must be positive".to_string());
        }
        if self.chat.max_message_length == 0 {
            problems.push("chat.max_message_length must be positive".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    #[must_use]
    pub fn media_dir(&self) -> PathBuf {
        self.storage.data_dir.join("media")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cluster.stats_interval_ms, 1000);
        assert!(config.cluster.worker_count() >= 1);
    }

    #[test]
    fn test_http_address() {
        let mut config = Config::default();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 9443;
        assert_eq!(config.http_address(), "127.0.0.1:9443");
    }

    #[test]
    fn test_validate_collects_all_problems() {
        let mut config = Config::default();
        config.server.tls.enabled = true;
        config.turnstile.enabled = true;
        config.auth.jwt_secret = Some("short".to_string());

        let problems = config.validate().unwrap_err();
        assert_eq!(problems.len(), 4);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(
            &path,
            "[server]\nport = 8443\n\n[cluster]\nworkers = 3\n\n[chat]\nmax_message_length = 42\n",
        )
        .unwrap();

        let config = Config::load(path.to_str()).unwrap();
        assert_eq!(config.server.port, 8443);
        assert_eq!(config.cluster.worker_count(), 3);
        assert_eq!(config.chat.max_message_length, 42);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::load(Some("/nonexistent/vidnode.toml")).unwrap();
        assert_eq!(config.server.port, ServerConfig::default().port);
    }
}
