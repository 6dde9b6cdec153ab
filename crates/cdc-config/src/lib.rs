use cdc_core::{CaptureSettings, RelayConfig, UnrecognizedPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub logging: LoggingConfig,
    pub kafka: KafkaSection,
    pub capture: CaptureSection,
    pub relay: RelaySection,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API server host
    pub host: String,

    /// API server port
    pub port: u16,

    /// Enable CORS
    pub cors_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON formatted logs
    pub json: bool,
}

/// Broker the relay sessions consume from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaSection {
    pub brokers: Vec<String>,

    /// `latest` shows only changes made after a session opens
    pub auto_offset_reset: String,

    pub session_timeout_ms: u32,

    /// Prefix of the per-session consumer group ids
    pub group_prefix: String,
}

/// Capture service and what it needs to know about the sources
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSection {
    /// Kafka Connect REST endpoint
    pub connect_url: String,

    /// How the capture service reaches databases on `localhost`
    pub loopback_host: String,

    /// Broker address as seen from the capture service
    pub history_bootstrap_servers: String,

    /// Bound for every database and capture service call
    pub call_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySection {
    pub unrecognized_events: UnrecognizedPolicy,
    pub close_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    File,
    Postgres,
}

/// Where connection profiles are kept
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// Profile directory of the file backend
    pub dir: String,

    /// Connection URL of the postgres backend
    #[serde(default)]
    pub database_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                host: "localhost".to_string(),
                port: 3000,
                cors_enabled: true,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
            kafka: KafkaSection {
                brokers: vec!["localhost:9092".to_string()],
                auto_offset_reset: "latest".to_string(),
                session_timeout_ms: 10_000,
                group_prefix: "cdc-relay".to_string(),
            },
            capture: CaptureSection {
                connect_url: "http://localhost:8083".to_string(),
                loopback_host: "host.docker.internal".to_string(),
                history_bootstrap_servers: "kafka:9092".to_string(),
                call_timeout_secs: 10,
            },
            relay: RelaySection {
                unrecognized_events: UnrecognizedPolicy::Deliver,
                close_timeout_ms: 5_000,
            },
            storage: StorageConfig {
                backend: StorageBackend::File,
                dir: "profiles".to_string(),
                database_url: None,
            },
        }
    }
}

impl AppConfig {
    pub fn load(config_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let config_dir = config_dir.as_ref();
        let s = config::Config::builder()
            // Start with defaults
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(
                config::File::with_name(&config_dir.join("default.yaml").to_string_lossy())
                    .required(false),
            )
            // docker.yaml overrides inside containers
            .add_source(
                config::File::with_name(&config_dir.join("docker.yaml").to_string_lossy())
                    .required(false),
            )
            // CDC__API__PORT=4000, CDC__KAFKA__BROKERS=a:9092,b:9092
            .add_source(
                config::Environment::with_prefix("CDC")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("kafka.brokers"),
            )
            .build()?;

        let config = s.try_deserialize()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.capture.call_timeout_secs)
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            loopback_host: self.capture.loopback_host.clone(),
            history_bootstrap_servers: self.capture.history_bootstrap_servers.clone(),
            call_timeout: self.call_timeout(),
        }
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            group_prefix: self.kafka.group_prefix.clone(),
            unrecognized: self.relay.unrecognized_events,
            close_timeout: Duration::from_millis(self.relay.close_timeout_ms),
        }
    }

    /// Profile directory; relative paths are taken from `config_dir`
    pub fn storage_dir(&self, config_dir: impl AsRef<Path>) -> std::path::PathBuf {
        let dir = Path::new(&self.storage.dir);
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            config_dir.as_ref().join(dir)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(dir.path()).unwrap();

        assert_eq!(config.api.port, 3000);
        assert_eq!(config.storage.backend, StorageBackend::File);
        assert_eq!(config.relay_config().unrecognized, UnrecognizedPolicy::Deliver);
        assert_eq!(config.capture_settings().call_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.yaml"),
            "relay:\n  unrecognized_events: suppress\n  close_timeout_ms: 250\n\
             capture:\n  connect_url: http://connect:8083\n  loopback_host: 172.17.0.1\n  \
             history_bootstrap_servers: kafka:29092\n  call_timeout_secs: 3\n",
        )
        .unwrap();

        let config = AppConfig::load(dir.path()).unwrap();
        let relay = config.relay_config();
        assert_eq!(relay.unrecognized, UnrecognizedPolicy::Suppress);
        assert_eq!(relay.close_timeout, Duration::from_millis(250));
        assert_eq!(config.capture.connect_url, "http://connect:8083");
        assert_eq!(config.capture_settings().translate_host("localhost"), "172.17.0.1");
        assert_eq!(config.api.port, 3000);
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.yaml");
        let mut config = AppConfig::default();
        config.storage.backend = StorageBackend::Postgres;
        config.storage.database_url = Some("postgres://localhost/cdc".to_string());

        config.to_file(&path).unwrap();
        let loaded = AppConfig::from_file(&path).unwrap();
        assert_eq!(loaded.storage.backend, StorageBackend::Postgres);
        assert_eq!(loaded.storage.database_url, config.storage.database_url);
    }

    #[test]
    fn test_relative_storage_dir() {
        let config = AppConfig::default();
        assert_eq!(
            config.storage_dir("/etc/cdc"),
            std::path::PathBuf::from("/etc/cdc/profiles")
        );
    }
}
