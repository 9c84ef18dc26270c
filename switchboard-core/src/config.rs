use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct SwitchboardConfig {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub messaging: MessagingConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub socket_path: String,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// "postgres" or "memory"
    #[serde(default = "default_database_backend")]
    pub backend: String,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_backend() -> String {
    "postgres".to_string()
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8780,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MessagingConfig {
    pub driver: String,
    pub auth_dir: String,
    pub send_timeout_seconds: u64,
    pub event_buffer: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            driver: "simulated".to_string(),
            auth_dir: "~/.switchboard/auth".to_string(),
            send_timeout_seconds: 30,
            event_buffer: 64,
        }
    }
}

impl MessagingConfig {
    /// Root directory for per-session pairing artifacts, with `~` expanded.
    pub fn auth_root(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.auth_dir).into_owned())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionsConfig {
    pub retention_hours: i64,
    pub cleanup_interval_minutes: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            retention_hours: 24,
            cleanup_interval_minutes: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    pub ignore_groups: bool,
    pub ignore_status: bool,
    pub max_body_length: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            ignore_groups: true,
            ignore_status: true,
            max_body_length: 4096,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RealtimeConfig {
    pub channel_capacity: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

impl SwitchboardConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        s.try_deserialize()
    }

    /// In-memory configuration used by tests and local experiments.
    pub fn ephemeral(auth_dir: impl Into<String>) -> Self {
        Self {
            service: ServiceConfig {
                socket_path: "/tmp/switchboard.sock".to_string(),
                log_level: "debug".to_string(),
            },
            database: DatabaseConfig {
                backend: "memory".to_string(),
                url: String::new(),
                max_connections: 1,
            },
            http: HttpConfig::default(),
            messaging: MessagingConfig {
                auth_dir: auth_dir.into(),
                send_timeout_seconds: 5,
                ..MessagingConfig::default()
            },
            sessions: SessionsConfig::default(),
            ingest: IngestConfig::default(),
            realtime: RealtimeConfig::default(),
        }
    }
}
