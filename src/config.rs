//! Configuration for contact-identity

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("contact-identity")
}

/// Deployment environment, selects which database file is used
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Test,
}

impl Environment {
    /// Database file name for this environment
    pub fn database_file(&self) -> &'static str {
        match self {
            Environment::Production => "contacts.db",
            Environment::Test => "contacts-test.db",
        }
    }

    /// Dotenv file loaded at startup for this environment
    pub fn dotenv_file(&self) -> &'static str {
        match self {
            Environment::Production => ".env",
            Environment::Test => ".env.test",
        }
    }
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Storage directory for the contacts database
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Deployment environment
    #[serde(default)]
    pub environment: Environment,

    /// Explicit database path, overrides the environment's file under storage_dir
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Address the HTTP API binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Largest accepted request body in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// How long SQLite waits on a locked database before failing
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_http_port() -> u16 {
    3000
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            environment: Environment::default(),
            database_path: None,
            bind_address: default_bind_address(),
            http_port: default_http_port(),
            max_body_bytes: default_max_body_bytes(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| StorageError::Config(e.to_string()))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), StorageError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| StorageError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get contacts database path
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.storage_dir.join(self.environment.database_file()))
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }

    /// Socket address for the HTTP API
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.http_port)
    }
}
