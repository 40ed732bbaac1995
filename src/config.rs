//! Configuration file support.
//!
//! Settings are read from TOML. Secrets (the oracle secret and signing key)
//! never live in the file; only the names of the environment variables that
//! hold them do.

use crate::identity::IdentityMode;
use crate::oracle::{OracleKey, OracleSecret};
use crate::ownership::KeyBindingCheck;
use crate::predicate::PredicateConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_MAX_ROWS_FILE_SIZE: u64 = 10 * 1024 * 1024;
const DEFAULT_MAX_SUBMISSION_FILE_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub binding: BindingConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default)]
    pub mode: IdentityMode,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BindingConfig {
    #[serde(default)]
    pub key_check: KeyBindingCheck,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    #[serde(default = "default_secret_env")]
    pub secret_env: String,
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
    #[serde(default = "default_space")]
    pub space: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_max_rows_file_size")]
    pub max_rows_file_size: u64,
    #[serde(default = "default_max_submission_file_size")]
    pub max_submission_file_size: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            namespace: default_namespace(),
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            secret_env: default_secret_env(),
            private_key_env: default_private_key_env(),
            space: default_space(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_rows_file_size: DEFAULT_MAX_ROWS_FILE_SIZE,
            max_submission_file_size: DEFAULT_MAX_SUBMISSION_FILE_SIZE,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./dbs")
}

fn default_namespace() -> String {
    "club".to_string()
}

fn default_secret_env() -> String {
    "ORACLE_SECRET".to_string()
}

fn default_private_key_env() -> String {
    "ORACLE_PRIVATE_KEY".to_string()
}

fn default_space() -> String {
    "anon.eth".to_string()
}

fn default_max_rows_file_size() -> u64 {
    DEFAULT_MAX_ROWS_FILE_SIZE
}

fn default_max_submission_file_size() -> u64 {
    DEFAULT_MAX_SUBMISSION_FILE_SIZE
}

impl Config {
    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Loads `path` if given, otherwise the defaults.
    pub fn load_optional(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn save_to_file(&self, path: &PathBuf) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    #[must_use]
    pub fn predicate(&self) -> PredicateConfig {
        PredicateConfig {
            identity_mode: self.identity.mode,
            key_check: self.binding.key_check,
        }
    }
}

impl OracleConfig {
    /// Reads the oracle secret from the configured environment variable.
    pub fn secret_from_env(&self) -> Result<OracleSecret> {
        let raw = std::env::var(&self.secret_env)
            .with_context(|| format!("Environment variable {} is not set", self.secret_env))?;
        OracleSecret::parse(&raw).with_context(|| format!("Invalid {}", self.secret_env))
    }

    /// Reads the oracle signing key from the configured environment variable.
    pub fn key_from_env(&self) -> Result<OracleKey> {
        let raw = std::env::var(&self.private_key_env).with_context(|| {
            format!("Environment variable {} is not set", self.private_key_env)
        })?;
        OracleKey::from_hex(&raw).with_context(|| format!("Invalid {}", self.private_key_env))
    }
}
