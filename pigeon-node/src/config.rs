//! Load config from file and environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pigeon_core::SecuritySettings;

use crate::transport::TransportConfig;

/// Node configuration. File: ~/.config/pigeon/config.toml or /etc/pigeon/config.toml.
/// Env overrides: PIGEON_PORT, PIGEON_IDENTITY, PIGEON_DIRECTORY, PIGEON_SIGN,
/// PIGEON_ENCRYPT, PIGEON_ACK_TIMEOUT_MS, PIGEON_ATTEMPTS.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// UDP listen port (default 2001).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Identity file with our name and secret keys.
    #[serde(default = "default_identity")]
    pub identity: PathBuf,
    /// Contact directory file.
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_true")]
    pub sign: bool,
    #[serde(default = "default_true")]
    pub encrypt: bool,
    /// Ack window per attempt, in milliseconds (default 10000).
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Endpoints remembered for duplicate suppression.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

fn default_port() -> u16 {
    2001
}
fn default_identity() -> PathBuf {
    PathBuf::from("identity.toml")
}
fn default_directory() -> PathBuf {
    PathBuf::from("directory.toml")
}
fn default_true() -> bool {
    true
}
fn default_ack_timeout_ms() -> u64 {
    10_000
}
fn default_attempts() -> u32 {
    3
}
fn default_history_capacity() -> usize {
    4096
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            identity: default_identity(),
            directory: default_directory(),
            sign: true,
            encrypt: true,
            ack_timeout_ms: default_ack_timeout_ms(),
            attempts: default_attempts(),
            history_capacity: default_history_capacity(),
        }
    }
}

impl Config {
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            attempts: self.attempts,
            ack_timeout: Duration::from_millis(self.ack_timeout_ms),
            history_capacity: self.history_capacity,
        }
    }

    pub fn security(&self) -> SecuritySettings {
        SecuritySettings {
            sign: self.sign,
            encrypt: self.encrypt,
        }
    }

    /// Apply `PIGEON_*` overrides read through `var`.
    pub fn apply_env<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = var("PIGEON_PORT") {
            self.port = parse_var("PIGEON_PORT", &v)?;
        }
        if let Some(v) = var("PIGEON_IDENTITY") {
            self.identity = PathBuf::from(v);
        }
        if let Some(v) = var("PIGEON_DIRECTORY") {
            self.directory = PathBuf::from(v);
        }
        if let Some(v) = var("PIGEON_SIGN") {
            self.sign = parse_var("PIGEON_SIGN", &v)?;
        }
        if let Some(v) = var("PIGEON_ENCRYPT") {
            self.encrypt = parse_var("PIGEON_ENCRYPT", &v)?;
        }
        if let Some(v) = var("PIGEON_ACK_TIMEOUT_MS") {
            self.ack_timeout_ms = parse_var("PIGEON_ACK_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("PIGEON_ATTEMPTS") {
            self.attempts = parse_var("PIGEON_ATTEMPTS", &v)?;
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        name,
        value: value.to_owned(),
    })
}

/// Load config: defaults, then the first config file found, then env vars.
pub fn load() -> Result<Config, ConfigError> {
    let mut c = match config_paths().into_iter().find(|p| p.exists()) {
        Some(p) => load_file(&p)?,
        None => Config::default(),
    };
    c.apply_env(|k| std::env::var(k).ok())?;
    Ok(c)
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/pigeon/config.toml"));
    }
    out.push(PathBuf::from("/etc/pigeon/config.toml"));
    out
}

pub fn load_file(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_owned(),
        source,
    })?;
    toml::from_str(&s).map_err(|source| ConfigError::Parse {
        path: path.to_owned(),
        source,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value {value:?} for {name}")]
    Env { name: &'static str, value: String },
}
