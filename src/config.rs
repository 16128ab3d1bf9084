//! Runtime configuration: optional TOML file, then CLI overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::protocol::{DEFAULT_BACKLOG, DEFAULT_PORT};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (host:port)
    pub bind: String,
    /// Where PUSHed files land; created on demand
    pub upload_dir: PathBuf,
    /// Prefix for patterns that carry no directory
    pub default_root: Option<PathBuf>,
    pub backlog: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{}", DEFAULT_PORT),
            upload_dir: default_upload_dir(),
            default_root: default_root(),
            backlog: DEFAULT_BACKLOG,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    pub port: u16,
    /// Where PULLed files land
    pub download_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            download_dir: PathBuf::from("."),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Load from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                let data = std::fs::read_to_string(p)
                    .with_context(|| format!("read config {}", p.display()))?;
                let cfg: Config = toml::from_str(&data)
                    .with_context(|| format!("parse config {}", p.display()))?;
                Ok(cfg)
            }
            None => Ok(Config::default()),
        }
    }
}

#[cfg(target_os = "android")]
fn default_upload_dir() -> PathBuf {
    PathBuf::from("/sdcard/Download")
}

#[cfg(target_os = "ios")]
fn default_upload_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(|h| PathBuf::from(h).join("Documents"))
        .unwrap_or_else(|| PathBuf::from("Documents"))
}

#[cfg(not(any(target_os = "android", target_os = "ios")))]
fn default_upload_dir() -> PathBuf {
    PathBuf::from("received")
}

#[cfg(target_os = "android")]
fn default_root() -> Option<PathBuf> {
    Some(PathBuf::from("/sdcard/Download"))
}

#[cfg(not(target_os = "android"))]
fn default_root() -> Option<PathBuf> {
    None
}
