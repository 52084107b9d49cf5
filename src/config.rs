//! TOML configuration for `ldtd` and `ldt`.
//!
//! Both files are optional: a missing file means defaults, and any field left
//! out of a file keeps its default. Command-line flags are applied on top by
//! the binaries.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::protocol::{timeouts, DEFAULT_PORT};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind, without the port
    pub bind: String,
    pub port: u16,
    /// Directory tree to serve
    pub root: PathBuf,
    /// Connections served at once; further clients wait in the accept backlog
    pub max_connections: usize,
    pub idle_timeout_ms: u64,
    pub write_timeout_ms: u64,
    /// Append request log lines here
    pub log_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            root: PathBuf::from("."),
            max_connections: 256,
            idle_timeout_ms: timeouts::IDLE_MS,
            write_timeout_ms: timeouts::WRITE_BASE_MS,
            log_file: None,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn idle_timeout(&self) -> Duration {
        timeouts::ms(self.idle_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        timeouts::ms(self.write_timeout_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub list_timeout_ms: u64,
    pub transfer_timeout_ms: u64,
    pub max_concurrent_downloads: usize,
    /// Where `get` saves files when no output path is given
    pub download_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: timeouts::CONNECT_MS,
            list_timeout_ms: timeouts::LIST_MS,
            transfer_timeout_ms: timeouts::TRANSFER_MS,
            max_concurrent_downloads: 4,
            download_dir: PathBuf::from("downloads"),
        }
    }
}

impl ClientConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.server.trim(), self.port)
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(windows)]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("Ldt");
        }
    }
    // Unix-like default
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".config").join("ldt");
    }
    PathBuf::from(".ldt")
}

pub fn default_server_config_path() -> PathBuf {
    config_dir().join("ldtd.toml")
}

pub fn default_client_config_path() -> PathBuf {
    config_dir().join("ldt.toml")
}

/// Read a config file; a missing file yields `T::default()`.
pub fn load<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match std::fs::read_to_string(path) {
        Ok(data) => toml::from_str(&data)
            .with_context(|| format!("Failed to parse config {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e).with_context(|| format!("Failed to read config {}", path.display())),
    }
}

pub fn save<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&dir).ok();
    let data = toml::to_string(value)?;
    // atomic write
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    use std::io::Write as _;
    tmp.write_all(data.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg: ServerConfig = load(&tmp.path().join("nope.toml")).unwrap();
        assert_eq!(cfg, ServerConfig::default());
        assert_eq!(cfg.bind_addr(), "0.0.0.0:3445");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ldt.toml");
        std::fs::write(&path, "server = \"10.0.0.7\"\nmax_concurrent_downloads = 2\n").unwrap();
        let cfg: ClientConfig = load(&path).unwrap();
        assert_eq!(cfg.server, "10.0.0.7");
        assert_eq!(cfg.max_concurrent_downloads, 2);
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.addr(), "10.0.0.7:3445");
    }

    #[test]
    fn test_save_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/ldtd.toml");
        let cfg = ServerConfig {
            root: PathBuf::from("/srv/share"),
            max_connections: 8,
            log_file: Some(PathBuf::from("/var/log/ldtd.log")),
            ..ServerConfig::default()
        };
        save(&path, &cfg).unwrap();
        let back: ServerConfig = load(&path).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.toml");
        std::fs::write(&path, "port = \"not a number\"").unwrap();
        assert!(load::<ServerConfig>(&path).is_err());
    }
}
