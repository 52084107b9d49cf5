//! Shared CLI helpers and small reusable Clap fragments

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::config::{ClientConfig, ServerConfig};

/// Daemon options for ldtd; anything left unset falls back to the config file
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "LDT1 file server: browse and download a directory tree")]
pub struct DaemonOpts {
    /// Interface to bind (without port)
    #[arg(long)]
    pub bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Root directory to serve
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Maximum connections served at once
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Seconds an idle connection may wait for its next request
    #[arg(long)]
    pub idle_timeout: Option<u64>,

    /// Append request log entries to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Config file (default: ~/.config/ldt/ldtd.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write the effective settings back to the config file and exit
    #[arg(long)]
    pub save_config: bool,

    /// Debug-level logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl DaemonOpts {
    /// Overlay command-line values onto a loaded config
    pub fn apply(&self, cfg: &mut ServerConfig) {
        if let Some(ref b) = self.bind {
            cfg.bind = b.clone();
        }
        if let Some(p) = self.port {
            cfg.port = p;
        }
        if let Some(ref r) = self.root {
            cfg.root = r.clone();
        }
        if let Some(n) = self.max_connections {
            cfg.max_connections = n;
        }
        if let Some(secs) = self.idle_timeout {
            cfg.idle_timeout_ms = secs * 1000;
        }
        if let Some(ref l) = self.log_file {
            cfg.log_file = Some(l.clone());
        }
    }
}

/// Client options for ldt
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "Browse and download files from an LDT1 server")]
pub struct ClientOpts {
    /// Server host or IP
    #[arg(short, long, global = true)]
    pub server: Option<String>,

    /// Server port
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// Config file (default: ~/.config/ldt/ldt.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: ClientCommand,
}

#[derive(Clone, Debug, Subcommand)]
pub enum ClientCommand {
    /// Check that the server accepts connections
    Ping,

    /// List a remote directory
    Ls {
        #[arg(default_value = "/")]
        path: String,

        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },

    /// Download one or more remote files concurrently
    Get {
        #[arg(required = true)]
        remote: Vec<String>,

        /// Target directory (or file name when downloading a single file)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Parallel downloads
        #[arg(short = 'j', long)]
        jobs: Option<usize>,

        /// Print the final progress snapshot as JSON
        #[arg(long)]
        json: bool,
    },
}

impl ClientOpts {
    pub fn apply(&self, cfg: &mut ClientConfig) {
        if let Some(ref s) = self.server {
            cfg.server = s.clone();
        }
        if let Some(p) = self.port {
            cfg.port = p;
        }
        if let ClientCommand::Get { jobs: Some(j), .. } = self.command {
            cfg.max_concurrent_downloads = j;
        }
    }
}

/// Install the tracing subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_logging(default_level: &str, verbose: bool) {
    let level = if verbose { "debug" } else { default_level };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ldt={level},ldtd={level}")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_flags_override_config() {
        let opts = DaemonOpts::parse_from(["ldtd", "--root", "/srv", "-p", "9000", "--idle-timeout", "5"]);
        assert!(!opts.save_config);
        assert!(DaemonOpts::parse_from(["ldtd", "--save-config"]).save_config);
        let mut cfg = ServerConfig::default();
        opts.apply(&mut cfg);
        assert_eq!(cfg.root, PathBuf::from("/srv"));
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.idle_timeout_ms, 5000);
        assert_eq!(cfg.max_connections, ServerConfig::default().max_connections);
    }

    #[test]
    fn test_client_subcommands() {
        let opts = ClientOpts::parse_from(["ldt", "get", "/a.txt", "/b.bin", "-j", "2", "-s", "10.0.0.2"]);
        let mut cfg = ClientConfig::default();
        opts.apply(&mut cfg);
        assert_eq!(cfg.server, "10.0.0.2");
        assert_eq!(cfg.max_concurrent_downloads, 2);
        match opts.command {
            ClientCommand::Get { remote, output, .. } => {
                assert_eq!(remote, vec!["/a.txt", "/b.bin"]);
                assert!(output.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }

        let opts = ClientOpts::parse_from(["ldt", "ls"]);
        assert!(matches!(opts.command, ClientCommand::Ls { ref path, json: false } if path == "/"));
    }
}
