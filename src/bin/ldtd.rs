use anyhow::{Context, Result};
use clap::Parser;

use ldt::cli::{init_logging, DaemonOpts};
use ldt::config::{self, ServerConfig};

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();
    init_logging("info", opts.verbose);

    let cfg_path = opts
        .config
        .clone()
        .unwrap_or_else(config::default_server_config_path);
    let mut cfg: ServerConfig = config::load(&cfg_path)?;
    opts.apply(&mut cfg);

    if opts.save_config {
        config::save(&cfg_path, &cfg)
            .with_context(|| format!("Failed to write config {}", cfg_path.display()))?;
        println!("Saved config to {}", cfg_path.display());
        return Ok(());
    }

    // Validate root directory exists and is a directory
    if !cfg.root.exists() {
        anyhow::bail!("Error: Root directory does not exist: {}", cfg.root.display());
    }
    if !cfg.root.is_dir() {
        anyhow::bail!("Error: Root path is not a directory: {}", cfg.root.display());
    }

    // Canonicalize the path for better logging
    let canonical_root = std::fs::canonicalize(&cfg.root)
        .with_context(|| format!("Failed to canonicalize root path: {}", cfg.root.display()))?;
    cfg.root = canonical_root;

    println!("Starting LDT1 daemon:");
    println!("  Root: {}", cfg.root.display());
    println!("  Bind: {}", cfg.bind_addr());
    println!("  Max connections: {}", cfg.max_connections);
    if let Some(ref log) = cfg.log_file {
        println!("  Request log: {}", log.display());
    }

    // No TLS and no authentication exist in LDT1
    if cfg.bind.starts_with("0.0.0.0") {
        eprintln!("⚠️  WARNING: Binding to 0.0.0.0 exposes the served tree to all network interfaces");
        eprintln!("   LDT1 is UNENCRYPTED and UNAUTHENTICATED - only use on trusted networks (LAN)");
        eprintln!();
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(async {
        tokio::select! {
            res = ldt::server::serve(&cfg) => res,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nInterrupted by user. Shutting down.");
                Ok(())
            }
        }
    })
}
