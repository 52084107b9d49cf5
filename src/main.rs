//! ldt - LDT1 client
//!
//! Thin command-line front end over the library: reachability check,
//! directory listing, and concurrent downloads with live progress bars.

use anyhow::{bail, Context, Result};
use chrono::TimeZone;
use clap::Parser;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ldt::cli::{init_logging, ClientCommand, ClientOpts};
use ldt::config::{self, ClientConfig};
use ldt::download::{remote_basename, DownloadManager, DownloadStatus};
use ldt::listing::{format_size, sort_for_display, DirectoryEntry};
use ldt::progress::DownloadProgress;
use ldt::protocol::timeouts::PROGRESS_TICK_MS;
use ldt::Client;

fn main() -> Result<()> {
    // Set up Ctrl-C handler
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        // Exit immediately with 130 (128 + SIGINT)
        std::process::exit(130);
    })
    .context("Error setting Ctrl-C handler")?;

    let opts = ClientOpts::parse();
    init_logging("warn", opts.verbose);

    let cfg_path = opts
        .config
        .clone()
        .unwrap_or_else(config::default_client_config_path);
    let mut cfg: ClientConfig = config::load(&cfg_path)?;
    opts.apply(&mut cfg);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    rt.block_on(run(opts.command, cfg))
}

async fn run(command: ClientCommand, cfg: ClientConfig) -> Result<()> {
    let client = Client::from_config(&cfg);
    match command {
        ClientCommand::Ping => {
            client
                .check_connection()
                .await
                .with_context(|| format!("Failed to reach {}", client.addr()))?;
            println!("✓ Connected to {}", client.addr());
        }
        ClientCommand::Ls { path, json } => {
            let mut items = client
                .list(&path)
                .await
                .with_context(|| format!("Failed to list {} on {}", path, client.addr()))?;
            sort_for_display(&mut items);
            if json {
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                print_listing(&path, &items);
            }
        }
        ClientCommand::Get {
            remote,
            output,
            json,
            ..
        } => download(&cfg, &remote, output.as_deref(), json).await?,
    }
    Ok(())
}

fn print_listing(path: &str, items: &[DirectoryEntry]) {
    println!("{}", path);
    if items.is_empty() {
        println!("  (empty)");
        return;
    }
    for item in items {
        let when = chrono::Local
            .timestamp_opt(item.mtime_unix, 0)
            .single()
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        if item.is_dir {
            println!("  {:<48} {:>12}  {}", format!("{}/", item.name), "-", when);
        } else {
            println!("  {:<48} {:>12}  {}", item.name, format_size(item.size), when);
        }
    }
}

/// Where a remote file lands locally
fn local_target(remote: &str, output: Option<&Path>, download_dir: &Path, count: usize) -> PathBuf {
    let name = remote_basename(remote);
    match output {
        Some(o) if count == 1 && !o.is_dir() => o.to_path_buf(),
        Some(o) => o.join(name),
        None => download_dir.join(name),
    }
}

async fn download(
    cfg: &ClientConfig,
    remote: &[String],
    output: Option<&Path>,
    json: bool,
) -> Result<()> {
    let targets: Vec<(String, PathBuf)> = remote
        .iter()
        .map(|r| (r.clone(), local_target(r, output, &cfg.download_dir, remote.len())))
        .collect();
    let mut seen = HashSet::new();
    for (r, l) in &targets {
        if !seen.insert(l.clone()) {
            bail!("{} would overwrite another download at {}", r, l.display());
        }
    }

    let mgr = DownloadManager::from_config(cfg);
    let handles: Vec<_> = targets
        .iter()
        .map(|(r, l)| mgr.enqueue(r, l.clone()))
        .collect();

    let mut display = if json { None } else { Some(DownloadProgress::new()) };
    let mut ticker = tokio::time::interval(Duration::from_millis(PROGRESS_TICK_MS));
    loop {
        ticker.tick().await;
        let snap = mgr.snapshot();
        if let Some(d) = display.as_mut() {
            d.update(&snap);
        }
        if snap.values().all(|e| e.status.is_finished()) {
            break;
        }
    }
    for h in handles {
        h.wait().await;
    }

    let snap = mgr.snapshot();
    if json {
        let entries: Vec<_> = snap.values().collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
    }
    let failed: Vec<_> = snap
        .values()
        .filter(|e| matches!(e.status, DownloadStatus::Error(_)))
        .collect();
    if !failed.is_empty() {
        for f in &failed {
            eprintln!("✗ {}: {}", f.name, f.status);
        }
        bail!("{} of {} downloads failed", failed.len(), snap.len());
    }
    if !json {
        for (r, l) in &targets {
            println!("✓ {} -> {}", r, l.display());
        }
    }
    Ok(())
}
