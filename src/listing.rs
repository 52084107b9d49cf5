use serde::{Deserialize, Serialize};
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};
// Directory enumeration and LIST_RESP record encoding

use crate::sandbox::Sandbox;

/// One child of a listed directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    pub is_dir: bool,
    /// Always 0 for directories
    pub size: u64,
    pub mtime_unix: i64,
}

impl DirectoryEntry {
    /// `name|0or1|size|mtime`
    pub fn to_record(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.name,
            u8::from(self.is_dir),
            self.size,
            self.mtime_unix
        )
    }

    /// Parse one record. The three numeric fields are taken from the right so
    /// a `|` inside the name survives.
    pub fn from_record(line: &str) -> Option<Self> {
        let mut parts = line.rsplitn(4, '|');
        let mtime = parts.next()?.trim().parse::<i64>().ok()?;
        let size = parts.next()?.trim().parse::<u64>().ok()?;
        let is_dir = match parts.next()?.trim() {
            "0" => false,
            "1" => true,
            _ => return None,
        };
        let name = parts.next()?;
        Some(Self {
            name: name.to_string(),
            is_dir,
            size,
            mtime_unix: mtime,
        })
    }
}

/// List a directory under the sandbox root.
///
/// Never fails: a path that escapes the root, does not exist or is not a
/// directory yields an empty listing. Children that cannot be stat'ed are
/// skipped. Order is whatever the filesystem returns.
pub fn list(sandbox: &Sandbox, rel: &str) -> Vec<DirectoryEntry> {
    let dir = match sandbox.resolve(rel) {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!(path = rel, error = %e, "listing refused");
            return Vec::new();
        }
    };
    if !dir.is_dir() {
        return Vec::new();
    }
    let rd = match fs::read_dir(&dir) {
        Ok(rd) => rd,
        Err(e) => {
            tracing::debug!(path = %dir.display(), error = %e, "read_dir failed");
            return Vec::new();
        }
    };

    let mut out = Vec::new();
    for e in rd.flatten() {
        let name = e.file_name().to_string_lossy().to_string();
        if name.contains('\n') || name.contains('\r') {
            tracing::debug!(name = ?name, "name not representable in LIST_RESP; skipped");
            continue;
        }
        // Follow symlinks like a plain stat; broken links and permission errors drop out
        let md = match fs::metadata(e.path()) {
            Ok(md) => md,
            Err(_) => continue,
        };
        let mtime = md.modified().map(unix_mtime).unwrap_or(0);
        out.push(DirectoryEntry {
            name,
            is_dir: md.is_dir(),
            size: if md.is_dir() { 0 } else { md.len() },
            mtime_unix: mtime,
        });
    }
    out
}

/// Whole seconds since the epoch, negative for older timestamps.
fn unix_mtime(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

/// Newline-joined LIST_RESP payload
pub fn encode_records(entries: &[DirectoryEntry]) -> String {
    entries
        .iter()
        .map(DirectoryEntry::to_record)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse a LIST_RESP payload; blank and malformed lines are skipped.
pub fn parse_records(payload: &str) -> Vec<DirectoryEntry> {
    payload
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(DirectoryEntry::from_record)
        .collect()
}

/// Sort entries: directories first, then files, case-insensitive alphabetical within each
pub fn sort_for_display(entries: &mut [DirectoryEntry]) {
    entries.sort_by(|a, b| {
        b.is_dir
            .cmp(&a.is_dir)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
}

/// Format bytes to human readable
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} TB", size)
}
