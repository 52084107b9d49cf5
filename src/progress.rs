//! Download progress: point-in-time snapshots and a terminal display.
//!
//! Snapshots are computed on demand from the task store; nothing here runs
//! in the background. The display is driven by whoever polls it.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use crate::download::{DownloadStatus, DownloadTask, TaskId, TaskStore};
use crate::protocol::timeouts::MIN_SPEED_WINDOW;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEntry {
    pub name: String,
    pub percent: f64,
    pub speed_bytes_per_sec: f64,
    pub downloaded: u64,
    pub total: u64,
    pub status: DownloadStatus,
}

pub fn snapshot(store: &TaskStore) -> BTreeMap<TaskId, ProgressEntry> {
    snapshot_at(store, Instant::now())
}

/// Snapshot as seen at `now`.
pub fn snapshot_at(store: &TaskStore, now: Instant) -> BTreeMap<TaskId, ProgressEntry> {
    store.with_tasks(|tasks| {
        tasks
            .iter()
            .map(|(id, task)| (*id, entry_for(task, now)))
            .collect()
    })
}

fn entry_for(task: &DownloadTask, now: Instant) -> ProgressEntry {
    let percent = if task.total_size > 0 {
        task.downloaded as f64 / task.total_size as f64 * 100.0
    } else if task.status == DownloadStatus::Completed {
        100.0
    } else {
        0.0
    };
    // Too-short windows give meaningless spikes
    let speed = match task.start_time {
        Some(start) => {
            let elapsed = now.saturating_duration_since(start);
            if elapsed >= MIN_SPEED_WINDOW {
                task.downloaded as f64 / elapsed.as_secs_f64()
            } else {
                0.0
            }
        }
        None => 0.0,
    };
    ProgressEntry {
        name: task.name.clone(),
        percent,
        speed_bytes_per_sec: speed,
        downloaded: task.downloaded,
        total: task.total_size,
        status: task.status.clone(),
    }
}

/// One progress bar per download, fed from snapshots.
pub struct DownloadProgress {
    multi: MultiProgress,
    bars: HashMap<TaskId, ProgressBar>,
    style: ProgressStyle,
}

impl DownloadProgress {
    pub fn new() -> Self {
        let style = ProgressStyle::default_bar()
            .template("{prefix:.bold} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉░");
        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
            style,
        }
    }

    /// Refresh every bar from a snapshot, creating bars for new tasks.
    pub fn update(&mut self, snap: &BTreeMap<TaskId, ProgressEntry>) {
        for (id, entry) in snap {
            let bar = self.bars.entry(*id).or_insert_with(|| {
                let pb = self.multi.add(ProgressBar::new(entry.total));
                pb.set_style(self.style.clone());
                pb.set_prefix(entry.name.clone());
                pb
            });
            if bar.is_finished() {
                continue;
            }
            bar.set_length(entry.total);
            bar.set_position(entry.downloaded);
            match &entry.status {
                DownloadStatus::Completed => {
                    bar.finish_with_message("completed");
                }
                DownloadStatus::Error(msg) => {
                    bar.abandon_with_message(format!("error: {}", msg));
                }
                status => bar.set_message(format!(
                    "{} {:.1}% @ {:.2} MB/s",
                    status,
                    entry.percent,
                    entry.speed_bytes_per_sec / 1_048_576.0
                )),
            }
        }
    }
}

impl Default for DownloadProgress {
    fn default() -> Self {
        Self::new()
    }
}
