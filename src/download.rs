//! Client-side download manager.
//!
//! Every enqueued download gets its own tokio task. A worker:
//! 1. probes the remote size with a one-byte GET on its own connection
//! 2. creates the local file and pre-sizes it
//! 3. opens a second connection for `[0, size)` and writes each CHUNK at its offset
//! 4. ends `Completed`, or `Error(message)` on the first failure (no retries)
//!
//! Task state lives in a [`TaskStore`]: one map behind one lock. The lock is
//! only taken to read or update fields, never across socket or file I/O.
//! A semaphore caps how many workers transfer at once; queued tasks stay
//! `Preparing` until a slot frees up.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::config::ClientConfig;
use crate::error::{LdtError, Result};
use crate::progress::{self, ProgressEntry};
use crate::streamer::ByteRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum DownloadStatus {
    Preparing,
    Downloading,
    Completed,
    Error(String),
}

impl DownloadStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, DownloadStatus::Completed | DownloadStatus::Error(_))
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadStatus::Preparing => f.write_str("preparing"),
            DownloadStatus::Downloading => f.write_str("downloading"),
            DownloadStatus::Completed => f.write_str("completed"),
            DownloadStatus::Error(msg) => write!(f, "error: {}", msg),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadTask {
    /// Display name (remote basename)
    pub name: String,
    pub remote_path: String,
    pub local_path: PathBuf,
    pub total_size: u64,
    pub downloaded: u64,
    /// Set when the transfer phase begins
    pub start_time: Option<Instant>,
    pub status: DownloadStatus,
}

/// Shared, lock-guarded map of every download this process has started.
/// Entries are never removed.
#[derive(Clone, Default)]
pub struct TaskStore {
    tasks: Arc<Mutex<BTreeMap<TaskId, DownloadTask>>>,
    next_id: Arc<AtomicU64>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, task: DownloadTask) -> TaskId {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.tasks.lock().insert(id, task);
        id
    }

    fn update(&self, id: TaskId, f: impl FnOnce(&mut DownloadTask)) {
        if let Some(task) = self.tasks.lock().get_mut(&id) {
            f(task);
        }
    }

    pub fn get(&self, id: TaskId) -> Option<DownloadTask> {
        self.tasks.lock().get(&id).cloned()
    }

    /// Run `f` with the whole map locked.
    pub fn with_tasks<R>(&self, f: impl FnOnce(&BTreeMap<TaskId, DownloadTask>) -> R) -> R {
        f(&self.tasks.lock())
    }
}

/// Handle to a spawned download.
pub struct TaskHandle {
    id: TaskId,
    join: JoinHandle<()>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Wait for the worker to reach a terminal status.
    pub async fn wait(self) {
        if let Err(e) = self.join.await {
            warn!(task = %self.id, error = %e, "download worker panicked");
        }
    }
}

pub struct DownloadManager {
    client: Client,
    store: TaskStore,
    permits: Arc<Semaphore>,
}

impl DownloadManager {
    pub fn new(client: Client, max_concurrent: usize) -> Self {
        Self {
            client,
            store: TaskStore::new(),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn from_config(cfg: &ClientConfig) -> Self {
        Self::new(Client::from_config(cfg), cfg.max_concurrent_downloads)
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Register a download and start its worker. Must be called inside a tokio runtime.
    pub fn enqueue(&self, remote_path: &str, local_path: impl Into<PathBuf>) -> TaskHandle {
        let local_path = local_path.into();
        let id = self.store.insert(DownloadTask {
            name: remote_basename(remote_path).to_string(),
            remote_path: remote_path.to_string(),
            local_path: local_path.clone(),
            total_size: 0,
            downloaded: 0,
            start_time: None,
            status: DownloadStatus::Preparing,
        });
        debug!(task = %id, remote = remote_path, local = %local_path.display(), "download queued");

        let client = self.client.clone();
        let store = self.store.clone();
        let permits = self.permits.clone();
        let remote = remote_path.to_string();
        let join = tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(p) => p,
                Err(_) => {
                    store.update(id, |t| {
                        t.status = DownloadStatus::Error("download manager closed".to_string())
                    });
                    return;
                }
            };
            let worker = {
                let store = store.clone();
                let remote = remote.clone();
                tokio::spawn(async move {
                    run_download(&client, &store, id, &remote, &local_path).await
                })
            };
            record_outcome(&store, id, &remote, worker.await);
        });
        TaskHandle { id, join }
    }

    /// Point-in-time progress of every task.
    pub fn snapshot(&self) -> BTreeMap<TaskId, ProgressEntry> {
        progress::snapshot(&self.store)
    }
}

async fn run_download(
    client: &Client,
    store: &TaskStore,
    id: TaskId,
    remote: &str,
    local: &Path,
) -> Result<u64> {
    let size = client.probe_size(remote).await?;

    if let Some(parent) = local.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(local)
        .await?;
    file.set_len(size).await?;

    store.update(id, |t| {
        t.total_size = size;
        t.start_time = Some(Instant::now());
        t.status = DownloadStatus::Downloading;
    });
    if size == 0 {
        return Ok(0);
    }

    let mut stream = client.fetch(&ByteRange::new(remote, 0, size as i64)).await?;
    if stream.total_size() != size {
        return Err(LdtError::Protocol(format!(
            "remote file changed size during download ({} -> {} bytes)",
            size,
            stream.total_size()
        )));
    }

    let mut pos = 0u64;
    while let Some(chunk) = stream.next_chunk().await? {
        file.seek(SeekFrom::Start(pos)).await?;
        file.write_all(&chunk).await?;
        pos += chunk.len() as u64;
        store.update(id, |t| {
            t.downloaded = pos;
            t.status = DownloadStatus::Downloading;
        });
    }
    file.flush().await?;
    Ok(pos)
}

/// Move a finished worker's task to its terminal status. A panicked worker
/// counts as a failed download.
fn record_outcome(
    store: &TaskStore,
    id: TaskId,
    remote: &str,
    outcome: std::result::Result<Result<u64>, JoinError>,
) {
    let status = match outcome {
        Ok(Ok(bytes)) => {
            info!(task = %id, remote, bytes, "download complete");
            DownloadStatus::Completed
        }
        Ok(Err(e)) => {
            warn!(task = %id, remote, error = %e, "download failed");
            DownloadStatus::Error(e.to_string())
        }
        Err(e) => {
            warn!(task = %id, remote, error = %e, "download worker panicked");
            DownloadStatus::Error(format!("download worker panicked: {}", e))
        }
    };
    store.update(id, |t| t.status = status);
}

/// Last path segment, accepting either separator.
pub fn remote_basename(remote: &str) -> &str {
    remote
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(remote)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_basename() {
        assert_eq!(remote_basename("/a/b/c.txt"), "c.txt");
        assert_eq!(remote_basename("c.txt"), "c.txt");
        assert_eq!(remote_basename("dir\\win.bin"), "win.bin");
        assert_eq!(remote_basename("/sub/"), "sub");
        assert_eq!(remote_basename("/"), "/");
    }

    #[test]
    fn test_status_display_and_finished() {
        assert_eq!(DownloadStatus::Preparing.to_string(), "preparing");
        assert_eq!(
            DownloadStatus::Error("connection closed by peer".into()).to_string(),
            "error: connection closed by peer"
        );
        assert!(DownloadStatus::Completed.is_finished());
        assert!(DownloadStatus::Error(String::new()).is_finished());
        assert!(!DownloadStatus::Downloading.is_finished());
    }

    #[test]
    fn test_store_ids_are_unique_and_shared_across_clones() {
        let store = TaskStore::new();
        let other = store.clone();
        let mk = |name: &str| DownloadTask {
            name: name.into(),
            remote_path: format!("/{name}"),
            local_path: PathBuf::from(name),
            total_size: 0,
            downloaded: 0,
            start_time: None,
            status: DownloadStatus::Preparing,
        };
        let a = store.insert(mk("a"));
        let b = other.insert(mk("a"));
        assert_ne!(a, b);
        assert_eq!(store.with_tasks(|t| t.len()), 2);

        other.update(b, |t| t.downloaded = 7);
        assert_eq!(store.get(b).unwrap().downloaded, 7);
        assert_eq!(store.get(a).unwrap().downloaded, 0);
    }

    #[tokio::test]
    async fn test_panicked_worker_is_terminal_error() {
        let store = TaskStore::new();
        let id = store.insert(DownloadTask {
            name: "f.bin".into(),
            remote_path: "/f.bin".into(),
            local_path: PathBuf::from("f.bin"),
            total_size: 0,
            downloaded: 0,
            start_time: None,
            status: DownloadStatus::Downloading,
        });
        async fn boom() -> Result<u64> {
            panic!("boom")
        }
        let outcome = tokio::spawn(boom()).await;
        record_outcome(&store, id, "/f.bin", outcome);
        match store.get(id).unwrap().status {
            DownloadStatus::Error(msg) => assert!(msg.contains("panicked"), "{msg}"),
            s => panic!("expected error, got {s:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_server_marks_task_failed() {
        let port = {
            let sock = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            sock.local_addr().unwrap().port()
        };
        let tmp = tempfile::tempdir().unwrap();
        let mgr = DownloadManager::new(Client::new(format!("127.0.0.1:{port}")), 2);
        let handle = mgr.enqueue("/a.txt", tmp.path().join("a.txt"));
        let id = handle.id();
        handle.wait().await;

        let task = mgr.store().get(id).unwrap();
        assert!(matches!(task.status, DownloadStatus::Error(_)));
        assert_eq!(task.name, "a.txt");
        assert!(!tmp.path().join("a.txt").exists());
    }
}
