use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Mutex;

/// Request log for the daemon. Every hook defaults to a no-op.
pub trait Logger: Send + Sync {
    fn connected(&self, _peer: SocketAddr) {}
    fn list(&self, _peer: SocketAddr, _path: &str, _entries: usize) {}
    fn get(&self, _peer: SocketAddr, _path: &str, _start: u64, _end: u64, _bytes: u64) {}
    fn error(&self, _peer: SocketAddr, _msg: &str) {}
    fn disconnected(&self, _peer: SocketAddr, _requests: u64) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn connected(&self, peer: SocketAddr) {
        self.line(&format!("CONNECT peer={}", peer));
    }
    fn list(&self, peer: SocketAddr, path: &str, entries: usize) {
        self.line(&format!("LIST peer={} path={:?} entries={}", peer, path, entries));
    }
    fn get(&self, peer: SocketAddr, path: &str, start: u64, end: u64, bytes: u64) {
        self.line(&format!(
            "GET peer={} path={:?} range={}..{} bytes={}",
            peer, path, start, end, bytes
        ));
    }
    fn error(&self, peer: SocketAddr, msg: &str) {
        self.line(&format!("ERROR peer={} msg={}", peer, msg));
    }
    fn disconnected(&self, peer: SocketAddr, requests: u64) {
        self.line(&format!("DISCONNECT peer={peer} requests={requests}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_logger_appends_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logs/ldtd.log");
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        {
            let log = TextLogger::new(&path).unwrap();
            log.connected(peer);
            log.get(peer, "/a.txt", 0, 10, 10);
        }
        let log = TextLogger::new(&path).unwrap();
        log.error(peer, "file not found: /missing");

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("CONNECT peer=127.0.0.1:5000"));
        assert!(lines[1].contains("GET peer=127.0.0.1:5000 path=\"/a.txt\" range=0..10 bytes=10"));
        assert!(lines[2].contains("ERROR"));
        assert!(lines[2].starts_with('['));
    }
}
