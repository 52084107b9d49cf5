//! Shared protocol constants for the LDT1 framed transport

// Every packet starts with this marker
pub const MAGIC: &[u8; 4] = b"LDT1";

// MAGIC (4) | TYPE (1) | LENGTH (4, big-endian)
pub const HEADER_LEN: usize = 4 + 1 + 4;

// Maximum frame payload size (64MB) - prevents DoS via memory exhaustion
// Chunks never exceed CHUNK_SIZE; the headroom is for large LIST_RESP bodies
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

// Maximum CHUNK payload (1MB)
pub const CHUNK_SIZE: usize = 1024 * 1024;

pub const DEFAULT_PORT: u16 = 3445;

// Message type IDs (wire-stable; 0x06 is reserved)
pub mod frame {
    pub const LIST: u8 = 0x01;
    pub const LIST_RESP: u8 = 0x02;
    pub const GET: u8 = 0x03;
    pub const META: u8 = 0x04;
    pub const CHUNK: u8 = 0x05;
    pub const ERR: u8 = 0x07;

    /// Human-readable name for logs
    pub fn name(t: u8) -> &'static str {
        match t {
            LIST => "LIST",
            LIST_RESP => "LIST_RESP",
            GET => "GET",
            META => "META",
            CHUNK => "CHUNK",
            ERR => "ERR",
            _ => "UNKNOWN",
        }
    }
}

// Centralized timeout constants for consistent behavior between server and client
pub mod timeouts {
    use std::time::Duration;

    // Connection establishment / reachability check
    pub const CONNECT_MS: u64 = 3_000;

    // Per-receive bound for LIST round trips
    pub const LIST_MS: u64 = 5_000;

    // Per-receive bound while probing or streaming a file
    pub const TRANSFER_MS: u64 = 10_000;

    // How long the server waits for the next request on an idle connection
    pub const IDLE_MS: u64 = 300_000;

    // Base bound for a single packet write on the server
    pub const WRITE_BASE_MS: u64 = 30_000;

    // Progress tick interval for UI updates (ms)
    pub const PROGRESS_TICK_MS: u64 = 250;

    // Speed is reported as zero until this much transfer time has elapsed
    pub const MIN_SPEED_WINDOW: Duration = Duration::from_millis(100);

    pub fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_names() {
        assert_eq!(frame::name(frame::LIST), "LIST");
        assert_eq!(frame::name(frame::ERR), "ERR");
        assert_eq!(frame::name(0x06), "UNKNOWN");
    }

    #[test]
    fn test_header_len_matches_layout() {
        assert_eq!(HEADER_LEN, MAGIC.len() + 1 + std::mem::size_of::<u32>());
        assert!(CHUNK_SIZE <= MAX_FRAME_SIZE);
    }
}
