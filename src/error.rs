//! Error types shared by the codec, the server and the client.

/// Errors produced while speaking LDT1 or touching the served tree.
#[derive(Debug, thiserror::Error)]
pub enum LdtError {
    /// Bad magic, malformed header or an unexpected packet type.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer closed the stream in the middle of a read.
    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("timed out waiting for data")]
    Timeout,

    /// A client path resolved outside the served root.
    #[error("security: {0}")]
    SecurityViolation(String),

    #[error("file not found: {0}")]
    NotFound(String),

    /// The peer answered with an ERR packet.
    #[error("{0}")]
    Remote(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The source file ended before the requested range was sent.
    #[error("short read: expected {expected} bytes, sent {sent}")]
    Truncated { expected: u64, sent: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LdtError {
    /// Whether this error just means the peer went away between requests.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, LdtError::ConnectionClosed)
    }
}

pub type Result<T> = std::result::Result<T, LdtError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_displays_peer_message_verbatim() {
        let e = LdtError::Remote("File not found: /missing".into());
        assert_eq!(e.to_string(), "File not found: /missing");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let e: LdtError = io.into();
        assert!(matches!(e, LdtError::Io(_)));
        assert!(!e.is_disconnect());
        assert!(LdtError::ConnectionClosed.is_disconnect());
    }
}
