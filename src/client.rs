//! Client side of LDT1.
//!
//! Every call opens its own connection, the same way the download worker
//! does: one for the size probe, one for the transfer itself.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::codec::{read_packet, write_packet, Packet};
use crate::config::ClientConfig;
use crate::error::{LdtError, Result};
use crate::listing::{parse_records, DirectoryEntry};
use crate::protocol::{frame, timeouts};
use crate::streamer::ByteRange;

#[derive(Debug, Clone)]
pub struct Client {
    addr: String,
    connect_timeout: Duration,
    list_timeout: Duration,
    transfer_timeout: Duration,
}

impl Client {
    /// `addr` is `host:port`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: timeouts::ms(timeouts::CONNECT_MS),
            list_timeout: timeouts::ms(timeouts::LIST_MS),
            transfer_timeout: timeouts::ms(timeouts::TRANSFER_MS),
        }
    }

    pub fn from_config(cfg: &ClientConfig) -> Self {
        Self {
            addr: cfg.addr(),
            connect_timeout: timeouts::ms(cfg.connect_timeout_ms),
            list_timeout: timeouts::ms(cfg.list_timeout_ms),
            transfer_timeout: timeouts::ms(cfg.transfer_timeout_ms),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn connect(&self) -> Result<TcpStream> {
        let stream = match timeout(self.connect_timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(LdtError::Timeout),
        };
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }

    /// Open and immediately drop a connection to see if the server is reachable.
    pub async fn check_connection(&self) -> Result<()> {
        let host = self.addr.rsplit_once(':').map(|(h, _)| h).unwrap_or(&self.addr);
        if host.trim().is_empty() {
            return Err(LdtError::InvalidRequest(
                "server address cannot be blank".to_string(),
            ));
        }
        self.connect().await.map(drop)
    }

    /// List a remote directory. Paths are sent with `/` separators.
    pub async fn list(&self, path: &str) -> Result<Vec<DirectoryEntry>> {
        let mut s = self.connect().await?;
        let path = path.replace('\\', "/");
        write_packet(&mut s, frame::LIST, path.as_bytes(), self.list_timeout).await?;
        let resp = read_packet(&mut s, self.list_timeout)
            .await?
            .expect_kind(frame::LIST_RESP)?;
        Ok(parse_records(&resp.text()))
    }

    /// Learn a file's total size with a one-byte GET.
    pub async fn probe_size(&self, path: &str) -> Result<u64> {
        let mut s = self.connect().await?;
        let req = ByteRange::new(path, 0, 1);
        write_packet(&mut s, frame::GET, req.to_payload().as_bytes(), self.transfer_timeout).await?;
        let meta = read_packet(&mut s, self.transfer_timeout).await?;
        parse_meta(meta)
    }

    /// Start a ranged GET; chunks are pulled from the returned stream.
    pub async fn fetch(&self, range: &ByteRange) -> Result<RangeStream> {
        let mut s = self.connect().await?;
        write_packet(&mut s, frame::GET, range.to_payload().as_bytes(), self.transfer_timeout).await?;
        let total_size = parse_meta(read_packet(&mut s, self.transfer_timeout).await?)?;
        let (start, end) = range.clip(total_size);
        Ok(RangeStream {
            stream: s,
            total_size,
            remaining: end - start,
            limit: self.transfer_timeout,
        })
    }
}

fn parse_meta(p: Packet) -> Result<u64> {
    let p = p.expect_kind(frame::META)?;
    let text = p.text();
    text.trim()
        .parse()
        .map_err(|_| LdtError::Protocol(format!("bad META payload {:?}", text)))
}

/// CHUNK packets of an in-progress GET.
pub struct RangeStream {
    stream: TcpStream,
    total_size: u64,
    remaining: u64,
    limit: Duration,
}

impl RangeStream {
    /// Size reported by META: the whole file, not just the range.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Next chunk, or `None` once the whole range has arrived.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let p = read_packet(&mut self.stream, self.limit)
            .await?
            .expect_kind(frame::CHUNK)?;
        let len = p.payload.len() as u64;
        if len == 0 || len > self.remaining {
            return Err(LdtError::Protocol(format!(
                "chunk of {} bytes with {} bytes outstanding",
                len, self.remaining
            )));
        }
        self.remaining -= len;
        Ok(Some(p.payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_meta() {
        assert_eq!(parse_meta(Packet::new(frame::META, b"10".to_vec())).unwrap(), 10);
        assert!(matches!(
            parse_meta(Packet::new(frame::META, b"ten".to_vec())),
            Err(LdtError::Protocol(_))
        ));
        assert!(parse_meta(Packet::new(frame::CHUNK, b"10".to_vec())).is_err());
    }

    #[tokio::test]
    async fn test_blank_address_rejected() {
        let err = Client::new(":3445").check_connection().await.unwrap_err();
        assert!(matches!(err, LdtError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_fails() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let sock = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            sock.local_addr().unwrap().port()
        };
        let client = Client::new(format!("127.0.0.1:{port}"));
        assert!(client.check_connection().await.is_err());
        assert!(client.list("/").await.is_err());
    }
}
