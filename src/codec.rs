//! LDT1 packet framing
//!
//! ```text
//! packet := MAGIC(4, "LDT1") | TYPE(1) | LENGTH(4, u32 BE) | PAYLOAD(LENGTH)
//! ```
//!
//! Reads are exact: a peer that goes away mid-read surfaces as
//! [`LdtError::ConnectionClosed`], and every individual receive is bounded by
//! the caller's deadline ([`LdtError::Timeout`]). An `ERR` packet is never
//! handed back as a packet; it becomes [`LdtError::Remote`].

use std::io::ErrorKind;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::{LdtError, Result};
use crate::protocol::{frame, HEADER_LEN, MAGIC, MAX_FRAME_SIZE};

/// One decoded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(kind: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Payload as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Fail unless this packet has the expected type.
    pub fn expect_kind(self, kind: u8) -> Result<Self> {
        if self.kind != kind {
            return Err(LdtError::Protocol(format!(
                "expected {} packet, got {} (0x{:02x})",
                frame::name(kind),
                frame::name(self.kind),
                self.kind
            )));
        }
        Ok(self)
    }
}

/// Validate frame payload size against MAX_FRAME_SIZE
pub fn validate_frame_size(size: usize) -> Result<()> {
    if size > MAX_FRAME_SIZE {
        return Err(LdtError::Protocol(format!(
            "frame payload too large: {} bytes (max: {})",
            size, MAX_FRAME_SIZE
        )));
    }
    Ok(())
}

/// Build frame header (9 bytes)
/// Format: MAGIC (4) | TYPE (1) | LENGTH (4, big-endian)
pub fn build_frame_header(frame_type: u8, payload_len: u32) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(MAGIC);
    header[4] = frame_type;
    header[5..9].copy_from_slice(&payload_len.to_be_bytes());
    header
}

/// Parse frame header
/// Returns: (frame_type, payload_length)
pub fn parse_frame_header(header: &[u8; HEADER_LEN]) -> Result<(u8, u32)> {
    if &header[0..4] != MAGIC {
        return Err(LdtError::Protocol(format!(
            "invalid magic {:?}",
            String::from_utf8_lossy(&header[0..4])
        )));
    }
    let frame_type = header[4];
    let payload_len = u32::from_be_bytes([header[5], header[6], header[7], header[8]]);
    Ok((frame_type, payload_len))
}

/// Encode a complete packet into one buffer.
pub fn encode(kind: u8, payload: &[u8]) -> Result<Vec<u8>> {
    validate_frame_size(payload.len())?;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&build_frame_header(kind, payload.len() as u32));
    out.extend_from_slice(payload);
    Ok(out)
}

fn map_io(e: std::io::Error) -> LdtError {
    match e.kind() {
        ErrorKind::UnexpectedEof
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe => LdtError::ConnectionClosed,
        ErrorKind::TimedOut => LdtError::Timeout,
        _ => LdtError::Io(e),
    }
}

#[inline]
async fn read_exact_timed<R>(reader: &mut R, buf: &mut [u8], limit: Duration) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    match timeout(limit, reader.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(map_io(e)),
        Err(_) => Err(LdtError::Timeout),
    }
}

/// Read the next packet, bounding each receive by `limit`.
pub async fn read_packet<R>(reader: &mut R, limit: Duration) -> Result<Packet>
where
    R: AsyncRead + Unpin,
{
    let mut hdr = [0u8; HEADER_LEN];
    read_exact_timed(reader, &mut hdr[0..4], limit).await?;
    if &hdr[0..4] != MAGIC {
        return Err(LdtError::Protocol(format!(
            "invalid magic {:?}",
            String::from_utf8_lossy(&hdr[0..4])
        )));
    }
    read_exact_timed(reader, &mut hdr[4..], limit).await?;
    let (kind, len) = parse_frame_header(&hdr)?;
    let len = len as usize;
    validate_frame_size(len)?;

    let mut payload = vec![0u8; len];
    if len > 0 {
        read_exact_timed(reader, &mut payload, limit).await?;
    }
    if kind == frame::ERR {
        return Err(LdtError::Remote(
            String::from_utf8_lossy(&payload).into_owned(),
        ));
    }
    Ok(Packet { kind, payload })
}

/// Write one packet and flush, failing with `Timeout` if it takes longer than `limit`.
pub async fn write_packet<W>(writer: &mut W, kind: u8, payload: &[u8], limit: Duration) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    validate_frame_size(payload.len())?;
    let hdr = build_frame_header(kind, payload.len() as u32);
    let io = async {
        writer.write_all(&hdr).await?;
        if !payload.is_empty() {
            writer.write_all(payload).await?;
        }
        writer.flush().await
    };
    match timeout(limit, io).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(map_io(e)),
        Err(_) => Err(LdtError::Timeout),
    }
}
