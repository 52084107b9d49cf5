//! Byte-range file streaming for GET requests
//!
//! A GET answers with one META packet carrying the *total* file size, then
//! CHUNK packets (each at most [`CHUNK_SIZE`] bytes) covering the clipped
//! range. If the file turns out shorter than its reported size while
//! streaming, the transfer fails with [`LdtError::Truncated`] instead of
//! ending quietly.

use std::io::SeekFrom;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite};

use crate::codec::write_packet;
use crate::error::{LdtError, Result};
use crate::protocol::{frame, CHUNK_SIZE};
use crate::sandbox::Sandbox;

/// Parsed GET payload: `path|start|end`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteRange {
    pub path: String,
    pub start: u64,
    /// Negative means "to end of file"
    pub end: i64,
}

impl ByteRange {
    pub fn new(path: impl Into<String>, start: u64, end: i64) -> Self {
        Self {
            path: path.into(),
            start,
            end,
        }
    }

    /// Whole file
    pub fn full(path: impl Into<String>) -> Self {
        Self::new(path, 0, -1)
    }

    pub fn to_payload(&self) -> String {
        format!("{}|{}|{}", self.path, self.start, self.end)
    }

    /// Split from the right so a path containing `|` still parses.
    pub fn parse(payload: &str) -> Result<Self> {
        let mut parts = payload.rsplitn(3, '|');
        let (end, start, path) = match (parts.next(), parts.next(), parts.next()) {
            (Some(e), Some(s), Some(p)) => (e, s, p),
            _ => {
                return Err(LdtError::InvalidRequest(
                    "Invalid GET request format".to_string(),
                ))
            }
        };
        let start: i64 = start
            .trim()
            .parse()
            .map_err(|_| LdtError::InvalidRequest(format!("bad start offset {:?}", start)))?;
        let end: i64 = end
            .trim()
            .parse()
            .map_err(|_| LdtError::InvalidRequest(format!("bad end offset {:?}", end)))?;
        Ok(Self {
            path: path.to_string(),
            start: start.max(0) as u64,
            end,
        })
    }

    pub fn clip(&self, file_size: u64) -> (u64, u64) {
        clip_range(self.start, self.end, file_size)
    }
}

/// Effective `[start, end)` for a file of `file_size` bytes.
/// `end < 0` or past EOF means EOF; the result always satisfies
/// `start <= end <= file_size`.
pub fn clip_range(start: u64, end: i64, file_size: u64) -> (u64, u64) {
    let start = start.min(file_size);
    let end = if end < 0 || end as u64 > file_size {
        file_size
    } else {
        end as u64
    };
    (start, end.max(start))
}

/// What a completed GET sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    pub file_size: u64,
    pub start: u64,
    pub end: u64,
    pub sent: u64,
}

/// Serve `req` from under the sandbox root as META + CHUNK packets written to `out`.
pub async fn stream<W>(
    sandbox: &Sandbox,
    req: &ByteRange,
    out: &mut W,
    write_limit: Duration,
) -> Result<StreamSummary>
where
    W: AsyncWrite + Unpin,
{
    let path = sandbox.resolve(&req.path)?;
    let md = match tokio::fs::metadata(&path).await {
        Ok(md) if md.is_file() => md,
        _ => return Err(LdtError::NotFound(req.path.clone())),
    };
    let file_size = md.len();
    let (start, end) = req.clip(file_size);

    write_packet(out, frame::META, file_size.to_string().as_bytes(), write_limit).await?;

    let mut sent = 0;
    if end > start {
        let mut f = tokio::fs::File::open(&path).await?;
        f.seek(SeekFrom::Start(start)).await?;
        sent = send_chunks(&mut f, end - start, out, write_limit).await?;
    }
    Ok(StreamSummary {
        file_size,
        start,
        end,
        sent,
    })
}

/// Copy exactly `expected` bytes from `src` to `out` as CHUNK packets.
pub(crate) async fn send_chunks<R, W>(
    src: &mut R,
    expected: u64,
    out: &mut W,
    write_limit: Duration,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(CHUNK_SIZE.min(expected as usize));
    let mut sent = 0u64;
    while sent < expected {
        let want = (expected - sent).min(CHUNK_SIZE as u64);
        buf.clear();
        (&mut *src).take(want).read_to_end(&mut buf).await?;
        if buf.is_empty() {
            return Err(LdtError::Truncated { expected, sent });
        }
        write_packet(out, frame::CHUNK, &buf, write_limit).await?;
        sent += buf.len() as u64;
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{read_packet, Packet};
    use std::fs;
    use tempfile::TempDir;

    const LIMIT: Duration = Duration::from_secs(5);

    async fn decode_all(buf: &[u8]) -> Vec<Packet> {
        let mut cursor = buf;
        let mut out = Vec::new();
        while !cursor.is_empty() {
            out.push(read_packet(&mut cursor, LIMIT).await.unwrap());
        }
        out
    }

    fn fixture() -> (TempDir, Sandbox) {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), b"0123456789").unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        let sb = Sandbox::new(tmp.path()).unwrap();
        (tmp, sb)
    }

    #[test]
    fn test_clip_to_end_of_file() {
        let s = 10u64;
        for end in [-1i64, 10, 110] {
            assert_eq!(clip_range(0, end, s), (0, s), "end={end}");
        }
        for end in 3..10i64 {
            assert_eq!(clip_range(3, end, s), (3, end as u64));
        }
    }

    #[test]
    fn test_clip_degenerate_ranges() {
        assert_eq!(clip_range(7, 2, 10), (7, 7));
        assert_eq!(clip_range(50, -1, 10), (10, 10));
        assert_eq!(clip_range(0, -1, 0), (0, 0));
    }

    #[test]
    fn test_parse_get_payload() {
        assert_eq!(
            ByteRange::parse("/a.txt|0|-1").unwrap(),
            ByteRange::new("/a.txt", 0, -1)
        );
        assert_eq!(
            ByteRange::parse("dir/odd|name.bin|2|5").unwrap(),
            ByteRange::new("dir/odd|name.bin", 2, 5)
        );
        assert_eq!(ByteRange::parse("a|-5|3").unwrap().start, 0);
        for bad in ["a.txt", "a.txt|0", "a|x|1", "a|0|"] {
            assert!(
                matches!(ByteRange::parse(bad), Err(LdtError::InvalidRequest(_))),
                "{bad:?}"
            );
        }
        let r = ByteRange::new("/x y", 4, 9);
        assert_eq!(ByteRange::parse(&r.to_payload()).unwrap(), r);
    }

    #[tokio::test]
    async fn test_full_file_is_meta_then_one_chunk() {
        let (_tmp, sb) = fixture();
        let mut out = Vec::new();
        let summary = stream(&sb, &ByteRange::full("/a.txt"), &mut out, LIMIT)
            .await
            .unwrap();
        assert_eq!(summary.sent, 10);

        let packets = decode_all(&out).await;
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].kind, frame::META);
        assert_eq!(packets[0].text(), "10");
        assert_eq!(packets[1].kind, frame::CHUNK);
        assert_eq!(packets[1].payload, b"0123456789");
    }

    #[tokio::test]
    async fn test_partial_range_reports_total_size() {
        let (_tmp, sb) = fixture();
        let mut out = Vec::new();
        stream(&sb, &ByteRange::new("a.txt", 3, 7), &mut out, LIMIT)
            .await
            .unwrap();
        let packets = decode_all(&out).await;
        assert_eq!(packets[0].text(), "10");
        assert_eq!(packets[1].payload, b"3456");
        assert_eq!(packets.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_range_sends_only_meta() {
        let (_tmp, sb) = fixture();
        let mut out = Vec::new();
        let summary = stream(&sb, &ByteRange::new("a.txt", 4, 4), &mut out, LIMIT)
            .await
            .unwrap();
        assert_eq!(summary.sent, 0);
        let packets = decode_all(&out).await;
        assert_eq!(packets, vec![Packet::new(frame::META, b"10".to_vec())]);
    }

    #[tokio::test]
    async fn test_large_file_chunking_is_complete() {
        let (tmp, sb) = fixture();
        let size = CHUNK_SIZE * 2 + 123;
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        fs::write(tmp.path().join("big.bin"), &data).unwrap();

        let mut out = Vec::new();
        stream(&sb, &ByteRange::full("big.bin"), &mut out, LIMIT)
            .await
            .unwrap();
        let packets = decode_all(&out).await;
        let chunks: Vec<_> = packets[1..].iter().collect();
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|p| p.kind == frame::CHUNK && p.payload.len() <= CHUNK_SIZE));
        let joined: Vec<u8> = chunks.iter().flat_map(|p| p.payload.clone()).collect();
        assert_eq!(joined, data);
    }

    #[tokio::test]
    async fn test_missing_or_non_regular_is_not_found() {
        let (_tmp, sb) = fixture();
        for p in ["/missing", "sub", "/"] {
            let mut out = Vec::new();
            let err = stream(&sb, &ByteRange::full(p), &mut out, LIMIT)
                .await
                .unwrap_err();
            assert!(matches!(err, LdtError::NotFound(_)), "{p}: {err:?}");
            assert!(out.is_empty());
        }
    }

    #[tokio::test]
    async fn test_escape_is_security_violation() {
        let (_tmp, sb) = fixture();
        let mut out = Vec::new();
        let err = stream(&sb, &ByteRange::full("../../etc/passwd"), &mut out, LIMIT)
            .await
            .unwrap_err();
        assert!(matches!(err, LdtError::SecurityViolation(_)));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_short_source_is_truncation_error() {
        let mut src: &[u8] = b"12345";
        let mut out = Vec::new();
        let err = send_chunks(&mut src, 10, &mut out, LIMIT).await.unwrap_err();
        assert!(matches!(
            err,
            LdtError::Truncated {
                expected: 10,
                sent: 5
            }
        ));
        // What was available still went out before the failure
        let packets = decode_all(&out).await;
        assert_eq!(packets, vec![Packet::new(frame::CHUNK, b"12345".to_vec())]);
    }
}
