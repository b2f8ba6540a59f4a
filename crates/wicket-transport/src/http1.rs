//! HTTP/1.1 response framing over raw bytes.
//!
//! The parser never decompresses; outbound requests pin `Accept-Encoding:
//! identity` so the wire carries identity-encoded bodies.

use bytes::{Bytes, BytesMut};

use crate::headers::{Headers, header_get};

#[derive(Debug, thiserror::Error)]
pub enum Http1Error {
    #[error("malformed status line: {0}")]
    BadStatusLine(String),
    #[error("invalid chunk size line: {0}")]
    BadChunkSize(String),
    #[error("chunk data not followed by CRLF")]
    BadChunkTerminator,
    #[error("response preamble too large")]
    PreambleTooLarge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preamble {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
}

/// How to frame the body that follows a preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Chunked,
    Length(u64),
    /// Neither `Transfer-Encoding: chunked` nor `Content-Length`: body runs
    /// to connection close.
    Eof,
}

pub fn body_framing(headers: &Headers) -> BodyFraming {
    if let Some(te) = header_get(headers, "transfer-encoding")
        && te
            .split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("chunked"))
    {
        return BodyFraming::Chunked;
    }
    if let Some(len) = header_get(headers, "content-length")
        && let Ok(len) = len.trim().parse::<u64>()
    {
        return BodyFraming::Length(len);
    }
    BodyFraming::Eof
}

/// Tries to parse a complete status line + header block out of `buf`.
///
/// Returns `Ok(None)` when the terminating `CRLF CRLF` has not arrived yet;
/// on success the consumed byte count is returned so the caller can treat the
/// remainder as body bytes.
pub fn parse_preamble(buf: &[u8]) -> Result<Option<(Preamble, usize)>, Http1Error> {
    let Some(end) = find_double_crlf(buf) else {
        return Ok(None);
    };
    let preamble_bytes = &buf[..end];
    let text = String::from_utf8_lossy(preamble_bytes);
    let mut lines = text.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let (status, reason) = parse_status_line(status_line)?;

    let mut headers: Headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        // Malformed header lines are skipped rather than fatal; real servers
        // occasionally emit garbage between valid headers.
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    Ok(Some((
        Preamble {
            status,
            reason,
            headers,
        },
        end + 4,
    )))
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|window| window == b"\r\n\r\n")
}

fn parse_status_line(line: &str) -> Result<(u16, String), Http1Error> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if version != "HTTP/1.1" && version != "HTTP/1.0" {
        return Err(Http1Error::BadStatusLine(line.to_string()));
    }
    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| Http1Error::BadStatusLine(line.to_string()))?;
    let reason = parts.next().unwrap_or("").to_string();
    Ok((status, reason))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data { remaining: u64 },
    DataCrlf,
    Trailer,
    Done,
}

/// Incremental `Transfer-Encoding: chunked` decoder.
///
/// Feed whatever arrived from the socket; decoded payload bytes accumulate in
/// `out`. A chunk-size line or terminating CRLF split across reads simply
/// waits for the next feed.
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: ChunkState,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self {
            state: ChunkState::Size,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == ChunkState::Done
    }

    /// Decodes as much of `buf` as possible, moving payload bytes into `out`.
    /// Returns true once the zero-size chunk and its trailer are consumed.
    pub fn decode(&mut self, buf: &mut BytesMut, out: &mut Vec<Bytes>) -> Result<bool, Http1Error> {
        loop {
            match self.state {
                ChunkState::Size => {
                    let Some(line_end) = find_crlf(buf) else {
                        return Ok(false);
                    };
                    let line = buf.split_to(line_end + 2);
                    let line = &line[..line_end];
                    let size = parse_chunk_size(line)?;
                    self.state = if size == 0 {
                        ChunkState::Trailer
                    } else {
                        ChunkState::Data { remaining: size }
                    };
                }
                ChunkState::Data { remaining } => {
                    if buf.is_empty() {
                        return Ok(false);
                    }
                    let take = remaining.min(buf.len() as u64) as usize;
                    out.push(buf.split_to(take).freeze());
                    let left = remaining - take as u64;
                    self.state = if left == 0 {
                        ChunkState::DataCrlf
                    } else {
                        ChunkState::Data { remaining: left }
                    };
                }
                ChunkState::DataCrlf => {
                    if buf.len() < 2 {
                        return Ok(false);
                    }
                    let crlf = buf.split_to(2);
                    if &crlf[..] != b"\r\n" {
                        return Err(Http1Error::BadChunkTerminator);
                    }
                    self.state = ChunkState::Size;
                }
                ChunkState::Trailer => {
                    let Some(line_end) = find_crlf(buf) else {
                        return Ok(false);
                    };
                    let line = buf.split_to(line_end + 2);
                    if line_end == 0 {
                        self.state = ChunkState::Done;
                        return Ok(true);
                    }
                    // Non-empty trailer header: skipped, per the no-rewrite
                    // contract of the forwarder.
                    let _ = line;
                }
                ChunkState::Done => return Ok(true),
            }
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|window| window == b"\r\n")
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, Http1Error> {
    let text = std::str::from_utf8(line)
        .map_err(|_| Http1Error::BadChunkSize(String::from_utf8_lossy(line).to_string()))?;
    // Chunk extensions (";name=value") are legal and ignored.
    let size = text.split(';').next().unwrap_or_default().trim();
    u64::from_str_radix(size, 16).map_err(|_| Http1Error::BadChunkSize(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preamble_waits_for_terminator() {
        let partial = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n";
        assert!(parse_preamble(partial).unwrap().is_none());
    }

    #[test]
    fn preamble_parses_and_reports_offset() {
        let raw = b"HTTP/1.1 404 Not Found\r\nX-A: 1\r\nX-A: 2\r\n\r\nbody";
        let (preamble, consumed) = parse_preamble(raw).unwrap().unwrap();
        assert_eq!(preamble.status, 404);
        assert_eq!(preamble.reason, "Not Found");
        assert_eq!(
            preamble.headers,
            vec![
                ("X-A".to_string(), "1".to_string()),
                ("X-A".to_string(), "2".to_string()),
            ]
        );
        assert_eq!(&raw[consumed..], b"body");
    }

    #[test]
    fn status_line_must_be_http1x() {
        assert!(parse_preamble(b"HTTP/2 200 OK\r\n\r\n").is_err());
        assert!(parse_preamble(b"ICY 200 OK\r\n\r\n").is_err());
        assert!(parse_preamble(b"HTTP/1.1 abc OK\r\n\r\n").is_err());
    }

    #[test]
    fn empty_reason_is_allowed() {
        let (preamble, _) = parse_preamble(b"HTTP/1.0 200\r\n\r\n").unwrap().unwrap();
        assert_eq!(preamble.status, 200);
        assert_eq!(preamble.reason, "");
    }

    #[test]
    fn framing_selection() {
        let chunked = vec![("Transfer-Encoding".to_string(), "gzip, Chunked".to_string())];
        assert_eq!(body_framing(&chunked), BodyFraming::Chunked);

        let sized = vec![("Content-Length".to_string(), "42".to_string())];
        assert_eq!(body_framing(&sized), BodyFraming::Length(42));

        assert_eq!(body_framing(&Vec::new()), BodyFraming::Eof);
    }

    fn decode_all(decoder: &mut ChunkedDecoder, chunks: &[&[u8]]) -> (Vec<u8>, bool) {
        let mut buf = BytesMut::new();
        let mut out = Vec::new();
        let mut done = false;
        for chunk in chunks {
            buf.extend_from_slice(chunk);
            done = decoder.decode(&mut buf, &mut out).unwrap();
        }
        let bytes: Vec<u8> = out.iter().flat_map(|b| b.to_vec()).collect();
        (bytes, done)
    }

    #[test]
    fn chunked_single_feed() {
        let mut decoder = ChunkedDecoder::new();
        let (bytes, done) = decode_all(&mut decoder, &[b"5\r\nhello\r\n0\r\n\r\n"]);
        assert_eq!(bytes, b"hello");
        assert!(done);
    }

    #[test]
    fn chunked_crlf_on_read_boundary() {
        let mut decoder = ChunkedDecoder::new();
        // The CRLF after the chunk payload is split across feeds, as is the
        // final terminator.
        let (bytes, done) = decode_all(
            &mut decoder,
            &[b"4\r\nwi", b"ck", b"et\r", b"\n0\r", b"\n\r\n"],
        );
        assert_eq!(bytes, b"wicket");
        assert!(done);
    }

    #[test]
    fn chunk_size_line_split_across_reads() {
        let mut decoder = ChunkedDecoder::new();
        let (bytes, done) = decode_all(&mut decoder, &[b"a", b";ext=1\r\n0123456789\r\n", b"0\r\n\r\n"]);
        assert_eq!(bytes, b"0123456789");
        assert!(done);
    }

    #[test]
    fn trailer_headers_are_skipped() {
        let mut decoder = ChunkedDecoder::new();
        let (bytes, done) =
            decode_all(&mut decoder, &[b"2\r\nok\r\n0\r\nX-Trailer: 1\r\n\r\n"]);
        assert_eq!(bytes, b"ok");
        assert!(done);
    }

    #[test]
    fn rejects_garbage_chunk_size() {
        let mut decoder = ChunkedDecoder::new();
        let mut buf = BytesMut::from(&b"zz\r\n"[..]);
        let mut out = Vec::new();
        assert!(decoder.decode(&mut buf, &mut out).is_err());
    }
}
