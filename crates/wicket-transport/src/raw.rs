//! Raw-socket HTTP/1.1 transport.
//!
//! One request-response exchange per connection, written directly onto a TCP
//! or TLS stream. Headers go out exactly as the envelope carries them (plus
//! the injected `Host`, `Accept-Encoding: identity` and `Content-Length`), so
//! no runtime client can add fingerprintable extras.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::failure::{TransportError, TransportErrorKind};
use crate::http1::{BodyFraming, ChunkedDecoder, Preamble, body_framing, parse_preamble};
use crate::{RequestEnvelope, Transport, UpstreamResponse};

const MAX_PREAMBLE_BYTES: usize = 64 * 1024;
const READ_CHUNK: usize = 16 * 1024;
const BODY_CHANNEL_DEPTH: usize = 16;

/// TCP stream, optionally wrapped in client TLS.
pub enum TransportStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl AsyncRead for TransportStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            TransportStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            TransportStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TransportStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            TransportStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            TransportStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            TransportStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            TransportStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            TransportStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            TransportStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

pub struct RawSocketTransport {
    connector: TlsConnector,
    connect_timeout: Duration,
}

impl Default for RawSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RawSocketTransport {
    pub fn new() -> Self {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Self {
            connector: TlsConnector::from(Arc::new(config)),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Dials the target and completes the TLS handshake when the scheme asks
    /// for it. Also used by the WebSocket relay, which runs its own protocol
    /// on the returned stream.
    pub async fn open_stream(
        &self,
        target: &crate::TargetUrl,
    ) -> Result<TransportStream, TransportError> {
        let address = (target.host.as_str(), target.port());
        let tcp = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| {
                TransportError::new(
                    TransportErrorKind::Timeout,
                    format!("connect to {}:{} timed out", target.host, target.port()),
                )
            })?
            .map_err(TransportError::from)?;

        if !target.scheme.is_tls() {
            return Ok(TransportStream::Plain(tcp));
        }

        let server_name = ServerName::try_from(target.host.clone()).map_err(|_| {
            TransportError::new(
                TransportErrorKind::Tls,
                format!("invalid server name: {}", target.host),
            )
        })?;
        let tls = self
            .connector
            .connect(server_name, tcp)
            .await
            .map_err(|err| TransportError::new(TransportErrorKind::Tls, err.to_string()))?;
        Ok(TransportStream::Tls(Box::new(tls)))
    }
}

impl Transport for RawSocketTransport {
    fn send<'a>(
        &'a self,
        req: RequestEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let mut stream = self.open_stream(&req.target).await?;

            let wire = serialize_request(&req);
            stream.write_all(&wire).await?;
            stream.flush().await?;

            let (preamble, residue) = read_preamble(&mut stream).await?;
            debug!(
                event = "raw_response_preamble",
                host = %req.target.host,
                status = preamble.status,
                framing = ?body_framing(&preamble.headers),
            );

            Ok(spawn_body_pump(stream, preamble, residue))
        })
    }
}

/// Serializes the request line, the injected hygiene headers, the envelope
/// headers and the body as one contiguous write.
fn serialize_request(req: &RequestEnvelope) -> Vec<u8> {
    let mut out = Vec::with_capacity(512 + req.body.as_ref().map_or(0, |b| b.len()));
    out.extend_from_slice(req.method.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(req.target.path_and_query.as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");

    push_header(&mut out, "Host", &req.target.host_header());
    push_header(&mut out, "Accept-Encoding", "identity");
    push_header(&mut out, "Connection", "close");

    for (name, value) in &req.headers {
        push_header(&mut out, name, value);
    }

    let body_len = req.body.as_ref().map_or(0, |b| b.len());
    let needs_length =
        body_len > 0 || req.method == http::Method::POST || req.method == http::Method::PUT;
    if needs_length {
        push_header(&mut out, "Content-Length", &body_len.to_string());
    }

    out.extend_from_slice(b"\r\n");
    if let Some(body) = &req.body {
        out.extend_from_slice(body);
    }
    out
}

fn push_header(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}

/// Reads until the response preamble is complete. Returns the parsed preamble
/// and any body bytes that arrived with it.
async fn read_preamble<S>(stream: &mut S) -> Result<(Preamble, BytesMut), TransportError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    loop {
        if let Some((preamble, consumed)) =
            parse_preamble(&buf).map_err(|err| TransportError::protocol(err.to_string()))?
        {
            let _ = buf.split_to(consumed);
            return Ok((preamble, buf));
        }
        if buf.len() > MAX_PREAMBLE_BYTES {
            return Err(TransportError::protocol("response preamble too large"));
        }
        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(TransportError::new(
                TransportErrorKind::Closed,
                "connection closed before response preamble",
            ));
        }
    }
}

/// Hands the read side to a pump task that decodes the body framing and feeds
/// the uniform byte stream. The socket stays alive exactly as long as the
/// receiver does.
fn spawn_body_pump(
    stream: TransportStream,
    preamble: Preamble,
    residue: BytesMut,
) -> UpstreamResponse {
    let framing = body_framing(&preamble.headers);
    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(BODY_CHANNEL_DEPTH);

    tokio::spawn(async move {
        let result = match framing {
            BodyFraming::Chunked => pump_chunked(stream, residue, &tx).await,
            BodyFraming::Length(len) => pump_sized(stream, residue, len, &tx).await,
            BodyFraming::Eof => pump_until_eof(stream, residue, &tx).await,
        };
        if let Err(err) = result {
            debug!(event = "raw_body_pump_error", error = %err);
        }
    });

    UpstreamResponse {
        status: preamble.status,
        reason: preamble.reason,
        headers: preamble.headers,
        body: rx,
    }
}

async fn pump_chunked(
    mut stream: TransportStream,
    mut buf: BytesMut,
    tx: &tokio::sync::mpsc::Sender<Bytes>,
) -> Result<(), TransportError> {
    let mut decoder = ChunkedDecoder::new();
    loop {
        let mut decoded = Vec::new();
        let done = decoder
            .decode(&mut buf, &mut decoded)
            .map_err(|err| TransportError::protocol(err.to_string()))?;
        for chunk in decoded {
            if tx.send(chunk).await.is_err() {
                return Ok(());
            }
        }
        if done {
            return Ok(());
        }
        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(TransportError::new(
                TransportErrorKind::Closed,
                "connection closed inside chunked body",
            ));
        }
    }
}

async fn pump_sized(
    mut stream: TransportStream,
    mut buf: BytesMut,
    total: u64,
    tx: &tokio::sync::mpsc::Sender<Bytes>,
) -> Result<(), TransportError> {
    let mut remaining = total;
    loop {
        if !buf.is_empty() && remaining > 0 {
            let take = remaining.min(buf.len() as u64) as usize;
            remaining -= take as u64;
            if tx.send(buf.split_to(take).freeze()).await.is_err() {
                return Ok(());
            }
        }
        if remaining == 0 {
            return Ok(());
        }
        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(TransportError::new(
                TransportErrorKind::Closed,
                "connection closed before content-length satisfied",
            ));
        }
    }
}

async fn pump_until_eof(
    mut stream: TransportStream,
    mut buf: BytesMut,
    tx: &tokio::sync::mpsc::Sender<Bytes>,
) -> Result<(), TransportError> {
    loop {
        if !buf.is_empty() && tx.send(buf.split().freeze()).await.is_err() {
            return Ok(());
        }
        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
    }
}
