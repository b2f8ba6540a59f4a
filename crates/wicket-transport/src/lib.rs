//! Dual-path upstream transport.
//!
//! Callers build a [`RequestEnvelope`] and hand it to a [`Transport`]. The
//! raw-socket path speaks HTTP/1.1 over its own TLS connection (no
//! intermediary touches the wire); the client path goes through `wreq`. The
//! [`selector::TransportSelector`] picks between them and handles fallback.

pub mod client;
pub mod failure;
pub mod headers;
pub mod http1;
pub mod raw;
pub mod selector;
pub mod ws;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

pub use failure::{TransportError, TransportErrorKind};
pub use headers::{
    Headers, filter_forward_headers, from_http_headers, header_get, is_stripped_header,
};
pub use selector::{AttemptRecord, SelectorError, TransportSelector};

/// Streamed response body. Dropping the receiver cancels the producing task,
/// which releases the underlying socket.
pub type ByteStream = tokio::sync::mpsc::Receiver<Bytes>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
    Ws,
    Wss,
}

impl Scheme {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "http" => Some(Scheme::Http),
            "https" => Some(Scheme::Https),
            "ws" => Some(Scheme::Ws),
            "wss" => Some(Scheme::Wss),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Scheme::Https | Scheme::Wss)
    }

    pub fn default_port(&self) -> u16 {
        if self.is_tls() { 443 } else { 80 }
    }
}

/// Parsed upstream target: scheme + host + port + path?query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUrl {
    pub scheme: Scheme,
    pub host: String,
    pub port: Option<u16>,
    /// Always starts with `/`; includes the query string when present.
    pub path_and_query: String,
}

impl TargetUrl {
    pub fn parse(url: &str) -> Result<Self, TransportError> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| TransportError::protocol(format!("missing scheme: {url}")))?;
        let scheme = Scheme::parse(scheme)
            .ok_or_else(|| TransportError::protocol(format!("unsupported scheme: {scheme}")))?;
        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };
        if authority.is_empty() {
            return Err(TransportError::protocol(format!("missing host: {url}")));
        }
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port = port.parse::<u16>().map_err(|_| {
                    TransportError::protocol(format!("invalid port: {authority}"))
                })?;
                (host.to_string(), Some(port))
            }
            _ => (authority.to_string(), None),
        };
        Ok(Self {
            scheme,
            host,
            port,
            path_and_query: path.to_string(),
        })
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.scheme.default_port())
    }

    /// Value for the injected `Host` header: bare hostname on the scheme's
    /// default port, `host:port` otherwise.
    pub fn host_header(&self) -> String {
        match self.port {
            Some(port) if port != self.scheme.default_port() => {
                format!("{}:{}", self.host, port)
            }
            _ => self.host.clone(),
        }
    }

    /// Full URL for the client transport. WebSocket schemes map onto their
    /// HTTP equivalents because the client path only speaks HTTP.
    pub fn http_url(&self) -> String {
        let scheme = match self.scheme {
            Scheme::Ws => "http",
            Scheme::Wss => "https",
            other => other.as_str(),
        };
        match self.port {
            Some(port) if port != self.scheme.default_port() => format!(
                "{scheme}://{}:{port}{}",
                self.host, self.path_and_query
            ),
            _ => format!("{scheme}://{}{}", self.host, self.path_and_query),
        }
    }

    pub fn query(&self) -> Option<&str> {
        self.path_and_query.split_once('?').map(|(_, q)| q)
    }
}

/// One outbound request. Immutable by contract: transports receive a clone,
/// so a consumed body on one path never starves the fallback path.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    pub method: http::Method,
    pub target: TargetUrl,
    pub headers: Headers,
    pub body: Option<Bytes>,
}

impl RequestEnvelope {
    pub fn new(method: http::Method, target: TargetUrl) -> Self {
        Self {
            method,
            target,
            headers: Vec::new(),
            body: None,
        }
    }
}

/// Uniform upstream response. Non-2xx statuses are responses, not errors;
/// only transport-level failures surface as [`TransportError`].
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: ByteStream,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Drains the body into one buffer. Intended for small (error) bodies.
    pub async fn collect_body(mut self) -> Bytes {
        let mut out = Vec::new();
        while let Some(chunk) = self.body.recv().await {
            out.extend_from_slice(&chunk);
        }
        Bytes::from(out)
    }
}

pub trait Transport: Send + Sync {
    fn send<'a>(
        &'a self,
        req: RequestEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, TransportError>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_target() {
        let target = TargetUrl::parse("https://api.example.com/v1/models?x=1").unwrap();
        assert_eq!(target.scheme, Scheme::Https);
        assert_eq!(target.host, "api.example.com");
        assert_eq!(target.port(), 443);
        assert_eq!(target.path_and_query, "/v1/models?x=1");
        assert_eq!(target.query(), Some("x=1"));
        assert_eq!(target.host_header(), "api.example.com");
    }

    #[test]
    fn explicit_port_survives() {
        let target = TargetUrl::parse("http://localhost:8080").unwrap();
        assert_eq!(target.port(), 8080);
        assert_eq!(target.path_and_query, "/");
        assert_eq!(target.host_header(), "localhost:8080");
        assert_eq!(target.http_url(), "http://localhost:8080/");
    }

    #[test]
    fn ws_scheme_maps_to_http_for_client() {
        let target = TargetUrl::parse("wss://relay.example.com/socket").unwrap();
        assert_eq!(target.port(), 443);
        assert_eq!(target.http_url(), "https://relay.example.com/socket");
    }

    #[test]
    fn rejects_bad_urls() {
        assert!(TargetUrl::parse("ftp://example.com").is_err());
        assert!(TargetUrl::parse("no-scheme").is_err());
        assert!(TargetUrl::parse("https://host:notaport/x").is_err());
    }

    #[tokio::test]
    async fn collect_body_preserves_chunk_order() {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        let resp = UpstreamResponse {
            status: 200,
            reason: "OK".to_string(),
            headers: Vec::new(),
            body: rx,
        };
        tokio::spawn(async move {
            for part in ["first ", "second ", "third"] {
                tx.send(Bytes::from_static(part.as_bytes())).await.unwrap();
            }
        });
        assert_eq!(
            resp.collect_body().await,
            Bytes::from_static(b"first second third")
        );
    }
}
