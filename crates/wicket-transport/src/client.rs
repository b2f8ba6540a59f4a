//! High-level transport over the `wreq` client.
//!
//! Fallback path: same uniform-response contract as the raw socket, but the
//! runtime client owns connection management, TLS and redirects. No header
//! hygiene beyond what the client itself does.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use wreq::{Client, Method};

use crate::failure::{TransportError, TransportErrorKind};
use crate::{RequestEnvelope, Transport, UpstreamResponse};

/// Time budget for obtaining the response preamble. Body streaming is only
/// bounded by the idle timeout so long SSE sessions survive.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);
const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const BODY_CHANNEL_DEPTH: usize = 16;

pub struct ClientTransport {
    client: Client,
}

impl ClientTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| TransportError::new(classify_wreq_error(&err), err.to_string()))?;
        Ok(Self { client })
    }
}

impl Transport for ClientTransport {
    fn send<'a>(
        &'a self,
        req: RequestEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let method = wreq_method(&req.method)?;
            let mut builder = self.client.request(method, req.target.http_url());
            for (name, value) in &req.headers {
                builder = builder.header(name, value);
            }
            if let Some(body) = req.body {
                builder = builder.body(body);
            }

            let response = tokio::time::timeout(RESPONSE_TIMEOUT, builder.send())
                .await
                .map_err(|_| {
                    TransportError::new(
                        TransportErrorKind::Timeout,
                        format!("request to {} timed out", req.target.host),
                    )
                })?
                .map_err(|err| TransportError::new(classify_wreq_error(&err), err.to_string()))?;

            Ok(convert_response(response))
        })
    }
}

fn wreq_method(method: &http::Method) -> Result<Method, TransportError> {
    match method.as_str() {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "PATCH" => Ok(Method::PATCH),
        "DELETE" => Ok(Method::DELETE),
        "HEAD" => Ok(Method::HEAD),
        "OPTIONS" => Ok(Method::OPTIONS),
        other => Err(TransportError::protocol(format!(
            "method {other} not supported by the client transport"
        ))),
    }
}

fn convert_response(response: wreq::Response) -> UpstreamResponse {
    let status = response.status().as_u16();
    let reason = response
        .status()
        .canonical_reason()
        .unwrap_or("")
        .to_string();
    let headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    let (tx, rx) = mpsc::channel::<Bytes>(BODY_CHANNEL_DEPTH);
    tokio::spawn(forward_body(response.bytes_stream(), tx));

    UpstreamResponse {
        status,
        reason,
        headers,
        body: rx,
    }
}

/// Relays body chunks until EOF, a read error, an idle gap, or a dropped
/// receiver; each of those ends the uniform stream the same way.
async fn forward_body<S>(mut stream: S, tx: mpsc::Sender<Bytes>)
where
    S: Stream<Item = Result<Bytes, wreq::Error>> + Unpin,
{
    while let Ok(Some(Ok(chunk))) = tokio::time::timeout(STREAM_IDLE_TIMEOUT, stream.next()).await
    {
        if tx.send(chunk).await.is_err() {
            break;
        }
    }
}

/// Substring refinements layered over the client's coarse error predicates;
/// the first matching hint wins, otherwise the predicate's base kind stands.
const TIMEOUT_HINTS: [(&str, TransportErrorKind); 2] = [
    ("read", TransportErrorKind::ReadTimeout),
    ("idle", TransportErrorKind::ReadTimeout),
];

const CONNECT_HINTS: [(&str, TransportErrorKind); 6] = [
    ("dns", TransportErrorKind::Dns),
    ("resolve", TransportErrorKind::Dns),
    ("lookup", TransportErrorKind::Dns),
    ("tls", TransportErrorKind::Tls),
    ("ssl", TransportErrorKind::Tls),
    ("certificate", TransportErrorKind::Tls),
];

const GENERIC_HINTS: [(&str, TransportErrorKind); 2] = [
    ("tls", TransportErrorKind::Tls),
    ("ssl", TransportErrorKind::Tls),
];

fn classify_wreq_error(err: &wreq::Error) -> TransportErrorKind {
    let message = err.to_string().to_ascii_lowercase();
    let refine = |base: TransportErrorKind, hints: &[(&str, TransportErrorKind)]| {
        hints
            .iter()
            .find(|(needle, _)| message.contains(needle))
            .map_or(base, |(_, kind)| *kind)
    };

    if err.is_connection_reset() {
        TransportErrorKind::Reset
    } else if err.is_timeout() {
        refine(TransportErrorKind::Timeout, &TIMEOUT_HINTS)
    } else if err.is_connect() {
        refine(TransportErrorKind::Connect, &CONNECT_HINTS)
    } else {
        refine(TransportErrorKind::Other, &GENERIC_HINTS)
    }
}
