//! Per-route transport selection and fallback.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::client::ClientTransport;
use crate::failure::{TransportError, TransportErrorKind};
use crate::raw::RawSocketTransport;
use crate::{RequestEnvelope, Transport, UpstreamResponse};

/// One failed delivery attempt, kept for the bad-gateway report.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub transport: &'static str,
    pub message: String,
    pub elapsed: Duration,
}

#[derive(Debug, thiserror::Error)]
#[error("all transports failed: {}", describe(.attempts))]
pub struct SelectorError {
    pub attempts: Vec<AttemptRecord>,
}

fn describe(attempts: &[AttemptRecord]) -> String {
    attempts
        .iter()
        .map(|a| format!("{} after {}ms: {}", a.transport, a.elapsed.as_millis(), a.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Picks the raw socket or the runtime client per route, falling back from
/// the former to the latter on network-shaped failures. The envelope is
/// cloned before every attempt so both paths see identical input.
pub struct TransportSelector {
    raw: RawSocketTransport,
    client: ClientTransport,
    aggressive_fallback: bool,
}

impl TransportSelector {
    pub fn new(aggressive_fallback: bool) -> Result<Self, TransportError> {
        Ok(Self {
            raw: RawSocketTransport::new(),
            client: ClientTransport::new()?,
            aggressive_fallback,
        })
    }

    pub fn raw(&self) -> &RawSocketTransport {
        &self.raw
    }

    pub async fn dispatch(
        &self,
        prefer_client: bool,
        req: &RequestEnvelope,
    ) -> Result<UpstreamResponse, SelectorError> {
        if prefer_client {
            let started = Instant::now();
            return self.client.send(req.clone()).await.map_err(|err| {
                SelectorError {
                    attempts: vec![record("client", &err, started)],
                }
            });
        }

        let raw_started = Instant::now();
        let raw_err = match self.raw.send(req.clone()).await {
            Ok(response) => return Ok(response),
            Err(err) => err,
        };

        let eligible = self.aggressive_fallback || raw_err.is_fallback_eligible();
        if !eligible {
            warn!(
                event = "raw_transport_failed",
                host = %req.target.host,
                error = %raw_err,
                fallback = false
            );
            return Err(SelectorError {
                attempts: vec![record("raw", &raw_err, raw_started)],
            });
        }

        debug!(
            event = "raw_transport_failed",
            host = %req.target.host,
            error = %raw_err,
            fallback = true
        );
        let raw_record = record("raw", &raw_err, raw_started);

        let client_started = Instant::now();
        match self.client.send(req.clone()).await {
            Ok(response) => Ok(response),
            Err(client_err) => Err(SelectorError {
                attempts: vec![raw_record, record("client", &client_err, client_started)],
            }),
        }
    }
}

fn record(transport: &'static str, err: &TransportError, started: Instant) -> AttemptRecord {
    AttemptRecord {
        transport,
        message: err.message.clone(),
        elapsed: started.elapsed(),
    }
}

/// A selector pre-bound to one route's transport preference, usable wherever
/// a plain [`Transport`] is expected (the continuation engine re-dispatches
/// its retries through this seam).
pub struct BoundSelector {
    selector: Arc<TransportSelector>,
    prefer_client: bool,
}

impl BoundSelector {
    pub fn new(selector: Arc<TransportSelector>, prefer_client: bool) -> Self {
        Self {
            selector,
            prefer_client,
        }
    }
}

impl Transport for BoundSelector {
    fn send<'a>(
        &'a self,
        req: RequestEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            self.selector
                .dispatch(self.prefer_client, &req)
                .await
                .map_err(|err| TransportError::new(TransportErrorKind::Other, err.to_string()))
        })
    }
}
