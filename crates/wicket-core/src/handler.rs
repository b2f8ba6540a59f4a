use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use wicket_transport::{
    RequestEnvelope, UpstreamResponse, filter_forward_headers, from_http_headers,
};

use crate::classify::{RouteTarget, classify_path};
use crate::engine::{ContinuationEngine, EngineResult};
use crate::error::{ProxyError, apply_cors, iso_timestamp, preflight_response};
use crate::relay;
use crate::state::AppState;

/// Response headers that must not be copied through: the body is re-framed by
/// this server, and connection-scoped headers never cross a proxy.
const HOP_HEADERS: [&str; 5] = [
    "connection",
    "transfer-encoding",
    "content-length",
    "keep-alive",
    "proxy-connection",
];

pub async fn landing() -> Response {
    let body = concat!(
        "<!doctype html><html><head><title>wicket</title></head>",
        "<body><h1>wicket</h1><p>Multi-tenant LLM gateway is running.</p>",
        "<p>Preset routes are served under <code>/&lt;route&gt;/...</code>; ",
        "the generic pass-through lives under ",
        "<code>/&lt;token&gt;/&lt;scheme&gt;/&lt;host&gt;/...</code>.</p></body></html>"
    );
    let mut resp = Response::new(Body::from(body));
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    apply_cors(&mut resp);
    resp
}

pub async fn probe(method: Method) -> Response {
    if method == Method::OPTIONS {
        return preflight_response();
    }
    let body = json!({
        "status": "ok",
        "timestamp": iso_timestamp(),
    });
    let mut resp = Response::new(Body::from(body.to_string()));
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    apply_cors(&mut resp);
    resp
}

pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    req: axum::extract::Request,
) -> Response {
    let (mut parts, raw_body) = req.into_parts();
    if parts.method == Method::OPTIONS {
        return preflight_response();
    }

    let trace_id = Uuid::new_v4().to_string();
    let started = Instant::now();
    let method = parts.method.clone();
    let path = parts.uri.path().to_string();
    let query = parts.uri.query().map(|q| q.to_string());

    let target = match classify_path(&state.config, &state.routes, &path, query.as_deref()) {
        Ok(target) => target,
        Err(err) => {
            info!(
                event = "downstream_rejected",
                trace_id = %trace_id,
                path = %path,
                status = err.status.as_u16(),
            );
            return err.into_response();
        }
    };

    info!(
        event = "downstream_received",
        trace_id = %trace_id,
        method = %method,
        path = %path,
        route = target.route().map(|r| r.id.as_str()).unwrap_or("generic"),
        upstream = %target.target().host,
    );

    if wants_websocket(&parts.headers) {
        let upstream_headers = filter_forward_headers(&from_http_headers(&parts.headers));
        return match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
            Ok(ws) => relay::handle_upgrade(
                ws,
                state.clone(),
                target.target().clone(),
                upstream_headers,
            ),
            Err(_) => ProxyError::bad_request("upgrade requested without a websocket handshake")
                .into_response(),
        };
    }

    let body = match axum::body::to_bytes(raw_body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return ProxyError::bad_request(format!("failed to read request body: {err}"))
                .into_response();
        }
    };

    let envelope = RequestEnvelope {
        method: method.clone(),
        target: target.target().clone(),
        headers: filter_forward_headers(&from_http_headers(&parts.headers)),
        body: if body.is_empty() { None } else { Some(body) },
    };

    if let Some(original_body) = engine_eligible(&state, &target, &method, &envelope) {
        let transport = Arc::new(wicket_transport::selector::BoundSelector::new(
            state.selector.clone(),
            target.route().map(|r| r.prefer_client).unwrap_or(false),
        ));
        let engine = ContinuationEngine::new(transport, state.engine_settings.clone());
        let resp = match engine.run(envelope, original_body).await {
            EngineResult::Error { status, body } => gemini_error_response(status, body),
            EngineResult::Stream { body } => sse_response(body),
        };
        info!(
            event = "downstream_responded",
            trace_id = %trace_id,
            status = resp.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            engine = true,
        );
        return resp;
    }

    let prefer_client = target.route().map(|r| r.prefer_client).unwrap_or(false);
    match state.selector.dispatch(prefer_client, &envelope).await {
        Ok(upstream) => {
            let resp = passthrough_response(upstream);
            info!(
                event = "downstream_responded",
                trace_id = %trace_id,
                status = resp.status().as_u16(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                engine = false,
            );
            resp
        }
        Err(err) => {
            warn!(
                event = "upstream_unreachable",
                trace_id = %trace_id,
                upstream = %envelope.target.host,
                error = %err,
            );
            let attempts: Vec<Value> = err
                .attempts
                .iter()
                .map(|a| {
                    json!({
                        "transport": a.transport,
                        "message": a.message,
                        "duration_ms": a.elapsed.as_millis() as u64,
                    })
                })
                .collect();
            ProxyError::bad_gateway("all upstream transports failed")
                .with_details(Value::Array(attempts))
                .into_response()
        }
    }
}

fn wants_websocket(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
}

/// The continuation engine only engages for Gemini-family streaming POSTs
/// whose body is a JSON conversation; everything else proxies transparently.
fn engine_eligible(
    state: &AppState,
    target: &RouteTarget,
    method: &Method,
    envelope: &RequestEnvelope,
) -> Option<Value> {
    if !state.config.gemini_special_handling_enabled || *method != Method::POST {
        return None;
    }
    let is_gemini = match target {
        RouteTarget::Preset { route, .. } => route.is_gemini(),
        RouteTarget::Generic { target } => target.host.contains("generativelanguage"),
    };
    if !is_gemini {
        return None;
    }
    let force_stream = target.route().map(|r| r.force_stream).unwrap_or(false);
    if !force_stream && !query_has_alt_sse(envelope.target.query()) {
        return None;
    }
    let body = envelope.body.as_ref()?;
    let value: Value = serde_json::from_slice(body).ok()?;
    value.get("contents")?.as_array()?;
    Some(value)
}

fn query_has_alt_sse(query: Option<&str>) -> bool {
    query.is_some_and(|query| {
        query
            .split('&')
            .any(|pair| pair.split_once('=') == Some(("alt", "sse")))
    })
}

fn passthrough_response(upstream: UpstreamResponse) -> Response {
    let status =
        StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut resp = Response::new(Body::from_stream(
        ReceiverStream::new(upstream.body).map(Ok::<Bytes, Infallible>),
    ));
    *resp.status_mut() = status;
    for (name, value) in &upstream.headers {
        if HOP_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            header::HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            resp.headers_mut().append(name, value);
        }
    }
    apply_cors(&mut resp);
    resp
}

fn sse_response(body: wicket_transport::ByteStream) -> Response {
    let mut resp = Response::new(Body::from_stream(
        ReceiverStream::new(body).map(Ok::<Bytes, Infallible>),
    ));
    let headers = resp.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    apply_cors(&mut resp);
    resp
}

fn gemini_error_response(status: u16, body: Bytes) -> Response {
    let mut resp = Response::new(Body::from(body));
    *resp.status_mut() =
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    apply_cors(&mut resp);
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use wicket_common::Config;
    use wicket_transport::{Scheme, TargetUrl};

    fn gemini_envelope(query: &str, body: &str) -> RequestEnvelope {
        RequestEnvelope {
            method: Method::POST,
            target: TargetUrl {
                scheme: Scheme::Https,
                host: "generativelanguage.googleapis.com".to_string(),
                port: None,
                path_and_query: format!(
                    "/v1beta/models/gemini-pro:streamGenerateContent{query}"
                ),
            },
            headers: Vec::new(),
            body: Some(Bytes::from(body.to_string())),
        }
    }

    fn state() -> AppState {
        AppState::from_config(Config::default()).unwrap()
    }

    fn gemini_target(state: &AppState, query: Option<&str>) -> RouteTarget {
        classify_path(
            &state.config,
            &state.routes,
            "/gemini/v1beta/models/gemini-pro:streamGenerateContent",
            query,
        )
        .unwrap()
    }

    #[test]
    fn engine_requires_alt_sse() {
        let state = state();
        let body = r#"{"contents":[{"role":"user","parts":[{"text":"hi"}]}]}"#;

        let streaming = gemini_target(&state, Some("alt=sse"));
        let envelope = gemini_envelope("?alt=sse", body);
        assert!(engine_eligible(&state, &streaming, &Method::POST, &envelope).is_some());

        let plain = gemini_target(&state, None);
        let envelope = gemini_envelope("", body);
        assert!(engine_eligible(&state, &plain, &Method::POST, &envelope).is_none());
    }

    #[test]
    fn engine_requires_contents_array() {
        let state = state();
        let target = gemini_target(&state, Some("alt=sse"));
        let envelope = gemini_envelope("?alt=sse", r#"{"foo":1}"#);
        assert!(engine_eligible(&state, &target, &Method::POST, &envelope).is_none());
    }

    #[test]
    fn engine_skipped_when_disabled() {
        let mut config = Config::default();
        config.gemini_special_handling_enabled = false;
        let state = AppState::from_config(config).unwrap();
        let target = gemini_target(&state, Some("alt=sse"));
        let envelope = gemini_envelope(
            "?alt=sse",
            r#"{"contents":[{"role":"user","parts":[{"text":"hi"}]}]}"#,
        );
        assert!(engine_eligible(&state, &target, &Method::POST, &envelope).is_none());
    }

    #[test]
    fn engine_ignores_non_gemini_routes() {
        let state = state();
        let target = classify_path(
            &state.config,
            &state.routes,
            "/openai/v1/chat/completions",
            Some("alt=sse"),
        )
        .unwrap();
        let envelope = gemini_envelope(
            "?alt=sse",
            r#"{"contents":[{"role":"user","parts":[{"text":"hi"}]}]}"#,
        );
        assert!(engine_eligible(&state, &target, &Method::POST, &envelope).is_none());
    }

    #[test]
    fn alt_sse_query_matching() {
        assert!(query_has_alt_sse(Some("alt=sse")));
        assert!(query_has_alt_sse(Some("key=abc&alt=sse")));
        assert!(!query_has_alt_sse(Some("alt=json")));
        assert!(!query_has_alt_sse(Some("salt=sse")));
        assert!(!query_has_alt_sse(None));
    }

    #[test]
    fn websocket_detection_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert(header::UPGRADE, HeaderValue::from_static("WebSocket"));
        assert!(wants_websocket(&headers));
        assert!(!wants_websocket(&HeaderMap::new()));
    }
}
