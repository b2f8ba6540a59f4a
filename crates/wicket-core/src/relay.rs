//! Bidirectional WebSocket relay.
//!
//! Downstream is an axum WebSocket; upstream is a raw (TLS) socket we upgrade
//! ourselves, so the handshake carries exactly the headers we choose. Two
//! cooperative pumps share a 5-minute idle timer; when either side ends or
//! the timer fires, everything is released once.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use wicket_transport::http1::parse_preamble;
use wicket_transport::ws::{
    FrameDecoder, MessageAssembler, Opcode, WsError, masked_close_frame, masked_pong_frame,
    masked_text_frame,
};
use wicket_transport::{Headers, TargetUrl, TransportError};

use crate::state::AppState;

pub const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

const READ_BUFFER: usize = 16 * 1024;
const OUTBOUND_DEPTH: usize = 32;

#[derive(Debug, thiserror::Error)]
enum RelayError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Ws(#[from] WsError),
    #[error("upgrade handshake failed: {0}")]
    Handshake(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub fn handle_upgrade(
    ws: WebSocketUpgrade,
    state: Arc<AppState>,
    target: TargetUrl,
    headers: Headers,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        info!(event = "ws_session_open", upstream = %target.host);
        match run_relay(socket, state, &target, headers).await {
            Ok(()) => info!(event = "ws_session_closed", upstream = %target.host),
            Err(err) => warn!(event = "ws_session_failed", upstream = %target.host, error = %err),
        }
    })
}

async fn run_relay(
    mut downstream: WebSocket,
    state: Arc<AppState>,
    target: &TargetUrl,
    headers: Headers,
) -> Result<(), RelayError> {
    let stream = state.selector.raw().open_stream(target).await?;
    let (mut read_half, mut write_half) = tokio::io::split(stream);

    let key_bytes: [u8; 16] = rand::random();
    let key = BASE64.encode(key_bytes);
    let handshake = build_handshake(target, &headers, &key);
    write_half.write_all(handshake.as_bytes()).await?;
    write_half.flush().await?;

    let mut buf = BytesMut::with_capacity(READ_BUFFER);
    let preamble = loop {
        match parse_preamble(&buf).map_err(|err| RelayError::Handshake(err.to_string()))? {
            Some((preamble, consumed)) => {
                let _ = buf.split_to(consumed);
                break preamble;
            }
            None => {
                let n = read_half.read_buf(&mut buf).await?;
                if n == 0 {
                    return Err(RelayError::Handshake(
                        "connection closed during upgrade".to_string(),
                    ));
                }
            }
        }
    };
    if preamble.status != 101 || !preamble.reason.contains("Switching Protocols") {
        return Err(RelayError::Handshake(format!(
            "upstream answered {} {}",
            preamble.status, preamble.reason
        )));
    }

    // Single outbound writer; both pumps feed it encoded frames.
    let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(OUTBOUND_DEPTH);
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if write_half.write_all(&frame).await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut decoder = FrameDecoder::new();
    decoder.extend(&buf);
    let mut assembler = MessageAssembler::new();
    let mut read_buf = vec![0u8; READ_BUFFER];

    let idle = tokio::time::sleep(IDLE_TIMEOUT);
    tokio::pin!(idle);

    'session: loop {
        // Drain buffered upstream frames before waiting on IO again.
        while let Some(frame) = decoder.next_frame()? {
            let Some((opcode, payload)) = assembler.push(frame)? else {
                continue;
            };
            idle.as_mut()
                .reset(tokio::time::Instant::now() + IDLE_TIMEOUT);
            match opcode {
                Opcode::Text => {
                    let text = String::from_utf8_lossy(&payload).into_owned();
                    if downstream.send(Message::Text(text.into())).await.is_err() {
                        break 'session;
                    }
                }
                Opcode::Binary => {
                    if downstream.send(Message::Binary(payload)).await.is_err() {
                        break 'session;
                    }
                }
                Opcode::Close => {
                    debug!(event = "ws_upstream_close");
                    let _ = downstream
                        .send(Message::Close(Some(CloseFrame {
                            code: 1000,
                            reason: Utf8Bytes::from_static("upstream closed"),
                        })))
                        .await;
                    break 'session;
                }
                Opcode::Ping => {
                    // Answer with the identical payload before doing anything
                    // else with the connection.
                    if out_tx.send(masked_pong_frame(&payload)?).await.is_err() {
                        break 'session;
                    }
                }
                Opcode::Pong => {}
                Opcode::Continuation => {}
                Opcode::Other(op) => {
                    warn!(event = "ws_unknown_opcode", opcode = op);
                }
            }
        }

        tokio::select! {
            msg = downstream.recv() => match msg {
                Some(Ok(Message::Text(text))) => {
                    idle.as_mut().reset(tokio::time::Instant::now() + IDLE_TIMEOUT);
                    if out_tx.send(masked_text_frame(text.as_bytes())?).await.is_err() {
                        break 'session;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    idle.as_mut().reset(tokio::time::Instant::now() + IDLE_TIMEOUT);
                    if out_tx.send(masked_text_frame(&data)?).await.is_err() {
                        break 'session;
                    }
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    idle.as_mut().reset(tokio::time::Instant::now() + IDLE_TIMEOUT);
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(event = "ws_downstream_close");
                    let _ = out_tx.send(masked_close_frame(1000)?).await;
                    break 'session;
                }
                Some(Err(_)) => break 'session,
            },
            read = read_half.read(&mut read_buf) => match read {
                Ok(0) => break 'session,
                Ok(n) => {
                    decoder.extend(&read_buf[..n]);
                    idle.as_mut().reset(tokio::time::Instant::now() + IDLE_TIMEOUT);
                }
                Err(_) => break 'session,
            },
            _ = &mut idle => {
                info!(event = "ws_idle_timeout", upstream = %target.host);
                break 'session;
            }
        }
    }

    drop(out_tx);
    let _ = writer.await;
    Ok(())
}

fn build_handshake(target: &TargetUrl, headers: &Headers, key: &str) -> String {
    let mut out = String::with_capacity(512);
    out.push_str("GET ");
    out.push_str(&target.path_and_query);
    out.push_str(" HTTP/1.1\r\n");
    out.push_str("Host: ");
    out.push_str(&target.host_header());
    out.push_str("\r\n");
    out.push_str("Upgrade: websocket\r\n");
    out.push_str("Connection: Upgrade\r\n");
    out.push_str("Sec-WebSocket-Key: ");
    out.push_str(key);
    out.push_str("\r\n");
    out.push_str("Sec-WebSocket-Version: 13\r\n");
    for (name, value) in headers {
        if is_handshake_header(name) {
            continue;
        }
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
    out
}

/// Headers we synthesise ourselves; client-sent copies are dropped.
fn is_handshake_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("sec-websocket-") || lower == "upgrade" || lower == "connection"
}
