//! Resilient-SSE continuation engine for Gemini-family streams.
//!
//! Consumes an upstream `streamGenerateContent?alt=sse` response, forwards
//! every line downstream verbatim, and when the stream dies without a usable
//! finish, rebuilds the conversation (partial output spliced back in as a
//! model turn plus a synthesised "continue" user turn) and re-dispatches it
//! through the transport seam — so the client sees one uninterrupted stream.
//!
//! Once the downstream 200 is committed, no further HTTP status can be
//! communicated; every later failure is an in-band SSE `error` event.

pub mod body;
pub mod language;
pub mod prompts;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use wicket_common::Config;
use wicket_protocol::gemini::StreamChunk;
use wicket_protocol::{google, sse};
use wicket_transport::{ByteStream, Headers, RequestEnvelope, Transport, UpstreamResponse};

use body::build_continuation_body;
use language::detect_language;
use prompts::RetryPrompts;

pub const DEFAULT_MAX_CONSECUTIVE_RETRIES: u32 = 5;
pub const DEFAULT_MAX_NETWORK_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(750);

const NETWORK_BACKOFF_STEP_MS: u64 = 2_000;
const NETWORK_BACKOFF_CAP_MS: u64 = 10_000;
const NON_RETRYABLE_STATUSES: [u16; 5] = [400, 401, 403, 404, 429];

/// Only these request headers ever reach the Gemini upstream.
const FORWARDED_HEADERS: [&str; 4] = ["authorization", "x-goog-api-key", "content-type", "accept"];

const DOWNSTREAM_CHANNEL_DEPTH: usize = 32;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_consecutive_retries: u32,
    pub max_network_retries: u32,
    pub retry_delay: Duration,
    pub prompts: RetryPrompts,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_consecutive_retries: DEFAULT_MAX_CONSECUTIVE_RETRIES,
            max_network_retries: DEFAULT_MAX_NETWORK_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            prompts: RetryPrompts::new(
                config.gemini_retry_prompt_en.clone(),
                config.gemini_retry_prompt_cn.clone(),
            ),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_consecutive_retries: DEFAULT_MAX_CONSECUTIVE_RETRIES,
            max_network_retries: DEFAULT_MAX_NETWORK_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            prompts: RetryPrompts::default(),
        }
    }
}

/// Outcome of [`ContinuationEngine::run`].
pub enum EngineResult {
    /// The initial upstream exchange failed; nothing was committed downstream.
    Error { status: u16, body: Bytes },
    /// Committed `200 text/event-stream`; all further failures arrive in-band.
    Stream { body: ByteStream },
}

#[derive(Clone)]
pub struct ContinuationEngine {
    transport: Arc<dyn Transport>,
    settings: Arc<EngineSettings>,
}

#[derive(Debug)]
struct Session {
    accumulated_text: String,
    consecutive_retries: u32,
    network_retries: u32,
    saw_final_answer_content: bool,
    saw_tool_calls: bool,
    original_body: Value,
}

impl Session {
    fn new(original_body: Value) -> Self {
        Self {
            accumulated_text: String::new(),
            consecutive_retries: 0,
            network_retries: 0,
            saw_final_answer_content: false,
            saw_tool_calls: false,
            original_body,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interruption {
    Drop,
    DropDuringToolUse,
    StopWithoutSufficientContent,
    FinishAbnormal,
}

enum AttemptOutcome {
    Done,
    DownstreamClosed,
    Interrupted(Interruption),
}

enum LineAction {
    Continue,
    Done,
    Closed,
    Interrupted(Interruption),
}

impl ContinuationEngine {
    pub fn new(transport: Arc<dyn Transport>, settings: Arc<EngineSettings>) -> Self {
        Self {
            transport,
            settings,
        }
    }

    /// Runs one downstream request through the engine. `req` carries the
    /// client's raw body; `original_body` is its parsed JSON, kept for
    /// rebuilding continuation bodies.
    pub async fn run(&self, mut req: RequestEnvelope, original_body: Value) -> EngineResult {
        req.headers = continuation_headers(&req.headers);

        let initial = match self.transport.send(req.clone()).await {
            Ok(response) => response,
            Err(err) => {
                warn!(event = "gemini_initial_failure", error = %err);
                return EngineResult::Error {
                    status: 502,
                    body: Bytes::from(google::error_body(502, &err.to_string()).to_string()),
                };
            }
        };

        if !initial.is_success() {
            let status = initial.status;
            let raw = initial.collect_body().await;
            let message = upstream_error_message(&raw, status);
            warn!(event = "gemini_initial_failure", status, message = %message);
            return EngineResult::Error {
                status,
                body: Bytes::from(google::error_body(status, &message).to_string()),
            };
        }

        let (tx, rx) = mpsc::channel::<Bytes>(DOWNSTREAM_CHANNEL_DEPTH);
        let engine = self.clone();
        // The writer lives in `tx`; whatever happens inside the task (panics
        // included), dropping it closes the downstream stream exactly once.
        tokio::spawn(async move {
            engine.run_session(req, original_body, initial, tx).await;
        });

        EngineResult::Stream { body: rx }
    }

    async fn run_session(
        &self,
        base: RequestEnvelope,
        original_body: Value,
        first: UpstreamResponse,
        tx: mpsc::Sender<Bytes>,
    ) {
        let mut session = Session::new(original_body);
        let mut response = first;
        loop {
            match self.consume_attempt(&mut session, response, &tx).await {
                AttemptOutcome::Done => {
                    info!(
                        event = "gemini_stream_complete",
                        retries = session.consecutive_retries,
                        accumulated_chars = session.accumulated_text.chars().count(),
                    );
                    return;
                }
                AttemptOutcome::DownstreamClosed => {
                    debug!(event = "gemini_downstream_closed");
                    return;
                }
                AttemptOutcome::Interrupted(interruption) => {
                    warn!(
                        event = "gemini_stream_interrupted",
                        kind = ?interruption,
                        consecutive_retries = session.consecutive_retries,
                    );
                    match self.recover(&mut session, &base, &tx).await {
                        Some(next) => response = next,
                        None => return,
                    }
                }
            }
        }
    }

    /// Inner loop for one upstream attempt. Dropping `response` at the end
    /// cancels the upstream reader for this attempt.
    async fn consume_attempt(
        &self,
        session: &mut Session,
        mut response: UpstreamResponse,
        tx: &mpsc::Sender<Bytes>,
    ) -> AttemptOutcome {
        let mut lines = sse::SseLineReader::new();
        while let Some(chunk) = response.body.recv().await {
            for line in lines.push_bytes(&chunk) {
                match self.handle_line(session, &line, tx).await {
                    LineAction::Continue => {}
                    LineAction::Done => return AttemptOutcome::Done,
                    LineAction::Closed => return AttemptOutcome::DownstreamClosed,
                    LineAction::Interrupted(kind) => return AttemptOutcome::Interrupted(kind),
                }
            }
        }
        if let Some(line) = lines.finish() {
            match self.handle_line(session, &line, tx).await {
                LineAction::Continue => {}
                LineAction::Done => return AttemptOutcome::Done,
                LineAction::Closed => return AttemptOutcome::DownstreamClosed,
                LineAction::Interrupted(kind) => return AttemptOutcome::Interrupted(kind),
            }
        }
        // Stream ended without a finish reason.
        AttemptOutcome::Interrupted(if session.saw_tool_calls {
            Interruption::DropDuringToolUse
        } else {
            Interruption::Drop
        })
    }

    /// Forwards the line downstream first, then interprets it. The client
    /// always sees the raw upstream events, including an interrupted finish
    /// reason that a later continuation supersedes.
    async fn handle_line(
        &self,
        session: &mut Session,
        line: &str,
        tx: &mpsc::Sender<Bytes>,
    ) -> LineAction {
        if line.is_empty() {
            return LineAction::Continue;
        }
        if tx
            .send(Bytes::from(format!("{line}\n\n")))
            .await
            .is_err()
        {
            return LineAction::Closed;
        }

        let Some(payload) = sse::data_payload(line) else {
            return LineAction::Continue;
        };
        let Ok(chunk) = serde_json::from_str::<StreamChunk>(payload) else {
            return LineAction::Continue;
        };
        let Some(candidate) = chunk.first_candidate() else {
            return LineAction::Continue;
        };

        if let Some(content) = &candidate.content {
            for part in &content.parts {
                if let Some(text) = &part.text {
                    session.accumulated_text.push_str(text);
                    if !part.is_thought() {
                        session.saw_final_answer_content = true;
                    }
                }
                if part.is_tool_use() {
                    session.saw_tool_calls = true;
                }
            }
        }

        if let Some(reason) = candidate.finish_reason.as_deref() {
            return match reason {
                "STOP" => {
                    if session.saw_final_answer_content || session.saw_tool_calls {
                        LineAction::Done
                    } else if session.accumulated_text.chars().count() > 100 {
                        // Long thought-only output still counts as an answer.
                        LineAction::Done
                    } else {
                        LineAction::Interrupted(Interruption::StopWithoutSufficientContent)
                    }
                }
                // Upstream-chosen stop conditions are terminal, never retried.
                "MAX_TOKENS" | "TOOL_CODE" | "SAFETY" | "RECITATION" => LineAction::Done,
                _ => LineAction::Interrupted(Interruption::FinishAbnormal),
            };
        }

        LineAction::Continue
    }

    /// Retry procedure. Returns the next upstream response to consume, or
    /// `None` once a terminal SSE error event has been emitted.
    async fn recover(
        &self,
        session: &mut Session,
        base: &RequestEnvelope,
        tx: &mpsc::Sender<Bytes>,
    ) -> Option<UpstreamResponse> {
        if session.consecutive_retries >= self.settings.max_consecutive_retries {
            let _ = tx
                .send(google::sse_error_event(
                    504,
                    "stream retry budget exhausted; upstream kept dropping the response",
                ))
                .await;
            return None;
        }

        loop {
            tokio::time::sleep(self.settings.retry_delay).await;

            let lang = detect_language(&session.accumulated_text);
            let prompt = self.settings.prompts.for_language(lang);
            let continuation =
                build_continuation_body(&session.original_body, &session.accumulated_text, prompt);
            let mut req = base.clone();
            req.body = Some(Bytes::from(continuation.to_string()));

            debug!(
                event = "gemini_continuation_dispatch",
                language = lang,
                consecutive_retries = session.consecutive_retries,
                network_retries = session.network_retries,
            );

            let failure = match self.transport.send(req).await {
                Ok(response) if response.is_success() => {
                    session.network_retries = 0;
                    session.consecutive_retries += 1;
                    info!(
                        event = "gemini_continuation_resumed",
                        consecutive_retries = session.consecutive_retries,
                    );
                    return Some(response);
                }
                Ok(response) => {
                    let status = response.status;
                    if NON_RETRYABLE_STATUSES.contains(&status) {
                        let raw = response.collect_body().await;
                        let message = upstream_error_message(&raw, status);
                        let _ = tx.send(google::sse_error_event(status, &message)).await;
                        return None;
                    }
                    format!("upstream returned status {status} during continuation")
                }
                Err(err) => err.to_string(),
            };

            session.network_retries += 1;
            if session.network_retries > self.settings.max_network_retries {
                let _ = tx.send(google::sse_error_event(502, &failure)).await;
                return None;
            }
            let backoff = Duration::from_millis(
                (session.network_retries as u64 * NETWORK_BACKOFF_STEP_MS)
                    .min(NETWORK_BACKOFF_CAP_MS),
            );
            warn!(
                event = "gemini_continuation_network_retry",
                network_retries = session.network_retries,
                backoff_ms = backoff.as_millis() as u64,
                error = %failure,
            );
            tokio::time::sleep(backoff).await;
        }
    }
}

/// Keeps only the headers the Gemini upstream should ever see.
pub fn continuation_headers(headers: &Headers) -> Headers {
    headers
        .iter()
        .filter(|(name, _)| {
            let lower = name.to_ascii_lowercase();
            FORWARDED_HEADERS.contains(&lower.as_str())
        })
        .cloned()
        .collect()
}

fn upstream_error_message(raw: &Bytes, status: u16) -> String {
    if let Ok(value) = serde_json::from_slice::<Value>(raw)
        && let Some(message) = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
    {
        return message.to_string();
    }
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    if text.is_empty() {
        format!("upstream returned status {status}")
    } else {
        let mut out: String = text.chars().take(512).collect();
        if out.len() < text.len() {
            out.push('…');
        }
        out
    }
}
