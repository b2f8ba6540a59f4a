use bytes::Bytes;
use serde_json::{Value, json};

/// Google RPC status name for an HTTP status code.
pub fn status_name(code: u16) -> &'static str {
    match code {
        400 => "INVALID_ARGUMENT",
        401 => "UNAUTHENTICATED",
        403 => "PERMISSION_DENIED",
        404 => "NOT_FOUND",
        429 => "RESOURCE_EXHAUSTED",
        500 => "INTERNAL",
        503 => "UNAVAILABLE",
        504 => "DEADLINE_EXCEEDED",
        _ => "UNKNOWN",
    }
}

/// Google-style error envelope, as returned by the Gemini REST API.
pub fn error_body(code: u16, message: &str) -> Value {
    json!({
        "error": {
            "code": code,
            "status": status_name(code),
            "message": message,
            "details": [],
        }
    })
}

/// A synthesised in-band SSE `error` event carrying [`error_body`].
pub fn sse_error_event(code: u16, message: &str) -> Bytes {
    let data = error_body(code, message).to_string();
    Bytes::from(format!("event: error\ndata: {data}\n\n"))
}
