//! Continuation request body construction.

use serde_json::{Value, json};

/// Builds the continuation body: a deep copy of the client's original request
/// with the partial model output and a synthesised user prompt spliced into
/// `contents` right after the last `user` message (appended when there is
/// none). The original value is never mutated.
pub fn build_continuation_body(original: &Value, accumulated_text: &str, prompt: &str) -> Value {
    let mut body = original.clone();

    let model_turn = json!({
        "role": "model",
        "parts": [{ "text": accumulated_text }],
    });
    let user_turn = json!({
        "role": "user",
        "parts": [{ "text": prompt }],
    });

    if let Some(contents) = body.get_mut("contents").and_then(Value::as_array_mut) {
        let insert_at = contents
            .iter()
            .rposition(|message| {
                message.get("role").and_then(Value::as_str) == Some("user")
            })
            .map(|index| index + 1)
            .unwrap_or(contents.len());
        contents.insert(insert_at, model_turn);
        contents.insert(insert_at + 1, user_turn);
    }

    body
}
