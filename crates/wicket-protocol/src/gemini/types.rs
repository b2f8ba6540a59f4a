use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type JsonValue = Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentRole {
    User,
    Model,
}

/// One streamed chunk of a `streamGenerateContent` response.
///
/// Only the fields the continuation engine interprets are typed; everything
/// else rides along untouched because chunks are forwarded verbatim from the
/// raw SSE lines, never re-serialized from this struct.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamChunk {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<Content>,
    /// Kept as the raw wire string so unknown values classify as abnormal
    /// instead of failing the parse.
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<ContentRole>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_code: Option<JsonValue>,
}

impl Part {
    pub fn is_thought(&self) -> bool {
        self.thought == Some(true)
    }

    pub fn is_tool_use(&self) -> bool {
        self.function_call.is_some() || self.tool_code.is_some()
    }
}

impl StreamChunk {
    pub fn first_candidate(&self) -> Option<&Candidate> {
        self.candidates.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_streamed_candidate() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"hi","thought":true}],"role":"model"},"finishReason":"STOP"}],"usageMetadata":{"totalTokenCount":3}}"#;
        let chunk: StreamChunk = serde_json::from_str(raw).unwrap();
        let candidate = chunk.first_candidate().unwrap();
        assert_eq!(candidate.finish_reason.as_deref(), Some("STOP"));
        let parts = &candidate.content.as_ref().unwrap().parts;
        assert!(parts[0].is_thought());
        assert_eq!(parts[0].text.as_deref(), Some("hi"));
    }

    #[test]
    fn tolerates_unknown_finish_reason() {
        let raw = r#"{"candidates":[{"finishReason":"SOMETHING_NEW"}]}"#;
        let chunk: StreamChunk = serde_json::from_str(raw).unwrap();
        assert_eq!(
            chunk.first_candidate().unwrap().finish_reason.as_deref(),
            Some("SOMETHING_NEW")
        );
    }

    #[test]
    fn tool_call_parts() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"get_weather","args":{}}}]}}]}"#;
        let chunk: StreamChunk = serde_json::from_str(raw).unwrap();
        let parts = &chunk.candidates[0].content.as_ref().unwrap().parts;
        assert!(parts[0].is_tool_use());
        assert!(!parts[0].is_thought());
    }
}
