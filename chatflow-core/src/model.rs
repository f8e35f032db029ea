use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Stop,
    Length,
    ToolUse,
    ContentFilter,
    Other,
}

/// Normalize a wire `finish_reason` string into a [`StopReason`].
pub fn map_finish(s: Option<&str>) -> Option<StopReason> {
    match s {
        Some("stop") => Some(StopReason::Stop),
        Some("length") => Some(StopReason::Length),
        Some("content_filter") => Some(StopReason::ContentFilter),
        Some("tool_calls") => Some(StopReason::ToolUse),
        Some(_) => Some(StopReason::Other),
        None => None,
    }
}

/// One element of a conversation. Immutable once sent; the order of the
/// sequence is the model's context order.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Token accounting as reported by the endpoint. Field names match the
/// wire schema so the same struct deserializes response bodies and
/// terminal stream chunks.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// The aggregated outcome of one session: accumulated content plus
/// whatever accounting the endpoint reported. Built incrementally inside
/// the session and handed to the caller exactly once, at stream end.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Completion {
    pub id: String,
    pub created: i64,
    pub content: String,
    pub usage: Option<Usage>,
    pub stop_reason: Option<StopReason>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_json_roundtrip_lowercase() {
        let json = r#"{"role":"assistant","content":"ok"}"#;
        let msg: ChatMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        let back = serde_json::to_string(&msg).unwrap();
        assert!(back.contains("\"assistant\""));
    }

    #[test]
    fn finish_reason_mapping() {
        assert_eq!(map_finish(Some("stop")), Some(StopReason::Stop));
        assert_eq!(map_finish(Some("length")), Some(StopReason::Length));
        assert_eq!(
            map_finish(Some("content_filter")),
            Some(StopReason::ContentFilter)
        );
        assert_eq!(map_finish(Some("tool_calls")), Some(StopReason::ToolUse));
        assert_eq!(map_finish(Some("weird")), Some(StopReason::Other));
        assert_eq!(map_finish(None), None);
    }

    #[test]
    fn usage_parses_wire_names() {
        let json = r#"{"prompt_tokens":3,"completion_tokens":1,"total_tokens":4}"#;
        let usage: Usage = serde_json::from_str(json).unwrap();
        assert_eq!(usage.prompt_tokens, 3);
        assert_eq!(usage.completion_tokens, 1);
        assert_eq!(usage.total_tokens, 4);
    }

    #[test]
    fn usage_missing_total_defaults() {
        let json = r#"{"prompt_tokens":3,"completion_tokens":1}"#;
        let usage: Usage = serde_json::from_str(json).unwrap();
        assert_eq!(usage.total_tokens, 0);
    }

    #[test]
    fn completion_roundtrip() {
        let resp = Completion {
            id: "cmpl_1".to_string(),
            created: 1234567890,
            content: "Hello back".to_string(),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 20,
                total_tokens: 30,
            }),
            stop_reason: Some(StopReason::Stop),
        };
        let json = serde_json::to_string(&resp).unwrap();
        let de: Completion = serde_json::from_str(&json).unwrap();
        assert_eq!(resp, de);
    }
}
