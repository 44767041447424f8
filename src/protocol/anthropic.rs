//! Anthropic Messages output shapes: the SSE event union and the aggregate
//! non-streaming response.

use serde::{Deserialize, Serialize};

/// Terminal classification of why a response ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    ModelContextWindowExceeded,
}

impl StopReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::EndTurn => "end_turn",
            StopReason::ToolUse => "tool_use",
            StopReason::MaxTokens => "max_tokens",
            StopReason::ModelContextWindowExceeded => "model_context_window_exceeded",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A content block as announced by `content_block_start` or carried in a
/// [`MessageResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

impl ContentBlock {
    #[must_use]
    pub fn empty_text() -> Self {
        ContentBlock::Text {
            text: String::new(),
        }
    }

    #[must_use]
    pub fn empty_thinking() -> Self {
        ContentBlock::Thinking {
            thinking: String::new(),
        }
    }

    #[must_use]
    pub fn tool_use(id: &str, name: &str) -> Self {
        ContentBlock::ToolUse {
            id: id.to_owned(),
            name: name.to_owned(),
            input: serde_json::Value::Object(serde_json::Map::new()),
        }
    }
}

/// Delta variants for `content_block_delta`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockDelta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    InputJsonDelta { partial_json: String },
}

/// The `message` object inside `message_start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageStartBody {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub role: String,
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub stop_reason: Option<StopReason>,
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

/// The `delta` object inside `message_delta`. Both fields always serialize,
/// `stop_sequence` as `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDeltaBody {
    pub stop_reason: StopReason,
    pub stop_sequence: Option<String>,
}

/// One Anthropic SSE stream event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputEvent {
    MessageStart {
        message: MessageStartBody,
    },
    ContentBlockStart {
        index: usize,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        usage: Usage,
    },
    MessageStop {},
    Ping {},
}

impl OutputEvent {
    /// SSE `event:` name, identical to the `type` tag.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            OutputEvent::MessageStart { .. } => "message_start",
            OutputEvent::ContentBlockStart { .. } => "content_block_start",
            OutputEvent::ContentBlockDelta { .. } => "content_block_delta",
            OutputEvent::ContentBlockStop { .. } => "content_block_stop",
            OutputEvent::MessageDelta { .. } => "message_delta",
            OutputEvent::MessageStop {} => "message_stop",
            OutputEvent::Ping {} => "ping",
        }
    }

    /// Block index for the three `content_block_*` events.
    #[must_use]
    pub fn block_index(&self) -> Option<usize> {
        match self {
            OutputEvent::ContentBlockStart { index, .. }
            | OutputEvent::ContentBlockDelta { index, .. }
            | OutputEvent::ContentBlockStop { index } => Some(*index),
            _ => None,
        }
    }
}

/// Aggregate response for a non-streaming caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub role: String,
    pub model: String,
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<StopReason>,
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_delta_serializes_null_stop_sequence() {
        let event = OutputEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: StopReason::ToolUse,
                stop_sequence: None,
            },
            usage: Usage {
                input_tokens: 10,
                output_tokens: 3,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "message_delta",
                "delta": {"stop_reason": "tool_use", "stop_sequence": null},
                "usage": {"input_tokens": 10, "output_tokens": 3}
            })
        );
    }

    #[test]
    fn test_tool_use_block_start_has_empty_input_object() {
        let event = OutputEvent::ContentBlockStart {
            index: 2,
            content_block: ContentBlock::tool_use("t1", "Bash"),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["content_block"]["type"], "tool_use");
        assert_eq!(json["content_block"]["input"], serde_json::json!({}));
        assert_eq!(event.event_name(), "content_block_start");
        assert_eq!(event.block_index(), Some(2));
    }

    #[test]
    fn test_unit_events_serialize_type_only() {
        assert_eq!(
            serde_json::to_string(&OutputEvent::MessageStop {}).unwrap(),
            r#"{"type":"message_stop"}"#
        );
        assert_eq!(
            serde_json::to_string(&OutputEvent::Ping {}).unwrap(),
            r#"{"type":"ping"}"#
        );
    }

    #[test]
    fn test_stop_reason_strings() {
        assert_eq!(StopReason::EndTurn.as_str(), "end_turn");
        assert_eq!(
            serde_json::to_string(&StopReason::ModelContextWindowExceeded).unwrap(),
            "\"model_context_window_exceeded\""
        );
    }
}
