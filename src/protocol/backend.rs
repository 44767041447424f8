//! Interpretation of decoded backend frames.
//!
//! Dispatch is on `:message-type` first (`event`, `error`, `exception`;
//! anything else is treated as `event`) and then on `:event-type` against a
//! closed set of payload schemas.

use serde::Deserialize;

use crate::eventstream::Frame;

pub const ASSISTANT_RESPONSE_EVENT: &str = "assistantResponseEvent";
pub const TOOL_USE_EVENT: &str = "toolUseEvent";
pub const CONTEXT_USAGE_EVENT: &str = "contextUsageEvent";
pub const METERING_EVENT: &str = "meteringEvent";

/// Incremental piece of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolUseDelta {
    pub tool_id: String,
    pub tool_name: String,
    pub input_fragment: String,
    pub is_final: bool,
}

/// Backend-agnostic meaning of one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SemanticEvent {
    TextDelta(String),
    ToolUseDelta(ToolUseDelta),
    /// Context window usage, 0 to 100.
    UsagePercent(f64),
    ServiceError { code: String, message: String },
    ServiceException { kind: String, message: String },
    Heartbeat,
    Unknown,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct AssistantResponsePayload {
    content: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ToolUsePayload {
    name: String,
    tool_use_id: String,
    input: String,
    stop: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ContextUsagePayload {
    context_usage_percentage: f64,
}

/// A recognized event type whose payload did not match its schema. The
/// event is dropped; the stream continues.
#[derive(Debug, thiserror::Error)]
#[error("malformed {event_type} payload: {source}")]
pub struct MapError {
    pub event_type: &'static str,
    #[source]
    pub source: serde_json::Error,
}

fn parse_payload<'a, T: Deserialize<'a>>(
    event_type: &'static str,
    payload: &'a [u8],
) -> Result<T, MapError> {
    serde_json::from_slice(payload).map_err(|source| MapError { event_type, source })
}

/// Map one frame to its [`SemanticEvent`].
///
/// # Errors
///
/// Returns [`MapError`] when a recognized event type carries a payload that
/// is not valid JSON for its schema.
pub fn map_frame(frame: &Frame) -> Result<SemanticEvent, MapError> {
    match frame.message_type() {
        Some("error") => Ok(SemanticEvent::ServiceError {
            code: frame.headers.error_code().unwrap_or_default().to_owned(),
            message: String::from_utf8_lossy(&frame.payload).into_owned(),
        }),
        Some("exception") => Ok(SemanticEvent::ServiceException {
            kind: frame.headers.exception_type().unwrap_or_default().to_owned(),
            message: String::from_utf8_lossy(&frame.payload).into_owned(),
        }),
        _ => map_event_frame(frame),
    }
}

fn map_event_frame(frame: &Frame) -> Result<SemanticEvent, MapError> {
    let payload = &frame.payload[..];
    match frame.event_type() {
        Some(ASSISTANT_RESPONSE_EVENT) => {
            let parsed: AssistantResponsePayload = parse_payload(ASSISTANT_RESPONSE_EVENT, payload)?;
            Ok(SemanticEvent::TextDelta(parsed.content))
        }
        Some(TOOL_USE_EVENT) => {
            let parsed: ToolUsePayload = parse_payload(TOOL_USE_EVENT, payload)?;
            Ok(SemanticEvent::ToolUseDelta(ToolUseDelta {
                tool_id: parsed.tool_use_id,
                tool_name: parsed.name,
                input_fragment: parsed.input,
                is_final: parsed.stop,
            }))
        }
        Some(CONTEXT_USAGE_EVENT) => {
            let parsed: ContextUsagePayload = parse_payload(CONTEXT_USAGE_EVENT, payload)?;
            Ok(SemanticEvent::UsagePercent(parsed.context_usage_percentage))
        }
        Some(METERING_EVENT) => Ok(SemanticEvent::Heartbeat),
        other => {
            tracing::debug!(event_type = other.unwrap_or(""), "unknown backend event type");
            Ok(SemanticEvent::Unknown)
        }
    }
}
