//! SSE wire encoding for [`OutputEvent`]s.

use crate::protocol::anthropic::OutputEvent;

/// Keepalive frame, identical to `encode_sse(&OutputEvent::Ping {})`.
pub const PING_FRAME: &str = "event: ping\ndata: {\"type\":\"ping\"}\n\n";

/// Format an Anthropic-style SSE frame (with named event type).
#[must_use]
pub fn anthropic_sse_frame(event_type: &str, json: &str) -> String {
    let mut out = String::with_capacity(18 + event_type.len() + json.len());
    push_sse_frame(&mut out, event_type, json);
    out
}

fn push_sse_frame(out: &mut String, event_type: &str, json: &str) {
    out.push_str("event: ");
    out.push_str(event_type);
    out.push('\n');
    out.push_str("data: ");
    out.push_str(json);
    out.push_str("\n\n");
}

/// Encode one event as `event: <name>\ndata: <json>\n\n`.
///
/// # Errors
///
/// Returns the serializer error if the event cannot be encoded as JSON.
pub fn encode_sse(event: &OutputEvent) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(event)?;
    Ok(anthropic_sse_frame(event.event_name(), &json))
}

/// Encode a batch of events into one contiguous chunk.
///
/// # Errors
///
/// Returns the serializer error if any event cannot be encoded as JSON.
pub fn encode_sse_batch(events: &[OutputEvent]) -> Result<bytes::Bytes, serde_json::Error> {
    let mut out = String::with_capacity(events.len() * 96);
    for event in events {
        let json = serde_json::to_string(event)?;
        push_sse_frame(&mut out, event.event_name(), &json);
    }
    Ok(bytes::Bytes::from(out))
}
