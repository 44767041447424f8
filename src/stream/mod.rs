//! Backend events to Anthropic block-structured output.
//!
//! [`StreamContext`] owns the per-response state: the block registry, the
//! message start/stop guards, stop-reason resolution, token accounting and,
//! when enabled, the inline `<thinking>` extraction state.

pub mod aggregate;
pub mod blocks;
pub mod sse;
pub mod thinking;

pub use aggregate::MessageAggregator;
pub use blocks::{BlockKind, BlockRegistry};
pub use sse::{anthropic_sse_frame, encode_sse, PING_FRAME};

use rustc_hash::FxHashMap;

use crate::eventstream::Frame;
use crate::observability::token_counter::OutputTokenCounter;
use crate::protocol::anthropic::{
    BlockDelta, ContentBlock, MessageDeltaBody, MessageStartBody, OutputEvent, StopReason, Usage,
};
use crate::protocol::backend::{map_frame, SemanticEvent, ToolUseDelta};

/// Context window used to turn a usage percentage into input tokens.
pub const DEFAULT_CONTEXT_WINDOW_TOKENS: u64 = 200_000;

const CONTENT_LENGTH_EXCEEDED: &str = "ContentLengthExceededException";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThinkingPhase {
    /// No structural open tag seen yet.
    Pending,
    Inside,
    /// Extraction happened (or was forced shut); text passes straight through.
    Done,
}

#[derive(Debug)]
struct ThinkingState {
    buffer: String,
    phase: ThinkingPhase,
    strip_leading_newline: bool,
    block: Option<usize>,
    /// Last byte released from `buffer`, consulted when a tag starts at
    /// offset 0. Reset when a tag is consumed.
    last_byte: Option<u8>,
}

impl ThinkingState {
    fn new() -> Self {
        Self {
            buffer: String::new(),
            phase: ThinkingPhase::Pending,
            strip_leading_newline: false,
            block: None,
            last_byte: None,
        }
    }

    fn release(&mut self, len: usize) -> String {
        let released: String = self.buffer.drain(..len).collect();
        if let Some(&byte) = released.as_bytes().last() {
            self.last_byte = Some(byte);
        }
        released
    }
}

fn stop_reason_for_exception(kind: &str) -> Option<StopReason> {
    match kind {
        CONTENT_LENGTH_EXCEEDED => Some(StopReason::MaxTokens),
        k if k.contains("ContextWindowExceeded") => Some(StopReason::ModelContextWindowExceeded),
        _ => None,
    }
}

/// Translation state for one response.
pub struct StreamContext {
    model: String,
    message_id: String,
    input_tokens: u64,
    context_input_tokens: Option<u64>,
    context_window: u64,
    output_tokens: OutputTokenCounter,
    blocks: BlockRegistry,
    text_block: Option<usize>,
    tool_blocks: FxHashMap<String, usize>,
    explicit_stop_reason: Option<StopReason>,
    message_started: bool,
    message_delta_sent: bool,
    message_stopped: bool,
    thinking: Option<ThinkingState>,
}

impl StreamContext {
    #[must_use]
    pub fn new(model: impl Into<String>, input_tokens: u64, thinking_enabled: bool) -> Self {
        Self {
            model: model.into(),
            message_id: crate::util::new_message_id(),
            input_tokens,
            context_input_tokens: None,
            context_window: DEFAULT_CONTEXT_WINDOW_TOKENS,
            output_tokens: OutputTokenCounter::new(),
            blocks: BlockRegistry::new(),
            text_block: None,
            tool_blocks: FxHashMap::default(),
            explicit_stop_reason: None,
            message_started: false,
            message_delta_sent: false,
            message_stopped: false,
            thinking: thinking_enabled.then(ThinkingState::new),
        }
    }

    #[must_use]
    pub fn with_context_window(mut self, tokens: u64) -> Self {
        self.context_window = tokens;
        self
    }

    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub fn thinking_enabled(&self) -> bool {
        self.thinking.is_some()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.message_stopped
    }

    /// Stop reason as it would be reported if the stream ended now.
    #[must_use]
    pub fn stop_reason(&self) -> StopReason {
        match self.explicit_stop_reason {
            Some(reason) => reason,
            None if self.blocks.has_kind(BlockKind::ToolUse) => StopReason::ToolUse,
            None => StopReason::EndTurn,
        }
    }

    #[must_use]
    pub fn usage(&self) -> Usage {
        Usage {
            input_tokens: self.context_input_tokens.unwrap_or(self.input_tokens),
            output_tokens: self.output_tokens.tokens(),
        }
    }

    #[must_use]
    pub fn initial_events(&mut self) -> Vec<OutputEvent> {
        let mut out = Vec::with_capacity(1);
        self.initial_events_into(&mut out);
        out
    }

    /// Emit `message_start` once. Blocks open lazily on first content.
    pub fn initial_events_into(&mut self, out: &mut Vec<OutputEvent>) {
        if self.message_started {
            return;
        }
        self.message_started = true;
        out.push(OutputEvent::MessageStart {
            message: MessageStartBody {
                id: self.message_id.clone(),
                type_: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: Usage {
                    input_tokens: self.input_tokens,
                    output_tokens: 1,
                },
            },
        });
    }

    #[must_use]
    pub fn process_event(&mut self, event: SemanticEvent) -> Vec<OutputEvent> {
        let mut out = Vec::new();
        self.process_event_into(event, &mut out);
        out
    }

    pub fn process_event_into(&mut self, event: SemanticEvent, out: &mut Vec<OutputEvent>) {
        if self.message_stopped {
            tracing::debug!(?event, "event after message_stop ignored");
            return;
        }
        self.initial_events_into(out);

        match event {
            SemanticEvent::TextDelta(text) => self.on_text(&text, out),
            SemanticEvent::ToolUseDelta(delta) => self.on_tool_use(delta, out),
            SemanticEvent::UsagePercent(pct) => {
                let tokens = (pct.max(0.0) * self.context_window as f64 / 100.0) as u64;
                self.context_input_tokens = Some(tokens);
                if pct >= 100.0 {
                    self.set_stop_reason(StopReason::ModelContextWindowExceeded);
                }
            }
            SemanticEvent::ServiceError { code, message } => {
                tracing::warn!(code = %code, message = %message, "backend reported an error");
            }
            SemanticEvent::ServiceException { kind, message } => {
                match stop_reason_for_exception(&kind) {
                    Some(reason) => self.set_stop_reason(reason),
                    None => {
                        tracing::warn!(kind = %kind, message = %message, "backend raised an exception");
                    }
                }
            }
            SemanticEvent::Heartbeat | SemanticEvent::Unknown => {}
        }
    }

    /// Map a decoded frame and process it. A payload that does not match
    /// its schema is logged and dropped.
    pub fn process_frame_into(&mut self, frame: &Frame, out: &mut Vec<OutputEvent>) {
        match map_frame(frame) {
            Ok(event) => self.process_event_into(event, out),
            Err(err) => tracing::warn!(error = %err, "dropping backend event"),
        }
    }

    #[must_use]
    pub fn finalize(&mut self) -> Vec<OutputEvent> {
        let mut out = Vec::new();
        self.finalize_into(&mut out);
        out
    }

    /// Flush pending text, close every open block, then emit
    /// `message_delta` and `message_stop`. Later calls emit nothing.
    pub fn finalize_into(&mut self, out: &mut Vec<OutputEvent>) {
        if self.message_stopped {
            return;
        }
        self.initial_events_into(out);

        if let Some(mut state) = self.thinking.take() {
            match state.phase {
                ThinkingPhase::Inside => self.force_close_thinking(&mut state, out),
                ThinkingPhase::Pending => self.settle_pending_text(&mut state, out),
                ThinkingPhase::Done => {}
            }
            let only_thinking =
                state.block.is_some() && !self.blocks.has_other_than(BlockKind::Thinking);
            self.thinking = Some(state);
            if only_thinking {
                self.set_stop_reason(StopReason::MaxTokens);
                self.emit_text(" ", out);
            }
        }

        self.blocks.close_all(out);

        if !self.message_delta_sent {
            self.message_delta_sent = true;
            out.push(OutputEvent::MessageDelta {
                delta: MessageDeltaBody {
                    stop_reason: self.stop_reason(),
                    stop_sequence: None,
                },
                usage: self.usage(),
            });
        }
        if !self.message_stopped {
            self.message_stopped = true;
            out.push(OutputEvent::MessageStop {});
        }
    }

    fn set_stop_reason(&mut self, reason: StopReason) {
        if self.explicit_stop_reason.is_none() {
            self.explicit_stop_reason = Some(reason);
        }
    }

    fn on_text(&mut self, text: &str, out: &mut Vec<OutputEvent>) {
        if text.is_empty() {
            return;
        }
        match self.thinking.take() {
            Some(mut state) => {
                state.buffer.push_str(text);
                self.extract_thinking(&mut state, out);
                self.thinking = Some(state);
            }
            None => self.emit_text(text, out),
        }
    }

    fn on_tool_use(&mut self, delta: ToolUseDelta, out: &mut Vec<OutputEvent>) {
        if let Some(mut state) = self.thinking.take() {
            match state.phase {
                ThinkingPhase::Inside => self.force_close_thinking(&mut state, out),
                ThinkingPhase::Pending => self.settle_pending_text(&mut state, out),
                ThinkingPhase::Done => {}
            }
            self.thinking = Some(state);
        }

        // Every tool fragment ends free-form text, also for a tool block
        // opened earlier.
        self.blocks.close_open_of_kind(BlockKind::Text, out);

        let index = match self.tool_blocks.get(&delta.tool_id) {
            Some(&index) => index,
            None => {
                let index = self
                    .blocks
                    .open_block(ContentBlock::tool_use(&delta.tool_id, &delta.tool_name), out);
                self.tool_blocks.insert(delta.tool_id, index);
                index
            }
        };

        if !delta.input_fragment.is_empty() {
            self.output_tokens.add(&delta.input_fragment);
            self.blocks.emit_delta(
                index,
                BlockDelta::InputJsonDelta {
                    partial_json: delta.input_fragment,
                },
                out,
            );
        }
        if delta.is_final {
            self.blocks.close_block(index, out);
        }
    }

    fn emit_text(&mut self, text: &str, out: &mut Vec<OutputEvent>) {
        let index = match self.text_block {
            Some(index) if self.blocks.is_open(index) => index,
            _ => {
                let index = self.blocks.open_block(ContentBlock::empty_text(), out);
                self.text_block = Some(index);
                index
            }
        };
        self.output_tokens.add(text);
        self.blocks.emit_delta(
            index,
            BlockDelta::TextDelta {
                text: text.to_owned(),
            },
            out,
        );
    }

    fn emit_thinking(&mut self, state: &mut ThinkingState, text: &str, out: &mut Vec<OutputEvent>) {
        if text.is_empty() {
            return;
        }
        let index = match state.block {
            Some(index) => index,
            None => {
                self.blocks.close_open_of_kind(BlockKind::Text, out);
                let index = self.blocks.open_block(ContentBlock::empty_thinking(), out);
                state.block = Some(index);
                index
            }
        };
        self.output_tokens.add(text);
        self.blocks.emit_delta(
            index,
            BlockDelta::ThinkingDelta {
                thinking: text.to_owned(),
            },
            out,
        );
    }

    fn finish_thinking(&mut self, state: &mut ThinkingState, out: &mut Vec<OutputEvent>) {
        if let Some(index) = state.block {
            self.blocks.close_block(index, out);
        }
        state.phase = ThinkingPhase::Done;
        state.last_byte = None;
    }

    /// No more text will arrive before the next boundary. A bare open tag
    /// ending the buffer is accepted and consumed; the segment it opens is
    /// empty, so extraction is over. Anything else still held is text.
    fn settle_pending_text(&mut self, state: &mut ThinkingState, out: &mut Vec<OutputEvent>) {
        if let Some(pos) = thinking::find_open_tag_final(&state.buffer, state.last_byte) {
            let before = state.release(pos);
            if !before.trim().is_empty() {
                self.emit_text(&before, out);
            }
            state.buffer.clear();
            self.finish_thinking(state, out);
            return;
        }
        self.flush_pending_text(state, out);
    }

    /// Release everything still held before an open tag as plain text.
    fn flush_pending_text(&mut self, state: &mut ThinkingState, out: &mut Vec<OutputEvent>) {
        if state.buffer.is_empty() {
            return;
        }
        let pending = state.release(state.buffer.len());
        self.emit_text(&pending, out);
    }

    /// Close the reasoning block without the blank-line evidence. A bare
    /// close tag followed only by whitespace is consumed; anything else in
    /// the buffer is reasoning content.
    fn force_close_thinking(&mut self, state: &mut ThinkingState, out: &mut Vec<OutputEvent>) {
        let end = thinking::find_close_tag_at_end(&state.buffer, state.last_byte)
            .unwrap_or(state.buffer.len());
        let content = state.release(end);
        self.emit_thinking(state, &content, out);
        state.buffer.clear();
        self.finish_thinking(state, out);
    }

    fn extract_thinking(&mut self, state: &mut ThinkingState, out: &mut Vec<OutputEvent>) {
        loop {
            match state.phase {
                ThinkingPhase::Pending => {
                    if let Some(pos) = thinking::find_open_tag(&state.buffer, state.last_byte) {
                        let before = state.release(pos);
                        if !before.trim().is_empty() {
                            self.emit_text(&before, out);
                        }
                        state.buffer.drain(..thinking::OPEN_TAG.len());
                        state.phase = ThinkingPhase::Inside;
                        state.strip_leading_newline = true;
                        state.last_byte = None;
                        continue;
                    }
                    // Whitespace-only text stays buffered: it is dropped if
                    // an open tag follows.
                    let safe = thinking::open_safe_len(&state.buffer, state.last_byte);
                    if safe > 0 && !state.buffer[..safe].trim().is_empty() {
                        let released = state.release(safe);
                        self.emit_text(&released, out);
                    }
                    return;
                }
                ThinkingPhase::Inside => {
                    if state.strip_leading_newline && !state.buffer.is_empty() {
                        if state.buffer.starts_with('\n') {
                            state.buffer.remove(0);
                        }
                        state.strip_leading_newline = false;
                    }
                    if let Some(pos) = thinking::find_close_tag(&state.buffer, state.last_byte) {
                        let content = state.release(pos);
                        self.emit_thinking(state, &content, out);
                        state.buffer.drain(..thinking::CLOSE_MARKER.len());
                        self.finish_thinking(state, out);
                        continue;
                    }
                    let safe = thinking::close_safe_len(&state.buffer, state.last_byte);
                    if safe > 0 {
                        let released = state.release(safe);
                        self.emit_thinking(state, &released, out);
                    }
                    return;
                }
                ThinkingPhase::Done => {
                    if !state.buffer.is_empty() {
                        let rest = std::mem::take(&mut state.buffer);
                        self.emit_text(&rest, out);
                    }
                    return;
                }
            }
        }
    }
}
