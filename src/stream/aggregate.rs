use crate::protocol::anthropic::{
    BlockDelta, ContentBlock, MessageResponse, OutputEvent, StopReason, Usage,
};

#[derive(Debug)]
enum PartialBlock {
    Text(String),
    Thinking(String),
    ToolUse {
        id: String,
        name: String,
        input_json: String,
    },
}

impl PartialBlock {
    fn into_content_block(self) -> ContentBlock {
        match self {
            PartialBlock::Text(text) => ContentBlock::Text { text },
            PartialBlock::Thinking(thinking) => ContentBlock::Thinking { thinking },
            PartialBlock::ToolUse {
                id,
                name,
                input_json,
            } => ContentBlock::ToolUse {
                input: parse_tool_input(&id, &input_json),
                id,
                name,
            },
        }
    }
}

fn parse_tool_input(id: &str, input_json: &str) -> serde_json::Value {
    if input_json.trim().is_empty() {
        return serde_json::Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(input_json).unwrap_or_else(|err| {
        tracing::warn!(tool_use_id = id, error = %err, "tool input is not valid JSON");
        serde_json::Value::Object(serde_json::Map::new())
    })
}

/// Folds an output event sequence into one [`MessageResponse`] for a
/// non-streaming caller.
#[derive(Debug, Default)]
pub struct MessageAggregator {
    id: String,
    model: String,
    blocks: Vec<(usize, PartialBlock)>,
    stop_reason: Option<StopReason>,
    stop_sequence: Option<String>,
    usage: Usage,
}

impl MessageAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn block_mut(&mut self, index: usize) -> Option<&mut PartialBlock> {
        self.blocks
            .iter_mut()
            .rev()
            .find(|(i, _)| *i == index)
            .map(|(_, block)| block)
    }

    pub fn push(&mut self, event: &OutputEvent) {
        match event {
            OutputEvent::MessageStart { message } => {
                self.id.clone_from(&message.id);
                self.model.clone_from(&message.model);
                self.usage.input_tokens = message.usage.input_tokens;
            }
            OutputEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                let block = match content_block {
                    ContentBlock::Text { text } => PartialBlock::Text(text.clone()),
                    ContentBlock::Thinking { thinking } => PartialBlock::Thinking(thinking.clone()),
                    ContentBlock::ToolUse { id, name, .. } => PartialBlock::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        input_json: String::new(),
                    },
                };
                self.blocks.push((*index, block));
            }
            OutputEvent::ContentBlockDelta { index, delta } => {
                match (self.block_mut(*index), delta) {
                    (Some(PartialBlock::Text(buf)), BlockDelta::TextDelta { text }) => {
                        buf.push_str(text);
                    }
                    (Some(PartialBlock::Thinking(buf)), BlockDelta::ThinkingDelta { thinking }) => {
                        buf.push_str(thinking);
                    }
                    (
                        Some(PartialBlock::ToolUse { input_json, .. }),
                        BlockDelta::InputJsonDelta { partial_json },
                    ) => input_json.push_str(partial_json),
                    _ => tracing::debug!(index, "delta does not match its block"),
                }
            }
            OutputEvent::MessageDelta { delta, usage } => {
                self.stop_reason = Some(delta.stop_reason);
                self.stop_sequence.clone_from(&delta.stop_sequence);
                self.usage = *usage;
            }
            OutputEvent::ContentBlockStop { .. }
            | OutputEvent::MessageStop {}
            | OutputEvent::Ping {} => {}
        }
    }

    pub fn extend<'a>(&mut self, events: impl IntoIterator<Item = &'a OutputEvent>) {
        for event in events {
            self.push(event);
        }
    }

    #[must_use]
    pub fn finish(mut self) -> MessageResponse {
        self.blocks.sort_by_key(|(index, _)| *index);
        MessageResponse {
            id: self.id,
            type_: "message".to_string(),
            role: "assistant".to_string(),
            model: self.model,
            content: self
                .blocks
                .into_iter()
                .map(|(_, block)| block.into_content_block())
                .collect(),
            stop_reason: self.stop_reason,
            stop_sequence: self.stop_sequence,
            usage: self.usage,
        }
    }
}
