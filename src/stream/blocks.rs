use crate::protocol::anthropic::{BlockDelta, ContentBlock, OutputEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    Thinking,
    ToolUse,
}

impl BlockKind {
    fn of(block: &ContentBlock) -> Self {
        match block {
            ContentBlock::Text { .. } => BlockKind::Text,
            ContentBlock::Thinking { .. } => BlockKind::Thinking,
            ContentBlock::ToolUse { .. } => BlockKind::ToolUse,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Block {
    kind: BlockKind,
    started: bool,
    stopped: bool,
}

impl Block {
    fn is_open(self) -> bool {
        self.started && !self.stopped
    }
}

/// Indexed content blocks of one response.
///
/// The position in the registry is the block index. Indices are handed out
/// in order and never reused; a stopped block stays stopped.
#[derive(Debug, Default)]
pub struct BlockRegistry {
    blocks: Vec<Block>,
}

impl BlockRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next index and emit its `content_block_start`.
    ///
    /// Opening a tool block first closes any open text block.
    pub fn open_block(&mut self, content_block: ContentBlock, out: &mut Vec<OutputEvent>) -> usize {
        let kind = BlockKind::of(&content_block);
        if kind == BlockKind::ToolUse {
            self.close_open_of_kind(BlockKind::Text, out);
        }
        let index = self.blocks.len();
        self.blocks.push(Block {
            kind,
            started: true,
            stopped: false,
        });
        out.push(OutputEvent::ContentBlockStart {
            index,
            content_block,
        });
        index
    }

    /// Emit a delta on an open block. Returns `false` (and emits nothing)
    /// when the block was never started or is already stopped.
    pub fn emit_delta(&self, index: usize, delta: BlockDelta, out: &mut Vec<OutputEvent>) -> bool {
        if !self.is_open(index) {
            return false;
        }
        out.push(OutputEvent::ContentBlockDelta { index, delta });
        true
    }

    /// Stop an open block. Returns `false` when there was nothing to stop.
    pub fn close_block(&mut self, index: usize, out: &mut Vec<OutputEvent>) -> bool {
        match self.blocks.get_mut(index) {
            Some(block) if block.is_open() => {
                block.stopped = true;
                out.push(OutputEvent::ContentBlockStop { index });
                true
            }
            _ => false,
        }
    }

    pub fn close_open_of_kind(&mut self, kind: BlockKind, out: &mut Vec<OutputEvent>) {
        for index in 0..self.blocks.len() {
            if self.blocks[index].kind == kind {
                self.close_block(index, out);
            }
        }
    }

    /// Stop every open block: thinking blocks first, then the rest in index
    /// order.
    pub fn close_all(&mut self, out: &mut Vec<OutputEvent>) {
        self.close_open_of_kind(BlockKind::Thinking, out);
        for index in 0..self.blocks.len() {
            self.close_block(index, out);
        }
    }

    #[must_use]
    pub fn is_open(&self, index: usize) -> bool {
        self.blocks.get(index).is_some_and(|block| block.is_open())
    }

    #[must_use]
    pub fn kind(&self, index: usize) -> Option<BlockKind> {
        self.blocks.get(index).map(|block| block.kind)
    }

    /// Whether any block other than `kind` was ever opened.
    #[must_use]
    pub fn has_other_than(&self, kind: BlockKind) -> bool {
        self.blocks.iter().any(|block| block.kind != kind)
    }

    #[must_use]
    pub fn has_kind(&self, kind: BlockKind) -> bool {
        self.blocks.iter().any(|block| block.kind == kind)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(t: &str) -> BlockDelta {
        BlockDelta::TextDelta { text: t.to_string() }
    }

    #[test]
    fn test_indices_are_monotonic() {
        let mut registry = BlockRegistry::new();
        let mut out = Vec::new();
        assert_eq!(registry.open_block(ContentBlock::empty_text(), &mut out), 0);
        assert!(registry.close_block(0, &mut out));
        assert_eq!(registry.open_block(ContentBlock::empty_text(), &mut out), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_delta_and_stop_on_closed_block_are_noops() {
        let mut registry = BlockRegistry::new();
        let mut out = Vec::new();
        let index = registry.open_block(ContentBlock::empty_text(), &mut out);
        assert!(registry.emit_delta(index, text("a"), &mut out));
        assert!(registry.close_block(index, &mut out));
        let before = out.len();
        assert!(!registry.emit_delta(index, text("b"), &mut out));
        assert!(!registry.close_block(index, &mut out));
        assert!(!registry.emit_delta(7, text("c"), &mut out));
        assert_eq!(out.len(), before);
    }

    #[test]
    fn test_tool_block_closes_open_text() {
        let mut registry = BlockRegistry::new();
        let mut out = Vec::new();
        registry.open_block(ContentBlock::empty_text(), &mut out);
        let tool = registry.open_block(ContentBlock::tool_use("t1", "Bash"), &mut out);
        assert_eq!(tool, 1);
        assert_eq!(out[1], OutputEvent::ContentBlockStop { index: 0 });
        assert!(matches!(out[2], OutputEvent::ContentBlockStart { index: 1, .. }));
        assert!(!registry.is_open(0));
        assert!(registry.is_open(1));
    }

    #[test]
    fn test_close_all_stops_thinking_first() {
        let mut registry = BlockRegistry::new();
        let mut out = Vec::new();
        registry.open_block(ContentBlock::empty_text(), &mut out);
        registry.open_block(ContentBlock::empty_thinking(), &mut out);
        out.clear();
        registry.close_all(&mut out);
        assert_eq!(
            out,
            vec![
                OutputEvent::ContentBlockStop { index: 1 },
                OutputEvent::ContentBlockStop { index: 0 },
            ]
        );
        registry.close_all(&mut out);
        assert_eq!(out.len(), 2);
    }
}
