use std::time::Duration;

use tracing::info;

use crate::protocol::anthropic::{StopReason, Usage};

/// Non-western characters weigh four units, everything Latin-ish one.
fn char_units(c: char) -> u32 {
    let cp = u32::from(c);
    let latin = matches!(
        cp,
        0x0000..=0x024F
            | 0x1E00..=0x1EFF
            | 0x2C60..=0x2C7F
            | 0xA720..=0xA7FF
            | 0xAB30..=0xAB6F
    );
    if latin {
        1
    } else {
        4
    }
}

/// Inflation applied to short texts, decaying to 1.0 at 800 raw tokens.
fn short_text_multiplier(raw_tokens: f64) -> f64 {
    if raw_tokens < 100.0 {
        1.5
    } else if raw_tokens < 200.0 {
        1.3
    } else if raw_tokens < 300.0 {
        1.25
    } else if raw_tokens < 800.0 {
        1.2
    } else {
        1.0
    }
}

fn units_to_tokens(units: u64) -> u64 {
    if units == 0 {
        return 0;
    }
    let raw = units as f64 / 4.0;
    ((raw * short_text_multiplier(raw)) as u64).max(1)
}

/// Estimate the number of tokens in `text`.
///
/// Heuristic only: four character units per token with a short-text
/// multiplier. Never zero for non-empty text.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    units_to_tokens(text.chars().map(|c| u64::from(char_units(c))).sum())
}

/// Running output-token estimate for one response.
///
/// Units accumulate across deltas and the multiplier is applied to the
/// total, so it decays as the response grows instead of inflating every
/// small delta.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputTokenCounter {
    units: u64,
}

impl OutputTokenCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, text: &str) {
        self.units += text.chars().map(|c| u64::from(char_units(c))).sum::<u64>();
    }

    #[must_use]
    pub fn tokens(&self) -> u64 {
        units_to_tokens(self.units)
    }
}

/// Log the usage of a finished stream at INFO level.
pub fn log_stream_usage(model: &str, usage: &Usage, stop_reason: StopReason, duration: Duration) {
    info!(
        model = model,
        input_tokens = usage.input_tokens,
        output_tokens = usage.output_tokens,
        stop_reason = stop_reason.as_str(),
        duration_seconds = duration.as_secs_f64(),
        "stream completed"
    );
}
