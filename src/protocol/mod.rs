pub mod anthropic;
pub mod backend;
