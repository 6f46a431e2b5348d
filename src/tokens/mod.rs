//! Token counting and accounting
//!
//! `TokenCounter` asks the remote tokenizer (with a local fallback);
//! `TokenAccountant` turns counts into token events.

pub mod accountant;
pub mod counter;

pub use accountant::TokenAccountant;
pub use counter::{estimate_tokens, TokenCounter};
