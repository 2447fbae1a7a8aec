//! Input token estimation.
//!
//! Used for routing cost estimates before any provider reports real usage.
//! The cl100k vocabulary is a reasonable proxy across model families; exact
//! counts come from the provider's `Usage` chunk after execution.

use std::sync::LazyLock;

use tiktoken_rs::{CoreBPE, cl100k_base};

use crate::messages::ChatMessage;

static BPE: LazyLock<CoreBPE> = LazyLock::new(|| cl100k_base().expect("embedded cl100k vocabulary loads"));

/// Per-message framing overhead observed across chat formats.
const MESSAGE_OVERHEAD_TOKENS: u64 = 4;

pub fn count_input_tokens(messages: &[ChatMessage]) -> u64 {
    messages
        .iter()
        .map(|message| {
            let text = message.text_content();
            BPE.encode_ordinary(&text).len() as u64 + MESSAGE_OVERHEAD_TOKENS
        })
        .sum()
}
