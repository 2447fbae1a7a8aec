//! The published model table.

use crate::{Capabilities, ModelEntry, ProviderKind};

const TEXT: Capabilities = Capabilities {
    streaming: true,
    tools: true,
    structured_output: true,
    image_input: false,
    audio_input: false,
    reasoning: false,
};

const MULTIMODAL: Capabilities = Capabilities {
    streaming: true,
    tools: true,
    structured_output: true,
    image_input: true,
    audio_input: false,
    reasoning: false,
};

const REASONING: Capabilities = Capabilities {
    streaming: true,
    tools: true,
    structured_output: true,
    image_input: true,
    audio_input: false,
    reasoning: true,
};

/// All models the gateway knows how to execute. Prices are USD per million
/// tokens. Entries are append-only: deprecations set `replaced_by` instead of
/// removing the row.
pub static CATALOG: &[ModelEntry] = &[
    ModelEntry {
        id: "gpt-4o",
        bindings: &[ProviderKind::OpenAi],
        input_price: 2.50,
        output_price: 10.00,
        image_price: Some(0.003_613),
        audio_price: None,
        context_window: 128_000,
        capabilities: MULTIMODAL,
        replaced_by: None,
    },
    ModelEntry {
        id: "gpt-4o-mini",
        bindings: &[ProviderKind::OpenAi],
        input_price: 0.15,
        output_price: 0.60,
        image_price: Some(0.001_445),
        audio_price: None,
        context_window: 128_000,
        capabilities: MULTIMODAL,
        replaced_by: None,
    },
    ModelEntry {
        id: "gpt-4.1",
        bindings: &[ProviderKind::OpenAi],
        input_price: 2.00,
        output_price: 8.00,
        image_price: Some(0.003_613),
        audio_price: None,
        context_window: 1_047_576,
        capabilities: MULTIMODAL,
        replaced_by: None,
    },
    ModelEntry {
        id: "gpt-4.1-mini",
        bindings: &[ProviderKind::OpenAi],
        input_price: 0.40,
        output_price: 1.60,
        image_price: Some(0.001_445),
        audio_price: None,
        context_window: 1_047_576,
        capabilities: MULTIMODAL,
        replaced_by: None,
    },
    ModelEntry {
        id: "o4-mini",
        bindings: &[ProviderKind::OpenAi],
        input_price: 1.10,
        output_price: 4.40,
        image_price: None,
        audio_price: None,
        context_window: 200_000,
        capabilities: REASONING,
        replaced_by: None,
    },
    ModelEntry {
        id: "gpt-3.5-turbo",
        bindings: &[ProviderKind::OpenAi],
        input_price: 0.50,
        output_price: 1.50,
        image_price: None,
        audio_price: None,
        context_window: 16_385,
        capabilities: TEXT,
        replaced_by: Some("gpt-4o-mini"),
    },
    ModelEntry {
        id: "claude-sonnet-4",
        bindings: &[ProviderKind::Anthropic],
        input_price: 3.00,
        output_price: 15.00,
        image_price: Some(0.004_8),
        audio_price: None,
        context_window: 200_000,
        capabilities: REASONING,
        replaced_by: None,
    },
    ModelEntry {
        id: "claude-opus-4",
        bindings: &[ProviderKind::Anthropic],
        input_price: 15.00,
        output_price: 75.00,
        image_price: Some(0.024),
        audio_price: None,
        context_window: 200_000,
        capabilities: REASONING,
        replaced_by: None,
    },
    ModelEntry {
        id: "claude-3-5-haiku",
        bindings: &[ProviderKind::Anthropic],
        input_price: 0.80,
        output_price: 4.00,
        image_price: Some(0.001_28),
        audio_price: None,
        context_window: 200_000,
        capabilities: MULTIMODAL,
        replaced_by: None,
    },
    ModelEntry {
        id: "gemini-2.0-flash",
        bindings: &[ProviderKind::Google],
        input_price: 0.10,
        output_price: 0.40,
        image_price: Some(0.000_258),
        audio_price: Some(0.000_7),
        context_window: 1_048_576,
        capabilities: Capabilities {
            streaming: true,
            tools: true,
            structured_output: true,
            image_input: true,
            audio_input: true,
            reasoning: false,
        },
        replaced_by: None,
    },
    ModelEntry {
        id: "gemini-1.5-pro",
        bindings: &[ProviderKind::Google],
        input_price: 1.25,
        output_price: 5.00,
        image_price: Some(0.000_328),
        audio_price: Some(0.000_125),
        context_window: 2_097_152,
        capabilities: Capabilities {
            streaming: true,
            tools: true,
            structured_output: true,
            image_input: true,
            audio_input: true,
            reasoning: false,
        },
        replaced_by: None,
    },
    ModelEntry {
        id: "gemini-1.5-flash",
        bindings: &[ProviderKind::Google],
        input_price: 0.075,
        output_price: 0.30,
        image_price: Some(0.000_04),
        audio_price: Some(0.000_02),
        context_window: 1_048_576,
        capabilities: Capabilities {
            streaming: true,
            tools: true,
            structured_output: true,
            image_input: true,
            audio_input: true,
            reasoning: false,
        },
        replaced_by: None,
    },
];
