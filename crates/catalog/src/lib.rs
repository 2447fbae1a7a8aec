//! Static model catalog.
//!
//! Every model the gateway can execute is published here with its provider
//! bindings, token pricing, context window and capability flags. Entries are
//! immutable once published and never removed; a superseded model is marked
//! deprecated with a replacement and keeps resolving through [`Catalog::get`].

use serde::Serialize;

mod models;

pub use models::CATALOG;

/// Upstream API families a model can be served through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Google,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a model can do. Used by the router to filter candidates against the
/// needs of a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub streaming: bool,
    pub tools: bool,
    pub structured_output: bool,
    pub image_input: bool,
    pub audio_input: bool,
    pub reasoning: bool,
}

impl Capabilities {
    /// True when `self` offers everything `required` asks for.
    pub fn covers(&self, required: &Capabilities) -> bool {
        (!required.streaming || self.streaming)
            && (!required.tools || self.tools)
            && (!required.structured_output || self.structured_output)
            && (!required.image_input || self.image_input)
            && (!required.audio_input || self.audio_input)
            && (!required.reasoning || self.reasoning)
    }
}

/// One published model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelEntry {
    pub id: &'static str,
    /// Providers able to serve this model, in preference order.
    pub bindings: &'static [ProviderKind],
    /// USD per million input tokens.
    pub input_price: f64,
    /// USD per million output tokens.
    pub output_price: f64,
    /// USD per billable image unit, when the model accepts images. The
    /// provider-specific unit mapping is not pinned down yet, so this field
    /// is informational and not billed.
    pub image_price: Option<f64>,
    /// USD per billable audio unit; informational, see `image_price`.
    pub audio_price: Option<f64>,
    pub context_window: u32,
    pub capabilities: Capabilities,
    /// Set when the model is deprecated; requests resolve to the replacement.
    pub replaced_by: Option<&'static str>,
}

impl ModelEntry {
    /// Cost in USD for a completed exchange of this many tokens.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * self.input_price + output_tokens as f64 * self.output_price) / 1_000_000.0
    }
}

/// A successful catalog lookup.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub entry: &'static ModelEntry,
    /// The deprecated id the caller asked for, when resolution followed a
    /// `replaced_by` link.
    pub deprecated_alias: Option<&'static str>,
}

/// Read handle over the published catalog.
#[derive(Debug, Clone, Copy, Default)]
pub struct Catalog;

impl Catalog {
    /// Look up a model by id, following at most one deprecation hop.
    pub fn get(&self, id: &str) -> Option<Resolved> {
        let entry = CATALOG.iter().find(|entry| entry.id == id)?;

        match entry.replaced_by {
            Some(replacement_id) => {
                let replacement = CATALOG
                    .iter()
                    .find(|candidate| candidate.id == replacement_id)?;
                Some(Resolved {
                    entry: replacement,
                    deprecated_alias: Some(entry.id),
                })
            }
            None => Some(Resolved {
                entry,
                deprecated_alias: None,
            }),
        }
    }

    /// All published entries, including deprecated ones.
    pub fn models(&self) -> &'static [ModelEntry] {
        CATALOG
    }

    pub fn contains(&self, id: &str) -> bool {
        CATALOG.iter().any(|entry| entry.id == id)
    }
}
