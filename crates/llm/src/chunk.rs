//! Streamed response units and tool-call delta coalescing.

use std::pin::Pin;

use futures::Stream;

use crate::{ProviderError, messages::ToolCall};

/// One unit of a streamed provider response.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    TextDelta(String),
    ToolCallDelta(ToolCallDelta),
    Usage(Usage),
    Finish(FinishReason),
}

/// A fragment of a tool call. Providers deliver the id and name once and the
/// arguments spread over many fragments; [`ToolCallAssembler`] merges them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallDelta {
    /// Position of the call within the assistant turn. Fragments of the same
    /// call share an index.
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    /// Partial JSON to append to the call's arguments.
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk, ProviderError>> + Send>>;

/// Merges [`ToolCallDelta`] fragments into complete calls, preserving the
/// order in which each call index first appeared in the stream.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    calls: Vec<PartialCall>,
}

#[derive(Debug)]
struct PartialCall {
    index: usize,
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl ToolCallAssembler {
    pub fn push(&mut self, delta: &ToolCallDelta) {
        let call = match self.calls.iter_mut().find(|call| call.index == delta.index) {
            Some(existing) => existing,
            None => {
                self.calls.push(PartialCall {
                    index: delta.index,
                    id: None,
                    name: None,
                    arguments: String::new(),
                });
                self.calls.last_mut().expect("just pushed")
            }
        };

        if let Some(id) = &delta.id {
            call.id.get_or_insert_with(|| id.clone());
        }
        if let Some(name) = &delta.name {
            call.name.get_or_insert_with(|| name.clone());
        }
        call.arguments.push_str(&delta.arguments);
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Completed calls in first-appearance order. Fragments that never
    /// received a name are dropped; a missing id is synthesized from the
    /// index so tool results can still reference the call.
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .filter_map(|call| {
                let name = call.name?;
                let arguments = if call.arguments.is_empty() {
                    "{}".to_string()
                } else {
                    call.arguments
                };

                Some(ToolCall {
                    id: call.id.unwrap_or_else(|| format!("call_{}", call.index)),
                    name,
                    arguments,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(index: usize, id: Option<&str>, name: Option<&str>, arguments: &str) -> ToolCallDelta {
        ToolCallDelta {
            index,
            id: id.map(str::to_string),
            name: name.map(str::to_string),
            arguments: arguments.to_string(),
        }
    }

    #[test]
    fn merges_fragments_by_index() {
        let mut assembler = ToolCallAssembler::default();
        assembler.push(&delta(0, Some("call_abc"), Some("web-search"), ""));
        assembler.push(&delta(0, None, None, r#"{"query":"#));
        assembler.push(&delta(0, None, None, r#""rust"}"#));

        let calls = assembler.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_abc");
        assert_eq!(calls[0].name, "web-search");
        assert_eq!(calls[0].arguments, r#"{"query":"rust"}"#);
    }

    #[test]
    fn preserves_first_appearance_order_with_interleaving() {
        let mut assembler = ToolCallAssembler::default();
        assembler.push(&delta(1, Some("b"), Some("second"), "{}"));
        assembler.push(&delta(0, Some("a"), Some("first"), ""));
        assembler.push(&delta(1, None, None, ""));

        let names: Vec<String> = assembler.finish().into_iter().map(|c| c.name).collect();
        assert_eq!(names, ["second", "first"]);
    }

    #[test]
    fn synthesizes_ids_and_empty_arguments() {
        let mut assembler = ToolCallAssembler::default();
        assembler.push(&delta(2, None, Some("browser-text"), ""));

        let calls = assembler.finish();
        assert_eq!(calls[0].id, "call_2");
        assert_eq!(calls[0].arguments, "{}");
    }

    #[test]
    fn nameless_fragments_are_dropped() {
        let mut assembler = ToolCallAssembler::default();
        assembler.push(&delta(0, Some("x"), None, "{}"));

        assert!(assembler.finish().is_empty());
    }
}
