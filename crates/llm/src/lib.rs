//! Provider adapters.
//!
//! Every upstream API family is driven through the [`Provider`] trait, which
//! exposes one uniform contract: `execute(request) → stream of chunks`. The
//! adapters normalize messages on the way out and errors, token usage and
//! tool-call deltas on the way back, so nothing above this crate knows what
//! the upstream wire format looks like.

mod admission;
mod chunk;
mod error;
mod http_client;
mod messages;
pub mod provider;
mod registry;
mod request;
pub mod token_counter;

pub use chunk::{Chunk, ChunkStream, FinishReason, ToolCallAssembler, ToolCallDelta, Usage};
pub use error::{ProviderError, ProviderErrorKind};
pub use messages::{ChatMessage, ContentPart, ImageUrl, MessageContent, Role, ToolCall, ToolDefinition};
pub use provider::Provider;
pub use registry::ProviderSet;
pub use request::{ExecuteContext, ProviderRequest};
