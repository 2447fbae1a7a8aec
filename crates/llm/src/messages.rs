//! Normalized conversation types shared by all adapters.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One turn of a conversation in provider-neutral form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: MessageContent,
    /// Tool invocations requested by an assistant turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For `Role::Tool` messages, the id of the call being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    /// A tool-result message answering `tool_call_id`.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::Text(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// All textual content of the message, parts joined in order.
    pub fn text_content(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    /// True when any content part is an image.
    pub fn has_image(&self) -> bool {
        match &self.content {
            MessageContent::Text(_) => false,
            MessageContent::Parts(parts) => parts.iter().any(|part| matches!(part, ContentPart::ImageUrl { .. })),
        }
    }

    /// Apply a transformation to every text fragment, leaving other parts
    /// untouched. Used by the prompt assembler for template rendering.
    pub fn map_text<E>(mut self, mut f: impl FnMut(&str) -> Result<String, E>) -> Result<Self, E> {
        match &mut self.content {
            MessageContent::Text(text) => *text = f(text)?,
            MessageContent::Parts(parts) => {
                for part in parts {
                    if let ContentPart::Text { text } = part {
                        *text = f(text)?;
                    }
                }
            }
        }
        Ok(self)
    }
}

/// Either a plain string or a list of typed parts, mirroring the OpenAI wire
/// shape both serialize to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// A completed tool invocation request from the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments exactly as the model produced them.
    pub arguments: String,
}

/// A tool the model may call, in the OpenAI function shape all providers
/// translate from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn text_content_joins_parts() {
        let message = ChatMessage {
            role: Role::User,
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: "look at ".into() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: "https://example.com/cat.png".into(),
                    },
                },
                ContentPart::Text { text: "this".into() },
            ]),
            tool_calls: Vec::new(),
            tool_call_id: None,
        };

        assert_eq!(message.text_content(), "look at this");
        assert!(message.has_image());
    }

    #[test]
    fn content_deserializes_from_both_shapes() {
        let plain: MessageContent = serde_json::from_value(json!("hello")).unwrap();
        assert_eq!(plain, MessageContent::Text("hello".into()));

        let parts: MessageContent = serde_json::from_value(json!([{"type": "text", "text": "hello"}])).unwrap();
        assert!(matches!(parts, MessageContent::Parts(ref p) if p.len() == 1));
    }

    #[test]
    fn map_text_touches_every_fragment() {
        let message = ChatMessage::user("a").map_text(|t| Ok::<_, ()>(format!("{t}!"))).unwrap();
        assert_eq!(message.text_content(), "a!");
    }
}
