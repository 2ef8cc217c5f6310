//! Chat-completion seam used by the `chat` command.

use serde::Serialize;
use serde_json::{Value, json};

use crate::embedding::png_data_url;
use crate::error::Result;

pub mod history;
pub mod openai;
pub mod tools;
pub mod turns;

pub use history::History;
pub use openai::OpenAiChat;
pub use tools::{PageSearchTool, ToolOutput, ToolRunner};
pub use turns::{CompletedTurn, TaggedDelta, TurnKind, TurnStream};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    /// PNG bytes, sent as a base64 data URL.
    Image(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument string as produced by the model.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentPart>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn with_text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::Text(text.into())],
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::with_text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_text(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_text(Role::Assistant, text)
    }

    pub fn assistant_tool_calls(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::with_text(Role::Assistant, text)
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_text(Role::Tool, text)
        }
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text(text) => Some(text.as_str()),
                ContentPart::Image(_) => None,
            })
            .collect::<Vec<&str>>()
            .join("")
    }

    /// OpenAI chat-completions wire form. Plain-text messages use a string
    /// `content`; messages carrying images use a content-part array.
    pub fn to_wire(&self) -> Value {
        let has_image = self
            .content
            .iter()
            .any(|part| matches!(part, ContentPart::Image(_)));

        let content = if has_image {
            Value::Array(
                self.content
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text(text) => json!({"type": "text", "text": text}),
                        ContentPart::Image(png) => json!({
                            "type": "image_url",
                            "image_url": {"url": png_data_url(png)},
                        }),
                    })
                    .collect(),
            )
        } else {
            Value::String(self.text())
        };

        let mut message = json!({"role": self.role, "content": content});
        if !self.tool_calls.is_empty() {
            message["tool_calls"] = Value::Array(
                self.tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {"name": call.name, "arguments": call.arguments},
                        })
                    })
                    .collect(),
            );
        }
        if let Some(id) = &self.tool_call_id {
            message["tool_call_id"] = Value::String(id.clone());
        }
        message
    }
}

/// A function tool offered to the model.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

impl ToolSpec {
    pub fn to_wire(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Text(String),
    ToolCall(ToolCall),
}

/// Lazy, single-use sequence of events for one model call.
pub type ChatStream<'a> = Box<dyn Iterator<Item = Result<StreamEvent>> + 'a>;

pub trait ChatProvider {
    fn stream(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ChatStream<'_>>;

    fn model(&self) -> &str;
}
