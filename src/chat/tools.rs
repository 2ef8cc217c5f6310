use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::{ChatMessage, ContentPart, Role, ToolCall, ToolSpec};
use crate::error::Result;
use crate::pipeline::RetrievalPipeline;

pub const SEARCH_TOOL_NAME: &str = "search_pages";

/// Result of running one tool call: the `tool` reply plus any messages that
/// must follow all tool replies (images cannot ride on a tool message).
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub reply: ChatMessage,
    pub attachments: Vec<ChatMessage>,
}

pub trait ToolRunner {
    fn specs(&self) -> Vec<ToolSpec>;

    fn run(&self, call: &ToolCall) -> Result<ToolOutput>;
}

/// Exposes the retrieval pipeline to the model as `search_pages`.
pub struct PageSearchTool<'a> {
    pipeline: &'a RetrievalPipeline<'a>,
    collection: String,
    top_k: usize,
    max_pages: usize,
}

#[derive(Debug, Deserialize)]
struct SearchArguments {
    queries: Vec<String>,
}

impl<'a> PageSearchTool<'a> {
    pub fn new(
        pipeline: &'a RetrievalPipeline<'a>,
        collection: String,
        top_k: usize,
        max_pages: usize,
    ) -> Self {
        Self {
            pipeline,
            collection,
            top_k,
            max_pages,
        }
    }
}

impl ToolRunner for PageSearchTool<'_> {
    fn specs(&self) -> Vec<ToolSpec> {
        vec![ToolSpec {
            name: SEARCH_TOOL_NAME.to_string(),
            description: "Search the indexed document and return the most relevant pages. \
                Several focused queries may be sent at once."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "queries": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Search queries, concise and optimised for retrieval.",
                    },
                },
                "required": ["queries"],
            }),
        }]
    }

    fn run(&self, call: &ToolCall) -> Result<ToolOutput> {
        if call.name != SEARCH_TOOL_NAME {
            warn!(tool = %call.name, "model requested an unknown tool");
            return Ok(ToolOutput {
                reply: ChatMessage::tool(&call.id, format!("unknown tool: {}", call.name)),
                attachments: Vec::new(),
            });
        }

        let arguments = match serde_json::from_str::<SearchArguments>(&call.arguments) {
            Ok(arguments) if !arguments.queries.is_empty() => arguments,
            Ok(_) | Err(_) => {
                warn!(arguments = %call.arguments, "search_pages called with invalid arguments");
                return Ok(ToolOutput {
                    reply: ChatMessage::tool(
                        &call.id,
                        "invalid arguments: expected {\"queries\": [\"...\"]}",
                    ),
                    attachments: Vec::new(),
                });
            }
        };

        let (paired, pages) = self.pipeline.search_with_pages(
            &arguments.queries,
            &self.collection,
            self.top_k,
            self.max_pages,
        )?;
        info!(
            queries = arguments.queries.len(),
            pages = pages.len(),
            "search_pages tool completed"
        );

        let reply_body = json!({
            "results": paired,
            "attached_pages": pages.iter().map(|page| page.index).collect::<Vec<u32>>(),
        });
        let reply = ChatMessage::tool(&call.id, reply_body.to_string());

        if pages.is_empty() {
            return Ok(ToolOutput {
                reply,
                attachments: Vec::new(),
            });
        }

        let mut content = vec![ContentPart::Text(format!(
            "Retrieved pages for: {}",
            arguments.queries.join("; ")
        ))];
        for page in pages {
            content.push(ContentPart::Text(format!(
                "Page {} of {}",
                page.index, page.label
            )));
            content.push(ContentPart::Image(page.image));
        }

        Ok(ToolOutput {
            reply,
            attachments: vec![ChatMessage {
                role: Role::User,
                content,
                tool_calls: Vec::new(),
                tool_call_id: None,
            }],
        })
    }
}
