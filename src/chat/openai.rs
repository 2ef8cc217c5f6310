//! Streaming OpenAI chat-completions client (server-sent events).

use std::collections::{BTreeMap, VecDeque};
use std::io::{BufRead, BufReader};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{ChatMessage, ChatProvider, ChatStream, StreamEvent, ToolCall, ToolSpec};
use crate::error::{PipelineError, Result};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4.1";

pub struct OpenAiChat {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
}

impl OpenAiChat {
    pub fn new(api_key: &str, base_url: &str, model: String, timeout: Duration) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(PipelineError::MissingCredential("OPENAI_API_KEY"));
        }

        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| PipelineError::ChatProviderError("invalid OpenAI API key".to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| {
                PipelineError::ChatProviderError(format!("failed to build OpenAI HTTP client: {err}"))
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model,
            temperature: 0.0,
        })
    }

    fn request_body(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Value {
        let mut body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "stream": true,
            "messages": messages.iter().map(ChatMessage::to_wire).collect::<Vec<Value>>(),
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(ToolSpec::to_wire).collect());
        }
        body
    }
}

impl ChatProvider for OpenAiChat {
    fn stream(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ChatStream<'_>> {
        debug!(model = %self.model, messages = messages.len(), tools = tools.len(), "opening chat stream");
        let response = self
            .client
            .post(&self.endpoint)
            .json(&self.request_body(messages, tools))
            .send()
            .map_err(|err| {
                PipelineError::ChatProviderError(format!("failed to call OpenAI chat completions: {err}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(PipelineError::ChatProviderError(format!(
                "OpenAI returned {status}: {body}"
            )));
        }

        Ok(Box::new(SseEvents::new(BufReader::new(response))))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Turns an SSE body of chat-completion chunks into [`StreamEvent`]s.
///
/// Text deltas are yielded as they arrive. Tool-call fragments are merged by
/// their `index` and yielded once the stream ends.
pub struct SseEvents<R> {
    reader: R,
    pending_calls: BTreeMap<usize, PartialToolCall>,
    ready: VecDeque<StreamEvent>,
    finished: bool,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl<R: BufRead> SseEvents<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending_calls: BTreeMap::new(),
            ready: VecDeque::new(),
            finished: false,
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        for (_, call) in std::mem::take(&mut self.pending_calls) {
            self.ready.push_back(StreamEvent::ToolCall(ToolCall {
                id: call.id,
                name: call.name,
                arguments: call.arguments,
            }));
        }
    }

    fn apply_chunk(&mut self, data: &str) -> Result<()> {
        let chunk: StreamChunk = serde_json::from_str(data).map_err(|err| {
            PipelineError::ChatProviderError(format!("invalid stream chunk: {err}"))
        })?;

        for choice in chunk.choices {
            if let Some(content) = choice.delta.content.filter(|text| !text.is_empty()) {
                self.ready.push_back(StreamEvent::Text(content));
            }
            for fragment in choice.delta.tool_calls {
                let entry = self.pending_calls.entry(fragment.index).or_default();
                if let Some(id) = fragment.id {
                    entry.id = id;
                }
                if let Some(function) = fragment.function {
                    if let Some(name) = function.name {
                        entry.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        entry.arguments.push_str(&arguments);
                    }
                }
            }
        }
        Ok(())
    }
}

impl<R: BufRead> Iterator for SseEvents<R> {
    type Item = Result<StreamEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Some(Ok(event));
            }
            if self.finished {
                return None;
            }

            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) => self.finish(),
                Ok(_) => {
                    let line = line.trim_end();
                    let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
                        continue;
                    };
                    if data == "[DONE]" {
                        self.finish();
                        continue;
                    }
                    if let Err(err) = self.apply_chunk(data) {
                        self.finished = true;
                        return Some(Err(err));
                    }
                }
                Err(err) => {
                    self.finished = true;
                    return Some(Err(PipelineError::ChatProviderError(format!(
                        "failed to read chat stream: {err}"
                    ))));
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallFragment>,
}

#[derive(Debug, Deserialize)]
struct ToolCallFragment {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionFragment>,
}

#[derive(Debug, Deserialize)]
struct FunctionFragment {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
