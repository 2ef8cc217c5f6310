//! One cooperative stream of tagged deltas covering the answer turn and, when
//! the model asks for a tool, the follow-up turn that sees the tool output.

use std::mem;

use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use super::{ChatMessage, ChatProvider, ChatStream, StreamEvent, ToolCall, ToolRunner};
use crate::error::Result;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    Answer,
    ToolFollowUp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaggedDelta {
    pub turn_id: Uuid,
    pub turn: TurnKind,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTurn {
    pub turn_id: Uuid,
    pub kind: TurnKind,
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

impl CompletedTurn {
    /// Assistant message to keep in the conversation history, if the turn
    /// produced any visible text.
    pub fn history_message(&self) -> Option<ChatMessage> {
        if self.text.trim().is_empty() {
            None
        } else {
            Some(ChatMessage::assistant(self.text.clone()))
        }
    }
}

enum State<'a> {
    Pending,
    Streaming {
        stream: ChatStream<'a>,
        turn: CompletedTurn,
    },
    Done,
}

pub struct TurnStream<'a> {
    provider: &'a dyn ChatProvider,
    tools: Option<&'a dyn ToolRunner>,
    messages: Vec<ChatMessage>,
    state: State<'a>,
    completed: Vec<CompletedTurn>,
}

impl<'a> TurnStream<'a> {
    /// Nothing is sent until the first call to `next`.
    pub fn new(
        provider: &'a dyn ChatProvider,
        messages: Vec<ChatMessage>,
        tools: Option<&'a dyn ToolRunner>,
    ) -> Self {
        Self {
            provider,
            tools,
            messages,
            state: State::Pending,
            completed: Vec::new(),
        }
    }

    /// Turns completed so far, in stream order.
    pub fn finish(self) -> Vec<CompletedTurn> {
        self.completed
    }

    fn open(&self, kind: TurnKind) -> Result<State<'a>> {
        let specs = match (kind, self.tools) {
            (TurnKind::Answer, Some(tools)) => tools.specs(),
            _ => Vec::new(),
        };
        let provider = self.provider;
        let stream = provider.stream(&self.messages, &specs)?;
        let turn_id = Uuid::new_v4();
        debug!(%turn_id, ?kind, model = provider.model(), "turn started");
        Ok(State::Streaming {
            stream,
            turn: CompletedTurn {
                turn_id,
                kind,
                text: String::new(),
                tool_calls: Vec::new(),
            },
        })
    }

    /// Runs the requested tools and extends the message list for the
    /// follow-up pass. Tool replies come first; image attachments follow.
    fn run_tools(&mut self, tools: &dyn ToolRunner, turn: &CompletedTurn) -> Result<()> {
        let mut replies = Vec::with_capacity(turn.tool_calls.len());
        let mut attachments = Vec::new();
        for call in &turn.tool_calls {
            info!(tool = %call.name, call_id = %call.id, "running tool");
            let output = tools.run(call)?;
            replies.push(output.reply);
            attachments.extend(output.attachments);
        }

        self.messages.push(ChatMessage::assistant_tool_calls(
            turn.text.clone(),
            turn.tool_calls.clone(),
        ));
        self.messages.extend(replies);
        self.messages.extend(attachments);
        Ok(())
    }

    /// Records the finished turn and decides what comes next.
    fn advance(&mut self, turn: CompletedTurn) -> Result<State<'a>> {
        let follow_up = match (turn.kind, self.tools) {
            (TurnKind::Answer, Some(tools)) if !turn.tool_calls.is_empty() => Some(tools),
            _ => None,
        };
        let result = match follow_up {
            Some(tools) => self.run_tools(tools, &turn),
            None => Ok(()),
        };
        self.completed.push(turn);
        result?;

        match follow_up {
            Some(_) => self.open(TurnKind::ToolFollowUp),
            None => Ok(State::Done),
        }
    }
}

impl Iterator for TurnStream<'_> {
    type Item = Result<TaggedDelta>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match mem::replace(&mut self.state, State::Done) {
                State::Done => return None,
                State::Pending => match self.open(TurnKind::Answer) {
                    Ok(state) => self.state = state,
                    Err(err) => return Some(Err(err)),
                },
                State::Streaming { mut stream, mut turn } => match stream.next() {
                    Some(Ok(StreamEvent::Text(text))) => {
                        turn.text.push_str(&text);
                        let delta = TaggedDelta {
                            turn_id: turn.turn_id,
                            turn: turn.kind,
                            text,
                        };
                        self.state = State::Streaming { stream, turn };
                        return Some(Ok(delta));
                    }
                    Some(Ok(StreamEvent::ToolCall(call))) => {
                        turn.tool_calls.push(call);
                        self.state = State::Streaming { stream, turn };
                    }
                    Some(Err(err)) => {
                        self.completed.push(turn);
                        return Some(Err(err));
                    }
                    None => {
                        drop(stream);
                        match self.advance(turn) {
                            Ok(state) => self.state = state,
                            Err(err) => return Some(Err(err)),
                        }
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::*;
    use crate::chat::{ContentPart, Role, ToolOutput, ToolSpec};
    use crate::error::PipelineError;

    struct ScriptedProvider {
        scripts: RefCell<VecDeque<Vec<Result<StreamEvent>>>>,
        requests: RefCell<Vec<(Vec<ChatMessage>, usize)>>,
    }

    impl ScriptedProvider {
        fn new(scripts: Vec<Vec<Result<StreamEvent>>>) -> Self {
            Self {
                scripts: RefCell::new(scripts.into()),
                requests: RefCell::new(Vec::new()),
            }
        }
    }

    impl ChatProvider for ScriptedProvider {
        fn stream(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ChatStream<'_>> {
            self.requests
                .borrow_mut()
                .push((messages.to_vec(), tools.len()));
            let script = self.scripts.borrow_mut().pop_front().unwrap_or_default();
            Ok(Box::new(script.into_iter()))
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    struct EchoTool;

    impl ToolRunner for EchoTool {
        fn specs(&self) -> Vec<ToolSpec> {
            vec![ToolSpec {
                name: "search_pages".to_string(),
                description: "test".to_string(),
                parameters: serde_json::json!({"type": "object"}),
            }]
        }

        fn run(&self, call: &ToolCall) -> Result<ToolOutput> {
            Ok(ToolOutput {
                reply: ChatMessage::tool(&call.id, "found"),
                attachments: vec![ChatMessage {
                    role: Role::User,
                    content: vec![ContentPart::Image(vec![1, 2, 3])],
                    tool_calls: Vec::new(),
                    tool_call_id: None,
                }],
            })
        }
    }

    fn text(value: &str) -> Result<StreamEvent> {
        Ok(StreamEvent::Text(value.to_string()))
    }

    fn search_call() -> Result<StreamEvent> {
        Ok(StreamEvent::ToolCall(ToolCall {
            id: "call_1".to_string(),
            name: "search_pages".to_string(),
            arguments: "{\"queries\":[\"fluss\"]}".to_string(),
        }))
    }

    #[test]
    fn plain_answer_is_one_tagged_turn() {
        let provider = ScriptedProvider::new(vec![vec![text("Hal"), text("lo")]]);
        let tools: Option<&dyn ToolRunner> = Some(&EchoTool as &dyn ToolRunner);
        let mut stream = TurnStream::new(&provider, vec![ChatMessage::user("hi")], tools);

        let deltas = stream
            .by_ref()
            .collect::<Result<Vec<TaggedDelta>>>()
            .expect("deltas");
        assert_eq!(deltas.len(), 2);
        assert!(deltas.iter().all(|delta| delta.turn == TurnKind::Answer));
        assert_eq!(deltas[0].turn_id, deltas[1].turn_id);

        let turns = stream.finish();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].text, "Hallo");
        assert_eq!(turns[0].history_message(), Some(ChatMessage::assistant("Hallo")));
        assert_eq!(provider.requests.borrow()[0].1, 1);
    }

    #[test]
    fn tool_call_triggers_follow_up_turn_with_new_id() {
        let provider = ScriptedProvider::new(vec![
            vec![text("Let me look."), search_call()],
            vec![text("Page 4 says so.")],
        ]);
        let tools: Option<&dyn ToolRunner> = Some(&EchoTool as &dyn ToolRunner);
        let mut stream = TurnStream::new(&provider, vec![ChatMessage::user("hi")], tools);

        let deltas = stream
            .by_ref()
            .collect::<Result<Vec<TaggedDelta>>>()
            .expect("deltas");
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].turn, TurnKind::Answer);
        assert_eq!(deltas[1].turn, TurnKind::ToolFollowUp);
        assert_ne!(deltas[0].turn_id, deltas[1].turn_id);

        let requests = provider.requests.borrow();
        assert_eq!(requests.len(), 2);
        let (follow_up, tool_count) = &requests[1];
        assert_eq!(*tool_count, 0);
        let roles = follow_up.iter().map(|message| message.role).collect::<Vec<Role>>();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::User]);
        assert_eq!(follow_up[1].tool_calls.len(), 1);
        assert_eq!(follow_up[2].tool_call_id.as_deref(), Some("call_1"));
        drop(requests);

        let turns = stream.finish();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].kind, TurnKind::ToolFollowUp);
        assert_eq!(turns[1].text, "Page 4 says so.");
    }

    #[test]
    fn tool_calls_without_runner_end_the_stream() {
        let provider = ScriptedProvider::new(vec![vec![search_call()], vec![text("unused")]]);
        let mut stream = TurnStream::new(&provider, vec![ChatMessage::user("hi")], None);

        assert!(stream.next().is_none());
        assert_eq!(provider.requests.borrow().len(), 1);
        let turns = stream.finish();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].history_message(), None);
    }

    #[test]
    fn provider_error_ends_the_stream() {
        let provider = ScriptedProvider::new(vec![vec![
            text("par"),
            Err(PipelineError::ChatProviderError("reset".to_string())),
            text("never"),
        ]]);
        let mut stream = TurnStream::new(&provider, Vec::new(), None);

        assert!(matches!(stream.next(), Some(Ok(_))));
        assert!(matches!(
            stream.next(),
            Some(Err(PipelineError::ChatProviderError(_)))
        ));
        assert!(stream.next().is_none());
        assert_eq!(stream.finish()[0].text, "par");
    }
}
