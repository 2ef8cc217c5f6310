use super::ChatMessage;

pub const DEFAULT_HISTORY_LIMIT: usize = 30;

/// Conversation log. Everything is kept; only the most recent `limit`
/// messages are sent to the model.
#[derive(Debug, Clone)]
pub struct History {
    messages: Vec<ChatMessage>,
    limit: usize,
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            messages: Vec::new(),
            limit: limit.max(1),
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn recent(&self) -> &[ChatMessage] {
        let start = self.messages.len().saturating_sub(self.limit);
        &self.messages[start..]
    }

    /// System prompt followed by the recent window.
    pub fn request(&self, system_prompt: Option<&str>) -> Vec<ChatMessage> {
        let mut out = Vec::with_capacity(self.limit + 1);
        if let Some(prompt) = system_prompt {
            out.push(ChatMessage::system(prompt));
        }
        out.extend_from_slice(self.recent());
        out
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_is_capped_to_limit() {
        let mut history = History::new(3);
        for index in 0..5 {
            history.push(ChatMessage::user(index.to_string()));
        }

        let texts = history
            .recent()
            .iter()
            .map(ChatMessage::text)
            .collect::<Vec<String>>();
        assert_eq!(texts, vec!["2", "3", "4"]);
        assert_eq!(history.len(), 5);
    }

    #[test]
    fn request_prepends_system_prompt() {
        let mut history = History::default();
        history.push(ChatMessage::user("hi"));

        let request = history.request(Some("be brief"));
        assert_eq!(request.len(), 2);
        assert_eq!(request[0], ChatMessage::system("be brief"));
        assert!(history.request(None).len() == 1);
    }
}
