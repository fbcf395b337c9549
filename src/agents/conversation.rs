//! Bounded chat history with a pinned system prompt.

use crate::llm::ChatMessage;

#[derive(Debug, Clone)]
pub struct Conversation {
    system: ChatMessage,
    turns: Vec<ChatMessage>,
    max_turn_messages: usize,
}

impl Conversation {
    pub fn new(system_prompt: &str, max_turn_messages: usize) -> Self {
        Self {
            system: ChatMessage::system(system_prompt),
            turns: Vec::new(),
            max_turn_messages,
        }
    }

    /// Full transcript to send for a new user message, without recording it
    pub fn transcript_with(&self, user: &str) -> Vec<ChatMessage> {
        let mut messages = self.messages();
        messages.push(ChatMessage::user(user));
        messages
    }

    /// Record a completed exchange, evicting the oldest turns past the cap
    pub fn record(&mut self, user: &str, assistant: &str) {
        self.turns.push(ChatMessage::user(user));
        self.turns.push(ChatMessage::assistant(assistant));
        if self.turns.len() > self.max_turn_messages {
            let excess = self.turns.len() - self.max_turn_messages;
            self.turns.drain(..excess);
        }
    }

    pub fn reset(&mut self) {
        self.turns.clear();
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        std::iter::once(self.system.clone())
            .chain(self.turns.iter().cloned())
            .collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.turns.len() + 1
    }
}
