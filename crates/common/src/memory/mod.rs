//! Conversational memory
//!
//! The transcript of one session. It only ever grows: a turn is appended
//! once an answer exists and nothing is removed until the session ends.

use crate::llm::{ChatMessage, Role};
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversationMemory {
    messages: Vec<ChatMessage>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a question and the answer it received
    pub fn save_turn(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        self.messages.push(ChatMessage::user(question));
        self.messages.push(ChatMessage::assistant(answer));
    }

    /// Transcript in chronological order
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of question/answer pairs
    pub fn turn_count(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::User).count()
    }

    /// Render the transcript for a prompt, one `\nHuman: ..` / `\nAssistant: ..`
    /// line per message
    pub fn buffer_string(&self) -> String {
        let mut buffer = String::new();
        for message in &self.messages {
            let prefix = match message.role {
                Role::User => "Human",
                Role::Assistant => "Assistant",
                Role::System => "System",
            };
            buffer.push('\n');
            buffer.push_str(prefix);
            buffer.push_str(": ");
            buffer.push_str(&message.content);
        }
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turns_grow_in_order() {
        let mut memory = ConversationMemory::new();
        assert!(memory.is_empty());

        memory.save_turn("What is the refund window?", "Thirty days.");
        memory.save_turn("And for sale items?", "Fourteen days.");

        assert_eq!(memory.turn_count(), 2);
        let roles: Vec<Role> = memory.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
        assert_eq!(memory.messages()[2].content, "And for sale items?");
    }

    #[test]
    fn test_buffer_string() {
        let mut memory = ConversationMemory::new();
        memory.save_turn("hi", "hello");
        assert_eq!(memory.buffer_string(), "\nHuman: hi\nAssistant: hello");
    }
}
