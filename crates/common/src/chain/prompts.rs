//! Prompt templates for the conversational retrieval chain

use crate::llm::ChatMessage;

const SEPARATOR: &str = "----------------";

/// Rewrite a follow-up into a question that stands on its own
pub fn condense_question(history: &str, question: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::user(format!(
        "Given the conversation below and a follow-up question, rewrite the follow-up \
         as a standalone question that keeps its original language.\n\n\
         Chat history:{}\nFollow-up question: {}\nStandalone question:",
        history, question
    ))]
}

/// Map step: pull the relevant text out of one excerpt
pub fn map_excerpt(excerpt: &str, question: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(format!(
            "Use the following excerpt of a long document to decide whether any of it helps \
             answer the question. Return the relevant text verbatim, or nothing if none of it \
             is relevant.\n{}\n{}",
            SEPARATOR, excerpt
        )),
        ChatMessage::user(question),
    ]
}

/// Reduce step: answer from the extracted parts
pub fn combine_extracts(summaries: &str, question: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(format!(
            "Given the following extracted parts of a long document and a question, write the \
             final answer. If the parts do not contain the answer, say that you don't know; \
             do not make one up.\n{}\n{}",
            SEPARATOR, summaries
        )),
        ChatMessage::user(question),
    ]
}

/// Single-call answer with every retrieved chunk in context
pub fn stuff_context(context: &str, question: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(format!(
            "Use the following pieces of context to answer the user's question. If you don't \
             know the answer, say that you don't know; do not make one up.\n{}\n{}",
            SEPARATOR, context
        )),
        ChatMessage::user(question),
    ]
}

/// Flatten a prompt for logging
pub fn render(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{:?}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}
