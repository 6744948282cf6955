use crate::models::{ChatMessage, RetrievedChunk};

pub const CONTEXTUALIZE_SYSTEM_PROMPT: &str = "Given a chat history and the latest user question \
which might reference context in the chat history, \
formulate a standalone question which can be understood \
without the chat history. Do NOT answer the question, \
just reformulate it if needed and otherwise return it as is.";

pub const QA_SYSTEM_PROMPT: &str = "You are a helpful study assistant. \
Use the following pieces of retrieved context to answer the question. \
If you don't know the answer, just say that you don't know. ";

/// Messages asking the model to rewrite `question` so it stands alone.
pub fn reformulation_messages(history: &[ChatMessage], question: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(CONTEXTUALIZE_SYSTEM_PROMPT));
    messages.extend(history.iter().cloned());
    messages.push(ChatMessage::user(question));
    messages
}

pub fn render_context(sources: &[RetrievedChunk]) -> String {
    sources
        .iter()
        .map(|hit| hit.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Messages asking the model to answer `question` from `sources` only.
pub fn answer_messages(
    history: &[ChatMessage],
    question: &str,
    sources: &[RetrievedChunk],
) -> Vec<ChatMessage> {
    let system = format!("{QA_SYSTEM_PROMPT}\n\n{}", render_context(sources));
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system));
    messages.extend(history.iter().cloned());
    messages.push(ChatMessage::user(question));
    messages
}
