use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFingerprint {
    pub document_id: String,
    pub file_name: String,
    pub checksum: String,
    pub page_count: usize,
    pub ingested_at: DateTime<Utc>,
}

/// Unit of retrieval. `source_page` is zero-based.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub chunk_id: String,
    pub chunk_index: u64,
    pub source_page: u32,
    pub text: String,
}

impl Chunk {
    /// Page number as shown to readers.
    pub fn display_page(&self) -> u32 {
        self.source_page.saturating_add(1)
    }

    pub fn preview(&self, max_chars: usize) -> String {
        let mut chars = self.text.chars();
        let head: String = chars.by_ref().take(max_chars).collect();
        if chars.next().is_some() {
            format!("{head}...")
        } else {
            head
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Model-facing message: role and content only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One entry in the session log. `sources` is only populated on assistant turns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub sources: Vec<Chunk>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            sources: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>, sources: Vec<Chunk>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            sources,
        }
    }

    pub fn to_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub question: String,
    pub standalone_question: String,
    pub answer: String,
    pub sources: Vec<RetrievedChunk>,
}

impl Answer {
    pub fn source_chunks(&self) -> Vec<Chunk> {
        self.sources.iter().map(|hit| hit.chunk.clone()).collect()
    }
}
