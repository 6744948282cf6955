use crate::error::SessionError;
use serde::{Deserialize, Serialize};

pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Tunables for ingestion, retrieval and the remote model calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    pub llm_model: String,
    pub llm_temperature: f32,
    pub llm_base_url: String,
    pub embedding_model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub retriever_k: usize,
    pub max_file_size_mb: u64,
    pub source_preview_chars: usize,
    pub request_timeout_secs: u64,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            llm_model: "llama-3.1-8b-instant".to_string(),
            llm_temperature: 0.3,
            llm_base_url: "https://api.groq.com/openai/v1".to_string(),
            embedding_model: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            chunk_size: 1_000,
            chunk_overlap: 200,
            retriever_k: 4,
            max_file_size_mb: 10,
            source_preview_chars: 400,
            request_timeout_secs: 60,
        }
    }
}

impl RagConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(BYTES_PER_MB)
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.chunk_size == 0 {
            return Err(SessionError::InvalidConfig(
                "chunk_size must be positive".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(SessionError::InvalidConfig(format!(
                "chunk_overlap {} must be smaller than chunk_size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.retriever_k == 0 {
            return Err(SessionError::InvalidConfig(
                "retriever_k must be positive".to_string(),
            ));
        }
        if self.max_file_size_mb == 0 {
            return Err(SessionError::InvalidConfig(
                "max_file_size_mb must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Strings shown by the user interfaces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DisplayText {
    pub app_title: String,
    pub app_icon: String,
    pub app_description: String,
    pub author_name: String,
    pub github_url: String,
    pub linkedin_url: String,
}

impl Default for DisplayText {
    fn default() -> Self {
        Self {
            app_title: "AI Study Assistant".to_string(),
            app_icon: "📚".to_string(),
            app_description: "Upload any PDF and chat with it instantly using RAG + LLaMA 3"
                .to_string(),
            author_name: "Dhayanidhi P".to_string(),
            github_url: "https://github.com/Dhayanidhi-96".to_string(),
            linkedin_url: "https://www.linkedin.com/in/dhayanidhi-p-3372b0291".to_string(),
        }
    }
}
