pub mod chain;
pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod llm;
#[cfg(feature = "local-embeddings")]
pub mod local_embeddings;
pub mod models;
pub mod prompts;
pub mod session;
pub mod store;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
#[doc(hidden)]
pub mod test_support;

pub use chain::{ChainFactory, RagChain};
pub use chunking::{build_chunks, clean_page_text, split_text, ChunkingConfig};
pub use config::{DisplayText, RagConfig, BYTES_PER_MB};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, OpenAiEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{IngestError, ProviderError, SessionError};
pub use extractor::{extract_page_texts, LopdfExtractor, PageRecord, PdfExtractor};
pub use ingest::{ingest_pdf, ingest_upload, validate_upload, IngestedDocument, Upload};
pub use llm::ChatCompletionsModel;
#[cfg(feature = "local-embeddings")]
pub use local_embeddings::BertEmbedder;
pub use models::{
    Answer, ChatMessage, Chunk, ConversationTurn, DocumentFingerprint, RetrievedChunk, Role,
};
pub use session::{Session, SessionPhase};
pub use store::VectorIndex;
pub use traits::LanguageModel;
