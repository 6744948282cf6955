use crate::chunking::ChunkingConfig;
use crate::config::RagConfig;
use crate::embeddings::Embedder;
use crate::error::{IngestError, SessionError};
use crate::ingest::{ingest_pdf, ingest_upload, IngestedDocument, Upload};
use crate::models::{Answer, ChatMessage, DocumentFingerprint};
use crate::prompts::{answer_messages, reformulation_messages};
use crate::store::VectorIndex;
use crate::traits::LanguageModel;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Retrieval chain for one indexed document.
pub struct RagChain {
    document: DocumentFingerprint,
    index: VectorIndex,
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn LanguageModel>,
    retriever_k: usize,
}

impl RagChain {
    pub fn document(&self) -> &DocumentFingerprint {
        &self.document
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn chunk_count(&self) -> usize {
        self.index.len()
    }

    /// Rewrites `question` into a standalone one. With no history the question is used as is.
    pub async fn reformulate(
        &self,
        history: &[ChatMessage],
        question: &str,
    ) -> Result<String, SessionError> {
        if history.is_empty() {
            return Ok(question.to_string());
        }

        let rewritten = self
            .model
            .generate(&reformulation_messages(history, question))
            .await?;
        let rewritten = rewritten.trim();
        debug!(original = question, standalone = rewritten, "reformulated question");

        if rewritten.is_empty() {
            Ok(question.to_string())
        } else {
            Ok(rewritten.to_string())
        }
    }

    pub async fn answer(
        &self,
        history: &[ChatMessage],
        question: &str,
    ) -> Result<Answer, SessionError> {
        let standalone_question = self.reformulate(history, question).await?;
        let sources = self
            .index
            .retrieve(self.embedder.as_ref(), &standalone_question, self.retriever_k)
            .await?;
        debug!(k = self.retriever_k, hits = sources.len(), "retrieved chunks");

        let answer = self
            .model
            .generate(&answer_messages(history, &standalone_question, &sources))
            .await?;

        Ok(Answer {
            question: question.to_string(),
            standalone_question,
            answer,
            sources,
        })
    }
}

/// Builds a [`RagChain`] per document, sharing the embedder and model across sessions.
#[derive(Clone)]
pub struct ChainFactory {
    config: RagConfig,
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn LanguageModel>,
}

impl ChainFactory {
    pub fn new(
        config: RagConfig,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn LanguageModel>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self {
            config,
            embedder,
            model,
        })
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    pub fn model(&self) -> &dyn LanguageModel {
        self.model.as_ref()
    }

    fn chunking(&self) -> Result<ChunkingConfig, IngestError> {
        ChunkingConfig::try_from(&self.config)
    }

    pub async fn build_from_upload(&self, upload: Upload) -> Result<RagChain, SessionError> {
        upload.validate(&self.config)?;
        let chunking = self.chunking()?;
        let document = run_blocking(move || ingest_upload(&upload, chunking)).await?;
        self.index_document(document).await
    }

    pub async fn build_from_path(&self, path: &Path) -> Result<RagChain, SessionError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                IngestError::InvalidArgument(format!("path missing filename: {}", path.display()))
            })?
            .to_string();
        let size = tokio::fs::metadata(path).await.map_err(IngestError::Io)?.len();
        crate::ingest::validate_upload(&file_name, None, size, &self.config)?;

        let chunking = self.chunking()?;
        let owned: PathBuf = path.to_path_buf();
        let document = run_blocking(move || ingest_pdf(&owned, &file_name, chunking)).await?;
        self.index_document(document).await
    }

    async fn index_document(&self, document: IngestedDocument) -> Result<RagChain, SessionError> {
        let index = VectorIndex::build(document.chunks, self.embedder.as_ref()).await?;
        info!(
            file = %document.fingerprint.file_name,
            chunks = index.len(),
            dimensions = index.dimensions(),
            embedder = self.embedder.model_name(),
            "document indexed"
        );

        Ok(RagChain {
            document: document.fingerprint,
            index,
            embedder: Arc::clone(&self.embedder),
            model: Arc::clone(&self.model),
            retriever_k: self.config.retriever_k,
        })
    }
}

async fn run_blocking<F>(work: F) -> Result<IngestedDocument, IngestError>
where
    F: FnOnce() -> Result<IngestedDocument, IngestError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|error| IngestError::PdfParse(format!("ingestion task failed: {error}")))?
}
