use anyhow::Context;
use clap::Args;
use pdf_chat_core::{
    ChainFactory, ChatCompletionsModel, DisplayText, Embedder, OpenAiEmbedder, RagConfig,
};
use std::sync::Arc;
use std::time::Duration;
#[cfg(not(feature = "local-embeddings"))]
use tracing::warn;

#[derive(Args, Debug, Clone)]
pub struct RagArgs {
    /// Chat model used to reformulate questions and synthesize answers
    #[arg(long, env = "PDF_CHAT_LLM_MODEL", default_value_t = RagConfig::default().llm_model)]
    pub llm_model: String,

    /// Sampling temperature for the chat model
    #[arg(long, env = "PDF_CHAT_LLM_TEMPERATURE", default_value_t = RagConfig::default().llm_temperature)]
    pub llm_temperature: f32,

    /// Base URL of the OpenAI-compatible chat API
    #[arg(long, env = "PDF_CHAT_LLM_BASE_URL", default_value_t = RagConfig::default().llm_base_url)]
    pub llm_base_url: String,

    /// API key for the chat API
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Sentence-embedding model, loaded locally or served by --embedding-endpoint
    #[arg(long, env = "PDF_CHAT_EMBEDDING_MODEL", default_value_t = RagConfig::default().embedding_model)]
    pub embedding_model: String,

    /// OpenAI-compatible embeddings base URL; the model is run locally when unset
    #[arg(long, env = "PDF_CHAT_EMBEDDING_ENDPOINT")]
    pub embedding_endpoint: Option<String>,

    /// API key for the embeddings endpoint
    #[arg(long, env = "PDF_CHAT_EMBEDDING_API_KEY", hide_env_values = true)]
    pub embedding_api_key: Option<String>,

    /// Vector size returned by the embeddings endpoint
    #[arg(long, env = "PDF_CHAT_EMBEDDING_DIMENSIONS", default_value_t = 384)]
    pub embedding_dimensions: usize,

    /// Maximum characters per chunk
    #[arg(long, default_value_t = RagConfig::default().chunk_size)]
    pub chunk_size: usize,

    /// Characters shared by neighbouring chunks
    #[arg(long, default_value_t = RagConfig::default().chunk_overlap)]
    pub chunk_overlap: usize,

    /// Chunks retrieved per question
    #[arg(long, default_value_t = RagConfig::default().retriever_k)]
    pub retriever_k: usize,

    /// Largest accepted upload in megabytes
    #[arg(long, env = "PDF_CHAT_MAX_FILE_SIZE_MB", default_value_t = RagConfig::default().max_file_size_mb)]
    pub max_file_size_mb: u64,

    /// Characters of each source shown in previews
    #[arg(long, default_value_t = RagConfig::default().source_preview_chars)]
    pub source_preview_chars: usize,

    /// Transport timeout for remote model calls
    #[arg(long, default_value_t = RagConfig::default().request_timeout_secs)]
    pub request_timeout_secs: u64,
}

impl RagArgs {
    pub fn rag_config(&self) -> RagConfig {
        RagConfig {
            llm_model: self.llm_model.clone(),
            llm_temperature: self.llm_temperature,
            llm_base_url: self.llm_base_url.clone(),
            embedding_model: self.embedding_model.clone(),
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            retriever_k: self.retriever_k,
            max_file_size_mb: self.max_file_size_mb,
            source_preview_chars: self.source_preview_chars,
            request_timeout_secs: self.request_timeout_secs,
        }
    }

    pub fn chain_factory(&self) -> anyhow::Result<ChainFactory> {
        let config = self.rag_config();
        let timeout = Duration::from_secs(config.request_timeout_secs.max(1));

        let embedder = self.embedder(&config, timeout)?;

        let model = ChatCompletionsModel::new(
            &config.llm_base_url,
            config.llm_model.clone(),
            config.llm_temperature,
            self.api_key.clone(),
            timeout,
        )
        .context("failed to build chat model client")?;

        ChainFactory::new(config, embedder, Arc::new(model))
            .map_err(|error| anyhow::anyhow!(error.to_string()))
    }

    /// Remote endpoint when one is configured, otherwise the in-process model when the
    /// binary was built with `local-embeddings`, otherwise hashed trigrams.
    fn embedder(&self, config: &RagConfig, timeout: Duration) -> anyhow::Result<Arc<dyn Embedder>> {
        if let Some(endpoint) = &self.embedding_endpoint {
            let remote = OpenAiEmbedder::new(
                endpoint,
                config.embedding_model.clone(),
                self.embedding_api_key.clone(),
                self.embedding_dimensions,
                timeout,
            )
            .context("failed to build embeddings client")?;
            return Ok(Arc::new(remote));
        }

        #[cfg(feature = "local-embeddings")]
        {
            let local = pdf_chat_core::BertEmbedder::load(&config.embedding_model)
                .with_context(|| format!("failed to load {}", config.embedding_model))?;
            Ok(Arc::new(local))
        }

        #[cfg(not(feature = "local-embeddings"))]
        {
            warn!(
                configured = %config.embedding_model,
                "built without local-embeddings and no --embedding-endpoint; using hashed trigrams"
            );
            Ok(Arc::new(pdf_chat_core::CharacterNgramEmbedder::default()))
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct DisplayArgs {
    /// Title shown in the page header
    #[arg(long, env = "PDF_CHAT_APP_TITLE", default_value_t = DisplayText::default().app_title)]
    pub app_title: String,

    /// Icon shown next to the title
    #[arg(long, default_value_t = DisplayText::default().app_icon)]
    pub app_icon: String,

    /// Subtitle shown under the title
    #[arg(long, default_value_t = DisplayText::default().app_description)]
    pub app_description: String,

    #[arg(long, default_value_t = DisplayText::default().author_name)]
    pub author_name: String,

    #[arg(long, default_value_t = DisplayText::default().github_url)]
    pub github_url: String,

    #[arg(long, default_value_t = DisplayText::default().linkedin_url)]
    pub linkedin_url: String,
}

impl From<DisplayArgs> for DisplayText {
    fn from(value: DisplayArgs) -> Self {
        Self {
            app_title: value.app_title,
            app_icon: value.app_icon,
            app_description: value.app_description,
            author_name: value.author_name,
            github_url: value.github_url,
            linkedin_url: value.linkedin_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RagArgs;
    use clap::Parser;
    use pdf_chat_core::RagConfig;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        rag: RagArgs,
    }

    #[test]
    fn defaults_match_core_config() {
        let harness = Harness::parse_from(["pdf-chat"]);
        let config = harness.rag.rag_config();
        let defaults = RagConfig::default();
        assert_eq!(config.chunk_size, defaults.chunk_size);
        assert_eq!(config.retriever_k, defaults.retriever_k);
        assert_eq!(config.max_file_size_mb, defaults.max_file_size_mb);
        assert_eq!(config.llm_model, defaults.llm_model);
    }

    #[test]
    fn invalid_overlap_is_reported() {
        let harness =
            Harness::parse_from(["pdf-chat", "--chunk-size", "100", "--chunk-overlap", "150"]);
        assert!(harness.rag.chain_factory().is_err());
    }

    #[test]
    fn embedding_endpoint_selects_the_configured_model() -> anyhow::Result<()> {
        let harness = Harness::parse_from([
            "pdf-chat",
            "--embedding-endpoint",
            "http://127.0.0.1:8080/v1",
            "--embedding-model",
            "BAAI/bge-small-en-v1.5",
        ]);
        let factory = harness.rag.chain_factory()?;
        assert_eq!(factory.embedder().model_name(), "BAAI/bge-small-en-v1.5");
        assert_eq!(factory.embedder().dimensions(), 384);
        Ok(())
    }

    #[cfg(not(feature = "local-embeddings"))]
    #[test]
    fn fallback_embedder_reports_its_own_name() -> anyhow::Result<()> {
        let harness = Harness::parse_from(["pdf-chat"]);
        let factory = harness.rag.chain_factory()?;
        assert_eq!(factory.embedder().model_name(), "char-trigram-hash");
        Ok(())
    }
}
