use crate::{ChatMessage, ProviderError};
use async_trait::async_trait;

/// Generative model behind both the question reformulator and the answer synthesizer.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, ProviderError>;
}
