use crate::embeddings::Embedder;
use crate::error::ProviderError;
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use std::sync::Arc;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::info;

/// Longest input sentence-transformers feeds MiniLM; longer chunks are truncated.
const MAX_SEQUENCE_TOKENS: usize = 256;

struct LoadedBert {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

/// Sentence embeddings computed in-process with a BERT-family model fetched from the
/// Hugging Face Hub, for example `sentence-transformers/all-MiniLM-L6-v2`.
///
/// Vectors are mean-pooled over the token states and L2-normalized, matching the
/// sentence-transformers pooling for these checkpoints.
#[derive(Clone)]
pub struct BertEmbedder {
    model_id: String,
    dimensions: usize,
    inner: Arc<LoadedBert>,
}

impl std::fmt::Debug for BertEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BertEmbedder")
            .field("model_id", &self.model_id)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

impl BertEmbedder {
    /// Downloads (or reuses the cached) config, tokenizer and weights for `model_id`
    /// and loads them on the CPU. Blocks while files are fetched.
    pub fn load(model_id: &str) -> Result<Self, ProviderError> {
        let fail = |details: String| ProviderError::LocalModel {
            model: model_id.to_string(),
            details,
        };

        let api = hf_hub::api::sync::Api::new()
            .map_err(|error| fail(format!("failed to create hub client: {error}")))?;
        let repo = api.model(model_id.to_string());
        let fetch = |file: &str| {
            repo.get(file)
                .map_err(|error| fail(format!("failed to fetch {file}: {error}")))
        };
        let config_path = fetch("config.json")?;
        let tokenizer_path = fetch("tokenizer.json")?;
        let weights_path = fetch("model.safetensors")?;

        let raw_config = std::fs::read_to_string(&config_path)
            .map_err(|error| fail(format!("failed to read config.json: {error}")))?;
        let config: BertConfig = serde_json::from_str(&raw_config)
            .map_err(|error| fail(format!("invalid config.json: {error}")))?;
        let dimensions = serde_json::from_str::<serde_json::Value>(&raw_config)
            .ok()
            .and_then(|value| value.get("hidden_size").and_then(serde_json::Value::as_u64))
            .and_then(|size| usize::try_from(size).ok())
            .ok_or_else(|| fail("config.json has no hidden_size".to_string()))?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|error| fail(format!("failed to load tokenizer: {error}")))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQUENCE_TOKENS,
                ..TruncationParams::default()
            }))
            .map_err(|error| fail(format!("failed to configure truncation: {error}")))?;

        let device = Device::Cpu;
        // SAFETY: the safetensors file lives in the hub cache and is not modified while mapped.
        let weights = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, &device)
        }
        .map_err(|error| fail(format!("failed to map weights: {error}")))?;
        let model = BertModel::load(weights, &config)
            .map_err(|error| fail(format!("failed to build model: {error}")))?;

        info!(model = model_id, dimensions, "local embedding model loaded");
        Ok(Self {
            model_id: model_id.to_string(),
            dimensions,
            inner: Arc::new(LoadedBert {
                model,
                tokenizer,
                device,
            }),
        })
    }
}

impl LoadedBert {
    fn embed_one(&self, text: &str) -> Result<Vec<f32>, String> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|error| format!("tokenizer failed: {error}"))?;
        let token_ids = encoding.get_ids();
        let type_ids = vec![0u32; token_ids.len()];

        let forward = || -> candle_core::Result<Vec<f32>> {
            let input_ids = Tensor::new(token_ids, &self.device)?.unsqueeze(0)?;
            let token_type_ids = Tensor::new(type_ids.as_slice(), &self.device)?.unsqueeze(0)?;
            let states = self.model.forward(&input_ids, &token_type_ids, None)?;

            let (_batch, tokens, _hidden) = states.dims3()?;
            let pooled = (states.sum(1)? / tokens.max(1) as f64)?;
            let norm = pooled.sqr()?.sum_keepdim(1)?.sqrt()?;
            pooled.broadcast_div(&norm)?.squeeze(0)?.to_vec1::<f32>()
        };
        forward().map_err(|error| format!("forward pass failed: {error}"))
    }
}

#[async_trait]
impl Embedder for BertEmbedder {
    fn model_name(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| ProviderError::LocalModel {
            model: self.model_id.clone(),
            details: "no vector produced".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let inner = Arc::clone(&self.inner);
        let texts = texts.to_vec();
        let outcome = tokio::task::spawn_blocking(move || {
            texts
                .iter()
                .map(|text| inner.embed_one(text))
                .collect::<Result<Vec<_>, _>>()
        })
        .await;

        let fail = |details: String| ProviderError::LocalModel {
            model: self.model_id.clone(),
            details,
        };
        let vectors = outcome
            .map_err(|error| fail(format!("embedding task failed: {error}")))?
            .map_err(fail)?;

        match vectors.iter().find(|vector| vector.len() != self.dimensions) {
            Some(vector) => Err(ProviderError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            }),
            None => Ok(vectors),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BertEmbedder;
    use crate::embeddings::Embedder;
    use crate::store::cosine_similarity;

    // Downloads all-MiniLM-L6-v2 from the Hugging Face Hub on first run.
    #[tokio::test]
    #[ignore = "needs network access to the Hugging Face Hub"]
    async fn minilm_embeds_related_sentences_closer() -> Result<(), Box<dyn std::error::Error>> {
        let embedder = BertEmbedder::load("sentence-transformers/all-MiniLM-L6-v2")?;
        assert_eq!(embedder.dimensions(), 384);
        assert_eq!(embedder.model_name(), "sentence-transformers/all-MiniLM-L6-v2");

        let vectors = embedder
            .embed_batch(&[
                "Mitochondria produce ATP for the cell.".to_string(),
                "The powerhouse of the cell makes energy.".to_string(),
                "Rivers carve canyons through rock.".to_string(),
            ])
            .await?;

        let norm: f32 = vectors[0].iter().map(|value| value * value).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
        assert!(
            cosine_similarity(&vectors[0], &vectors[1]) > cosine_similarity(&vectors[0], &vectors[2])
        );
        Ok(())
    }
}
