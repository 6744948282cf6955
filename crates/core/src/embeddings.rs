use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

/// Pure text-to-vector function. Implementations must be deterministic.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Fallback embedder for builds without a sentence-embedding model: lowercased
/// character trigrams hashed into a fixed number of buckets. Needs no network or
/// model files, but only captures surface overlap between texts.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let buckets = self.dimensions.max(1);
        let mut vector = vec![0f32; buckets];
        let chars: Vec<char> = text.chars().flat_map(char::to_lowercase).collect();

        for window in chars.windows(3) {
            let bucket = (trigram_hash(window) % buckets as u64) as usize;
            vector[bucket] += 1.0;
        }

        normalize(&mut vector);
        vector
    }
}

/// FNV-1a over the UTF-8 encoding of a character window.
fn trigram_hash(window: &[char]) -> u64 {
    let mut utf8 = [0u8; 4];
    window.iter().fold(FNV_OFFSET, |hash, ch| {
        ch.encode_utf8(&mut utf8)
            .bytes()
            .fold(hash, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME))
    })
}

fn normalize(vector: &mut [f32]) {
    let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        vector.iter_mut().for_each(|value| *value /= magnitude);
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model_name(&self) -> &str {
        "char-trigram-hash"
    }

    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        Ok(self.embed_text(text))
    }
}

/// Embeddings from an OpenAI-compatible `/embeddings` endpoint, for example a
/// text-embeddings-inference server hosting `all-MiniLM-L6-v2` (384 dimensions).
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.into(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            dimensions,
        })
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| ProviderError::EmptyResponse(self.endpoint.clone()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self.client.post(&self.endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.trim());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(ProviderError::Response {
                provider: self.endpoint.clone(),
                details: format!("{status}: {body}"),
            });
        }

        let mut parsed: EmbeddingResponse = response.json().await?;
        parsed.data.sort_by_key(|entry| entry.index);
        if parsed.data.len() != texts.len() {
            return Err(ProviderError::Response {
                provider: self.endpoint.clone(),
                details: format!(
                    "returned {} embeddings for {} inputs",
                    parsed.data.len(),
                    texts.len()
                ),
            });
        }

        parsed
            .data
            .into_iter()
            .map(|entry| {
                if entry.embedding.len() == self.dimensions {
                    Ok(entry.embedding)
                } else {
                    Err(ProviderError::DimensionMismatch {
                        expected: self.dimensions,
                        actual: entry.embedding.len(),
                    })
                }
            })
            .collect()
    }
}
