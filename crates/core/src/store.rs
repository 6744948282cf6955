use crate::embeddings::Embedder;
use crate::error::ProviderError;
use crate::models::{Chunk, RetrievedChunk};
use tracing::debug;

/// Exact cosine-similarity index over one document's chunks. Immutable once built.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimensions: usize,
    entries: Vec<IndexEntry>,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    chunk: Chunk,
    vector: Vec<f32>,
}

impl VectorIndex {
    pub async fn build(chunks: Vec<Chunk>, embedder: &dyn Embedder) -> Result<Self, ProviderError> {
        let texts = chunks
            .iter()
            .map(|chunk| chunk.text.clone())
            .collect::<Vec<_>>();
        let vectors = embedder.embed_batch(&texts).await?;

        if vectors.len() != chunks.len() {
            return Err(ProviderError::Response {
                provider: embedder.model_name().to_string(),
                details: format!(
                    "embedding count {} doesn't match chunk count {}",
                    vectors.len(),
                    chunks.len()
                ),
            });
        }

        Self::from_parts(embedder.dimensions(), chunks.into_iter().zip(vectors))
    }

    pub fn from_parts(
        dimensions: usize,
        pairs: impl IntoIterator<Item = (Chunk, Vec<f32>)>,
    ) -> Result<Self, ProviderError> {
        let entries = pairs
            .into_iter()
            .map(|(chunk, vector)| {
                if vector.len() != dimensions {
                    return Err(ProviderError::DimensionMismatch {
                        expected: dimensions,
                        actual: vector.len(),
                    });
                }
                Ok(IndexEntry { chunk, vector })
            })
            .collect::<Result<Vec<_>, ProviderError>>()?;

        debug!(chunks = entries.len(), dimensions, "built vector index");
        Ok(Self {
            dimensions,
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.entries.iter().map(|entry| &entry.chunk)
    }

    /// Top `k` chunks by descending similarity, ties broken by ascending chunk index.
    pub fn search(&self, query_vector: &[f32], k: usize) -> Vec<RetrievedChunk> {
        let mut scored = self
            .entries
            .iter()
            .map(|entry| (cosine_similarity(query_vector, &entry.vector), &entry.chunk))
            .collect::<Vec<_>>();

        scored.sort_by(|left, right| {
            right
                .0
                .total_cmp(&left.0)
                .then_with(|| left.1.chunk_index.cmp(&right.1.chunk_index))
        });

        scored
            .into_iter()
            .take(k)
            .map(|(score, chunk)| RetrievedChunk {
                chunk: chunk.clone(),
                score,
            })
            .collect()
    }

    pub async fn retrieve(
        &self,
        embedder: &dyn Embedder,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, ProviderError> {
        let query_vector = embedder.embed(query).await?;
        if query_vector.len() != self.dimensions {
            return Err(ProviderError::DimensionMismatch {
                expected: self.dimensions,
                actual: query_vector.len(),
            });
        }
        Ok(self.search(&query_vector, k))
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let (mut dot, mut left_norm, mut right_norm) = (0f32, 0f32, 0f32);
    for (a, b) in left.iter().zip(right.iter()) {
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }

    let denominator = left_norm.sqrt() * right_norm.sqrt();
    if denominator > 0.0 {
        let similarity = dot / denominator;
        if similarity.is_nan() {
            0.0
        } else {
            similarity
        }
    } else {
        0.0
    }
}
