//! Embedding generation
//!
//! Abstraction over embedding models with a trait for different backends
//! and batch processing helpers. The concrete backend is FastEmbed, loaded
//! locally once per ingestion run.

#[cfg(feature = "local-embed")]
mod fastembed_impl;

#[cfg(feature = "local-embed")]
pub use fastembed_impl::FastEmbedder;

use crate::config::EmbeddingConfig;
use crate::error::Result;
use async_trait::async_trait;

/// Trait for embedding providers
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Create an embedder based on configuration
///
/// This is the batch-scoped model load: call it once per ingestion run or
/// conversational turn, never per file.
#[cfg(feature = "local-embed")]
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    let embedder = FastEmbedder::new(config)?;
    Ok(Box::new(embedder))
}

#[cfg(not(feature = "local-embed"))]
pub fn create_embedder(_config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    Err(crate::error::Error::Embedding(
        "Built without the local-embed feature; no embedding backend available".to_string(),
    ))
}

/// Helper to embed in batches
pub async fn embed_in_batches(
    embedder: &dyn Embedder,
    texts: Vec<String>,
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut all_embeddings = Vec::with_capacity(texts.len());

    for chunk in texts.chunks(batch_size.max(1)) {
        let embeddings = embedder.embed(chunk.to_vec()).await?;
        all_embeddings.extend(embeddings);
    }

    Ok(all_embeddings)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubEmbedder {
        dimension: usize,
    }

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0; self.dimension];
                    v[0] = t.len() as f32;
                    v
                })
                .collect())
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn model_name(&self) -> &str {
            "stub"
        }
    }

    #[tokio::test]
    async fn test_embed_in_batches_preserves_order_and_count() {
        let embedder = StubEmbedder { dimension: 4 };
        let texts: Vec<String> = (0..7).map(|i| "x".repeat(i + 1)).collect();

        let embeddings = embed_in_batches(&embedder, texts, 3).await.unwrap();
        assert_eq!(embeddings.len(), 7);
        assert_eq!(embeddings[0][0], 1.0);
        assert_eq!(embeddings[6][0], 7.0);
    }
}
