//! Per-identity vector index on Qdrant
//!
//! One collection per identity holds the embedded passages produced during
//! ingestion. Point ids derive from a content hash, so re-indexing the same
//! passage is an upsert, not a duplicate.

mod passage;

pub use passage::{passages_from_annotation, passages_from_table, split_passages, Passage};

use crate::error::{Error, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, Distance, PointStruct, SearchPointsBuilder, UpsertPointsBuilder,
    VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

/// A passage with its embedding, ready for upsert
#[derive(Debug, Clone)]
pub struct PassagePoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub text: String,
    pub source: String,
}

impl PassagePoint {
    /// Build a point with a stable id derived from the passage content
    pub fn new(passage: Passage, vector: Vec<f32>) -> Self {
        let hash = blake3::hash(format!("{}\0{}", passage.source, passage.text).as_bytes());
        let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, hash.as_bytes());
        Self {
            id,
            vector,
            text: passage.text,
            source: passage.source,
        }
    }

    fn into_point_struct(self) -> PointStruct {
        let mut payload: HashMap<String, qdrant_client::qdrant::Value> = HashMap::new();
        payload.insert("text".to_string(), string_value(self.text));
        payload.insert("source".to_string(), string_value(self.source));
        PointStruct::new(self.id.to_string(), self.vector, payload)
    }
}

/// One similarity hit
#[derive(Debug, Clone)]
pub struct PassageHit {
    pub score: f32,
    pub text: String,
    pub source: String,
}

/// Read-side seam over the passage index
#[async_trait]
pub trait PassageSearch: Send + Sync {
    /// Nearest passages to a query vector
    async fn search(&self, query_vector: Vec<f32>, limit: usize) -> Result<Vec<PassageHit>>;
}

#[async_trait]
impl PassageSearch for PassageStore {
    async fn search(&self, query_vector: Vec<f32>, limit: usize) -> Result<Vec<PassageHit>> {
        PassageStore::search(self, query_vector, limit).await
    }
}

/// Handle to one identity's passage collection
pub struct PassageStore {
    client: Qdrant,
    collection: String,
    dimension: usize,
}

impl PassageStore {
    /// Connect to Qdrant for a given identity collection
    pub async fn connect(url: &str, collection: &str, dimension: usize) -> Result<Self> {
        debug!("Connecting to Qdrant at {}", url);

        let client = Qdrant::from_url(url)
            .skip_compatibility_check()
            .build()
            .map_err(|e| Error::Qdrant(e.to_string()))?;

        Ok(Self {
            client,
            collection: collection.to_string(),
            dimension,
        })
    }

    /// Ensure the collection exists with the expected dimension
    pub async fn ensure_collection(&self) -> Result<()> {
        if self.client.collection_exists(&self.collection).await? {
            debug!("Collection {} already exists", self.collection);
            return Ok(());
        }

        info!(
            "Creating collection {} with dimension {}",
            self.collection, self.dimension
        );

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection).vectors_config(
                    VectorParamsBuilder::new(self.dimension as u64, Distance::Cosine),
                ),
            )
            .await?;

        Ok(())
    }

    /// Check if the collection exists
    pub async fn collection_exists(&self) -> Result<bool> {
        Ok(self.client.collection_exists(&self.collection).await?)
    }

    /// Delete the collection if it exists
    pub async fn delete_collection(&self) -> Result<bool> {
        if !self.client.collection_exists(&self.collection).await? {
            return Ok(false);
        }
        info!("Deleting collection {}", self.collection);
        self.client.delete_collection(&self.collection).await?;
        Ok(true)
    }

    /// Upsert passage points
    pub async fn upsert_passages(&self, points: Vec<PassagePoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        if let Some(mismatch) = points.iter().find(|p| p.vector.len() != self.dimension) {
            return Err(Error::Qdrant(format!(
                "Vector dimension mismatch for collection '{}': expected {}, got {}",
                self.collection,
                self.dimension,
                mismatch.vector.len()
            )));
        }

        debug!(
            "Upserting {} passages to collection {}",
            points.len(),
            self.collection
        );

        let point_structs: Vec<PointStruct> = points
            .into_iter()
            .map(|p| p.into_point_struct())
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, point_structs))
            .await?;

        Ok(())
    }

    /// Search for the passages nearest to a query vector
    pub async fn search(&self, query_vector: Vec<f32>, limit: usize) -> Result<Vec<PassageHit>> {
        debug!(
            "Searching collection {} with limit {}",
            self.collection, limit
        );

        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection, query_vector, limit as u64)
                    .with_payload(true),
            )
            .await?;

        let hits = response
            .result
            .into_iter()
            .map(|point| {
                let text = payload_string(&point.payload, "text");
                let source = payload_string(&point.payload, "source");
                PassageHit {
                    score: point.score,
                    text,
                    source,
                }
            })
            .collect();

        Ok(hits)
    }
}

/// Seam for the ingestion-side write path of the passage index
#[async_trait]
pub trait PassageIndexer: Send + Sync {
    /// Embed and upsert the run's passages into the identity's collection
    async fn index(&self, identity_id: i64, passages: Vec<Passage>) -> Result<()>;
}

/// Production indexer: loads the embedder once per call (the per-run model
/// barrier) and upserts into the identity's Qdrant collection
pub struct QdrantIndexer<'a> {
    pub config: &'a crate::config::Config,
}

#[async_trait]
impl PassageIndexer for QdrantIndexer<'_> {
    async fn index(&self, identity_id: i64, passages: Vec<Passage>) -> Result<()> {
        if passages.is_empty() {
            debug!("No passages to index for identity {}", identity_id);
            return Ok(());
        }

        let embedder = crate::embed::create_embedder(&self.config.embedding)?;
        let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        let vectors =
            crate::embed::embed_in_batches(embedder.as_ref(), texts, self.config.embedding.batch_size)
                .await?;

        let store = PassageStore::connect(
            &self.config.qdrant_url,
            &self.config.collection_name(identity_id),
            embedder.dimension(),
        )
        .await?;
        store.ensure_collection().await?;

        let points: Vec<PassagePoint> = passages
            .into_iter()
            .zip(vectors)
            .map(|(passage, vector)| PassagePoint::new(passage, vector))
            .collect();

        info!(
            "Indexing {} passages for identity {}",
            points.len(),
            identity_id
        );
        store.upsert_passages(points).await
    }
}

fn string_value(s: String) -> qdrant_client::qdrant::Value {
    qdrant_client::qdrant::Value {
        kind: Some(qdrant_client::qdrant::value::Kind::StringValue(s)),
    }
}

fn payload_string(
    payload: &HashMap<String, qdrant_client::qdrant::Value>,
    key: &str,
) -> String {
    payload
        .get(key)
        .and_then(|v| match &v.kind {
            Some(qdrant_client::qdrant::value::Kind::StringValue(s)) => Some(s.clone()),
            _ => None,
        })
        .unwrap_or_default()
}
