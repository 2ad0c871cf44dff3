use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod embedding;
pub mod qdrant;
pub mod similarity;

pub use embedding::{E5Config, E5Embedder, EmbeddingProvider};
pub use qdrant::QdrantStore;
pub use similarity::{cosine_similarity, embedding_bucket};

// Module-level constants
pub const TARGET_VECTOR: &str = "vector";

/// Metadata stored alongside each embedding so similarity hits can be
/// filtered and ranked without a round trip to the structured store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorPayload {
    pub article_id: String,
    pub title: String,
    pub source: String,
    pub published_at: Option<DateTime<Utc>>,
    pub cluster_id: Option<String>,
    pub is_duplicate: bool,
    /// Sector entity values, lowercase.
    pub sectors: Vec<String>,
    /// Company and regulator canonical values, lowercase.
    pub entity_values: Vec<String>,
    pub sentiment_label: Option<String>,
    /// Symbols with impact confidence >= 0.8.
    pub impacted_symbols: Vec<String>,
}

/// One similarity hit from the vector store.
#[derive(Debug, Clone)]
pub struct SimilarPoint {
    pub article_id: String,
    pub similarity: f32,
    pub payload: VectorPayload,
}

/// Optional structured filter applied inside a similarity search. A point
/// matches when any of its sectors or entity values appears in the
/// corresponding list.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub sectors: Vec<String>,
    pub entity_values: Vec<String>,
}

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty() && self.entity_values.is_empty()
    }
}

/// Narrow interface over the vector-similarity store. Upserts are atomic
/// per article id: a reader sees either the whole old record or the whole
/// new one, never a partial write.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(
        &self,
        article_id: &str,
        embedding: &[f32],
        document: &str,
        payload: &VectorPayload,
    ) -> anyhow::Result<()>;

    async fn query_similar(
        &self,
        embedding: &[f32],
        top_n: u64,
        filter: Option<&SearchFilter>,
    ) -> anyhow::Result<Vec<SimilarPoint>>;
}
