use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, Distance, Filter, PointStruct, SearchPointsBuilder,
    UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info};

use crate::vector::{SearchFilter, SimilarPoint, VectorPayload, VectorStore, TARGET_VECTOR};

/// Vector store backed by a Qdrant collection with cosine distance.
pub struct QdrantStore {
    client: Qdrant,
    collection: String,
}

impl QdrantStore {
    pub fn connect(url: &str, collection: &str) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            collection: collection.to_string(),
        })
    }

    /// Create the collection if it does not exist yet.
    pub async fn ensure_collection(&self, dimensions: usize) -> Result<()> {
        if self.client.collection_exists(&self.collection).await? {
            return Ok(());
        }
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection)
                    .vectors_config(VectorParamsBuilder::new(dimensions as u64, Distance::Cosine)),
            )
            .await
            .with_context(|| format!("failed to create collection '{}'", self.collection))?;
        info!(
            target: TARGET_VECTOR,
            "Created collection '{}' ({} dimensions, cosine)", self.collection, dimensions
        );
        Ok(())
    }
}

/// Derive a stable Qdrant point id from an article id: the first 8 bytes of
/// SHA-256(id) as a big-endian u64. The same article id always maps to the
/// same point, which makes upserts idempotent.
pub fn article_point_id(article_id: &str) -> u64 {
    let hash = Sha256::digest(article_id.as_bytes());
    let bytes: [u8; 8] = hash[..8].try_into().expect("SHA-256 yields at least 8 bytes");
    u64::from_be_bytes(bytes)
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn upsert(
        &self,
        article_id: &str,
        embedding: &[f32],
        document: &str,
        payload: &VectorPayload,
    ) -> Result<()> {
        let point_payload: Payload = json!({
            "article_id": article_id,
            "title": payload.title,
            "source": payload.source,
            "published_at": payload.published_at.map(|d| d.to_rfc3339()),
            "cluster_id": payload.cluster_id,
            "is_duplicate": payload.is_duplicate,
            "sectors": payload.sectors,
            "entity_values": payload.entity_values,
            "sentiment_label": payload.sentiment_label,
            "impacted_symbols": payload.impacted_symbols,
            "document": document,
        })
        .try_into()
        .map_err(|e| anyhow::anyhow!("payload conversion failed: {e}"))?;

        let point = PointStruct::new(
            article_point_id(article_id),
            embedding.to_vec(),
            point_payload,
        );

        match self
            .client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, vec![point]).wait(true))
            .await
        {
            Ok(_) => {
                info!(
                    target: TARGET_VECTOR,
                    "Stored embedding for article {}", article_id
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    target: TARGET_VECTOR,
                    "Failed to store embedding for article {}: {:?}", article_id, e
                );
                Err(anyhow::anyhow!("Failed to store embedding: {:?}", e))
            }
        }
    }

    async fn query_similar(
        &self,
        embedding: &[f32],
        top_n: u64,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SimilarPoint>> {
        let mut builder =
            SearchPointsBuilder::new(&self.collection, embedding.to_vec(), top_n).with_payload(true);

        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            let mut conditions = Vec::new();
            if !filter.sectors.is_empty() {
                conditions.push(Condition::matches("sectors", filter.sectors.clone()));
            }
            if !filter.entity_values.is_empty() {
                conditions.push(Condition::matches(
                    "entity_values",
                    filter.entity_values.clone(),
                ));
            }
            builder = builder.filter(Filter::should(conditions));
        }

        let response = self
            .client
            .search_points(builder)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to search for similar articles: {:?}", e))?;

        let matches = response
            .result
            .into_iter()
            .map(|scored| {
                let payload = scored.payload;
                SimilarPoint {
                    article_id: payload_str(&payload, "article_id").unwrap_or_default(),
                    similarity: scored.score,
                    payload: VectorPayload {
                        article_id: payload_str(&payload, "article_id").unwrap_or_default(),
                        title: payload_str(&payload, "title").unwrap_or_default(),
                        source: payload_str(&payload, "source").unwrap_or_default(),
                        published_at: payload_str(&payload, "published_at")
                            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                            .map(|d| d.to_utc()),
                        cluster_id: payload_str(&payload, "cluster_id"),
                        is_duplicate: payload_bool(&payload, "is_duplicate").unwrap_or(false),
                        sectors: payload_str_list(&payload, "sectors"),
                        entity_values: payload_str_list(&payload, "entity_values"),
                        sentiment_label: payload_str(&payload, "sentiment_label"),
                        impacted_symbols: payload_str_list(&payload, "impacted_symbols"),
                    },
                }
            })
            .collect::<Vec<_>>();

        info!(
            target: TARGET_VECTOR,
            "Found {} similar articles", matches.len()
        );
        Ok(matches)
    }
}

fn payload_str(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(|v| v.kind.as_ref())
        .and_then(|k| match k {
            Kind::StringValue(s) => Some(s.clone()),
            _ => None,
        })
}

fn payload_bool(payload: &HashMap<String, Value>, key: &str) -> Option<bool> {
    payload
        .get(key)
        .and_then(|v| v.kind.as_ref())
        .and_then(|k| match k {
            Kind::BoolValue(b) => Some(*b),
            _ => None,
        })
}

fn payload_str_list(payload: &HashMap<String, Value>, key: &str) -> Vec<String> {
    payload
        .get(key)
        .and_then(|v| v.kind.as_ref())
        .map(|k| match k {
            Kind::ListValue(list) => list
                .values
                .iter()
                .filter_map(|v| v.kind.as_ref())
                .filter_map(|k| match k {
                    Kind::StringValue(s) => Some(s.clone()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_id_is_stable_per_article() {
        let id = "0b1ff462-9be7-4b21-a4ad-2368ab1cb6cb";
        assert_eq!(article_point_id(id), article_point_id(id));
    }

    #[test]
    fn different_articles_get_different_point_ids() {
        assert_ne!(article_point_id("article-a"), article_point_id("article-b"));
    }
}
