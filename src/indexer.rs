use std::sync::Arc;

use tracing::{error, info};

use crate::article::Article;
use crate::db::StructuredStore;
use crate::entity::EntityType;
use crate::error::PipelineError;
use crate::vector::{VectorPayload, VectorStore};
use crate::TARGET_PIPELINE;

/// Impacts at or above this confidence are copied into the vector payload
/// for filterable retrieval.
const PAYLOAD_IMPACT_FLOOR: f32 = 0.8;

/// Which halves of a dual-store write have landed. Used to retry only the
/// failed half after a partial failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct StorageReceipt {
    pub vector_stored: bool,
    pub structured_stored: bool,
}

/// Persists finished records into the vector store (semantic retrieval)
/// and the structured store (entity/sector filtering). Effectively
/// idempotent: re-storing an article id overwrites both halves.
pub struct Indexer {
    vectors: Arc<dyn VectorStore>,
    store: Arc<dyn StructuredStore>,
}

impl Indexer {
    pub fn new(vectors: Arc<dyn VectorStore>, store: Arc<dyn StructuredStore>) -> Self {
        Self { vectors, store }
    }

    /// Write both halves. A single-half failure surfaces as
    /// `PartialStorage` naming the failed side; a dual failure as
    /// `DependencyUnavailable`.
    pub async fn store(&self, article: &Article, embedding: &[f32]) -> Result<(), PipelineError> {
        self.store_with_receipt(article, embedding, StorageReceipt::default())
            .await
    }

    /// Resume after a partial failure: halves already marked stored in the
    /// receipt are skipped.
    pub async fn store_with_receipt(
        &self,
        article: &Article,
        embedding: &[f32],
        receipt: StorageReceipt,
    ) -> Result<(), PipelineError> {
        let payload = build_payload(article);

        let vector_result = if receipt.vector_stored {
            Ok(())
        } else {
            self.vectors
                .upsert(&article.id, embedding, &article.normalized_content, &payload)
                .await
        };

        let structured_result = if receipt.structured_stored {
            Ok(())
        } else {
            self.store_structured(article).await
        };

        match (vector_result, structured_result) {
            (Ok(()), Ok(())) => {
                info!(target: TARGET_PIPELINE, article_id = %article.id, "article indexed");
                Ok(())
            }
            (Err(vector_err), Err(structured_err)) => {
                error!(
                    target: TARGET_PIPELINE,
                    article_id = %article.id,
                    vector_error = %vector_err,
                    structured_error = %structured_err,
                    "both stores rejected the write"
                );
                Err(PipelineError::dependency("storage", vector_err))
            }
            (Ok(()), Err(e)) => Err(PipelineError::PartialStorage {
                vector_stored: true,
                structured_stored: false,
                source: e,
            }),
            (Err(e), Ok(())) => Err(PipelineError::PartialStorage {
                vector_stored: false,
                structured_stored: true,
                source: e,
            }),
        }
    }

    async fn store_structured(&self, article: &Article) -> anyhow::Result<()> {
        self.store.upsert_article(article).await?;
        if let Some(cluster_id) = &article.cluster_id {
            // For a representative the cluster id is its own article id,
            // creating the cluster; for duplicates this bumps the count.
            self.store
                .record_cluster_member(cluster_id, cluster_id)
                .await?;
        }
        Ok(())
    }
}

/// Metadata copied next to the embedding so retrieval can filter without
/// touching the structured store.
pub fn build_payload(article: &Article) -> VectorPayload {
    let mut sectors = Vec::new();
    let mut entity_values = Vec::new();
    for entity in &article.entities {
        match entity.entity_type {
            EntityType::Sector => sectors.push(entity.value.to_lowercase()),
            EntityType::Company | EntityType::Regulator => {
                entity_values.push(entity.value.to_lowercase())
            }
            EntityType::Event => {}
        }
    }

    let impacted_symbols = article
        .stock_impacts
        .iter()
        .filter(|impact| impact.confidence >= PAYLOAD_IMPACT_FLOOR)
        .map(|impact| impact.stock_symbol.clone())
        .collect();

    VectorPayload {
        article_id: article.id.clone(),
        title: article.title.clone(),
        source: article.source.clone(),
        published_at: Some(article.published_at),
        cluster_id: article.cluster_id.clone(),
        is_duplicate: article.is_duplicate,
        sectors,
        entity_values,
        sentiment_label: article.sentiment.as_ref().map(|s| s.label.to_string()),
        impacted_symbols,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::{ImpactType, StockImpact};
    use crate::entity::{Entity, EntityType};
    use crate::testing::{sample_article, MemoryStore, MemoryVectorStore};

    fn article_with_entities(id: &str) -> Article {
        let mut article = sample_article(id);
        article.entities = vec![
            Entity::new(EntityType::Company, "HDFC Bank", 1.0),
            Entity::new(EntityType::Sector, "Banking", 0.9),
            Entity::new(EntityType::Event, "earnings", 0.9),
        ];
        article.stock_impacts = vec![
            StockImpact {
                stock_symbol: "HDFCBANK".to_string(),
                company_name: "HDFC Bank".to_string(),
                impact_type: ImpactType::Direct,
                confidence: 1.0,
                reasoning: "HDFC Bank directly mentioned in article".to_string(),
            },
            StockImpact {
                stock_symbol: "ICICIBANK".to_string(),
                company_name: "ICICI Bank".to_string(),
                impact_type: ImpactType::Sector,
                confidence: 0.67,
                reasoning: "peer".to_string(),
            },
        ];
        article
    }

    #[tokio::test]
    async fn stores_both_halves() {
        let vectors = Arc::new(MemoryVectorStore::new());
        let store = Arc::new(MemoryStore::new());
        let indexer = Indexer::new(Arc::clone(&vectors) as _, Arc::clone(&store) as _);

        let article = article_with_entities("a1");
        indexer.store(&article, &[1.0, 0.0]).await.unwrap();

        assert!(vectors.contains("a1").await);
        assert!(store.get_article("a1").await.unwrap().is_some());
        let cluster = store.get_cluster("a1").await.unwrap().unwrap();
        assert_eq!(cluster.member_count, 1);
    }

    #[tokio::test]
    async fn partial_failure_names_the_failed_half() {
        let vectors = Arc::new(MemoryVectorStore::new());
        let store = Arc::new(MemoryStore::new());
        store.set_failing(true);
        let indexer = Indexer::new(Arc::clone(&vectors) as _, Arc::clone(&store) as _);

        let article = article_with_entities("a1");
        let err = indexer.store(&article, &[1.0, 0.0]).await.unwrap_err();
        match err {
            PipelineError::PartialStorage {
                vector_stored,
                structured_stored,
                ..
            } => {
                assert!(vector_stored);
                assert!(!structured_stored);
            }
            other => panic!("expected PartialStorage, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retrying_the_failed_half_completes_the_record() {
        let vectors = Arc::new(MemoryVectorStore::new());
        let store = Arc::new(MemoryStore::new());
        store.set_failing(true);
        let indexer = Indexer::new(Arc::clone(&vectors) as _, Arc::clone(&store) as _);

        let article = article_with_entities("a1");
        let err = indexer.store(&article, &[1.0, 0.0]).await.unwrap_err();
        let receipt = match err {
            PipelineError::PartialStorage {
                vector_stored,
                structured_stored,
                ..
            } => StorageReceipt {
                vector_stored,
                structured_stored,
            },
            other => panic!("expected PartialStorage, got {other:?}"),
        };

        store.set_failing(false);
        let upserts_before = vectors.upsert_count();
        indexer
            .store_with_receipt(&article, &[1.0, 0.0], receipt)
            .await
            .unwrap();
        assert_eq!(
            vectors.upsert_count(),
            upserts_before,
            "already-stored half is not rewritten"
        );
        assert!(store.get_article("a1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dual_failure_is_dependency_unavailable() {
        let vectors = Arc::new(MemoryVectorStore::new());
        vectors.set_failing(true);
        let store = Arc::new(MemoryStore::new());
        store.set_failing(true);
        let indexer = Indexer::new(Arc::clone(&vectors) as _, Arc::clone(&store) as _);

        let err = indexer
            .store(&article_with_entities("a1"), &[1.0, 0.0])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::DependencyUnavailable { .. }));
    }

    #[test]
    fn payload_separates_sectors_from_entity_values() {
        let article = article_with_entities("a1");
        let payload = build_payload(&article);
        assert_eq!(payload.sectors, vec!["banking".to_string()]);
        assert_eq!(payload.entity_values, vec!["hdfc bank".to_string()]);
        // Only the >= 0.8 impact makes it into the payload.
        assert_eq!(payload.impacted_symbols, vec!["HDFCBANK".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_membership_bumps_cluster_count() {
        let vectors = Arc::new(MemoryVectorStore::new());
        let store = Arc::new(MemoryStore::new());
        let indexer = Indexer::new(Arc::clone(&vectors) as _, Arc::clone(&store) as _);

        let representative = article_with_entities("rep");
        indexer.store(&representative, &[1.0, 0.0]).await.unwrap();

        let mut duplicate = sample_article("dup");
        duplicate.is_duplicate = true;
        duplicate.cluster_id = Some("rep".to_string());
        indexer.store(&duplicate, &[1.0, 0.01]).await.unwrap();

        let cluster = store.get_cluster("rep").await.unwrap().unwrap();
        assert_eq!(cluster.member_count, 2);
    }
}
