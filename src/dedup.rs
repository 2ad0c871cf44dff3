use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::config::DedupConfig;
use crate::error::PipelineError;
use crate::vector::{embedding_bucket, VectorStore, TARGET_VECTOR};

/// Tagged classification from the deduplicator. The orchestrator pattern
/// matches on this; there is no implicit "skip" edge.
#[derive(Debug, Clone)]
pub enum DedupOutcome {
    Unique,
    Duplicate { cluster_id: String, similarity: f32 },
}

/// One mutex per coarse embedding bucket, created on demand. Holding a
/// bucket's guard across the check-then-write sequence keeps a
/// near-simultaneous duplicate in the same bucket from also being
/// classified unique.
pub struct BucketLocks {
    locks: DashMap<u16, Arc<Mutex<()>>>,
}

impl BucketLocks {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    pub async fn acquire(&self, bucket: u16) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(bucket).or_default().value().clone();
        lock.lock_owned().await
    }
}

impl Default for BucketLocks {
    fn default() -> Self {
        Self::new()
    }
}

/// Classifies incoming articles as unique or duplicate against the
/// existing corpus by nearest-neighbor cosine similarity.
pub struct Deduplicator {
    vectors: Arc<dyn VectorStore>,
    config: DedupConfig,
    locks: BucketLocks,
}

impl Deduplicator {
    pub fn new(vectors: Arc<dyn VectorStore>, config: DedupConfig) -> Self {
        Self {
            vectors,
            config,
            locks: BucketLocks::new(),
        }
    }

    /// Serialize check-then-write for this embedding's bucket. The caller
    /// holds the returned guard until the article's index write completes.
    pub async fn lock_bucket(&self, embedding: &[f32]) -> OwnedMutexGuard<()> {
        self.locks.acquire(embedding_bucket(embedding)).await
    }

    /// Classify against the top-N nearest stored articles.
    ///
    /// The threshold is inclusive: a best similarity exactly at the
    /// threshold classifies as duplicate. An empty corpus is always
    /// unique. Fails closed on vector-store errors — the article is
    /// neither stored nor discarded, and the caller retries.
    pub async fn check(&self, embedding: &[f32]) -> Result<DedupOutcome, PipelineError> {
        let neighbors = self
            .vectors
            .query_similar(embedding, self.config.neighbor_count, None)
            .await
            .map_err(|e| PipelineError::dependency("vector store", e))?;

        let Some(best) = neighbors.iter().max_by(|a, b| {
            a.similarity
                .partial_cmp(&b.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        }) else {
            debug!(target: TARGET_VECTOR, "empty corpus, article is unique");
            return Ok(DedupOutcome::Unique);
        };

        if best.similarity >= self.config.threshold {
            // Propagate the neighbor's existing cluster rather than
            // creating a new one. A representative's cluster id is its
            // own article id, so the fallback covers pre-cluster records.
            let cluster_id = best
                .payload
                .cluster_id
                .clone()
                .unwrap_or_else(|| best.article_id.clone());
            info!(
                target: TARGET_VECTOR,
                similarity = best.similarity,
                cluster_id = %cluster_id,
                "duplicate detected"
            );
            return Ok(DedupOutcome::Duplicate {
                cluster_id,
                similarity: best.similarity,
            });
        }

        if best.similarity >= self.config.threshold - self.config.near_miss_margin {
            // Near-duplicate band: flagged for review, still classified
            // unique. A tunable, not a third state.
            warn!(
                target: TARGET_VECTOR,
                similarity = best.similarity,
                threshold = self.config.threshold,
                neighbor = %best.article_id,
                "near-duplicate below threshold"
            );
        }

        Ok(DedupOutcome::Unique)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryVectorStore;
    use crate::vector::VectorPayload;

    fn unit(x: f32, y: f32) -> Vec<f32> {
        let norm = (x * x + y * y).sqrt();
        vec![x / norm, y / norm]
    }

    fn payload(article_id: &str, cluster_id: &str) -> VectorPayload {
        VectorPayload {
            article_id: article_id.to_string(),
            cluster_id: Some(cluster_id.to_string()),
            ..Default::default()
        }
    }

    fn deduplicator(store: Arc<MemoryVectorStore>) -> Deduplicator {
        Deduplicator::new(store, DedupConfig::default())
    }

    #[tokio::test]
    async fn empty_store_is_always_unique() {
        let store = Arc::new(MemoryVectorStore::new());
        let dedup = deduplicator(store);
        let outcome = dedup.check(&unit(1.0, 0.0)).await.unwrap();
        assert!(matches!(outcome, DedupOutcome::Unique));
    }

    #[tokio::test]
    async fn near_identical_content_is_duplicate_of_existing_cluster() {
        let store = Arc::new(MemoryVectorStore::new());
        store
            .upsert("a1", &unit(1.0, 0.0), "doc", &payload("a1", "a1"))
            .await
            .unwrap();

        let dedup = deduplicator(Arc::clone(&store));
        // cos = 0.995 against the stored vector
        let outcome = dedup.check(&unit(1.0, 0.1)).await.unwrap();
        match outcome {
            DedupOutcome::Duplicate {
                cluster_id,
                similarity,
            } => {
                assert_eq!(cluster_id, "a1");
                assert!(similarity > 0.99);
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn threshold_is_inclusive() {
        let store = Arc::new(MemoryVectorStore::new());
        store
            .upsert("a1", &unit(1.0, 0.0), "doc", &payload("a1", "a1"))
            .await
            .unwrap();

        // Pin the threshold to the exact similarity the store will compute
        // so the comparison exercises the >= boundary, not float noise.
        let angle = 0.70_f32.acos();
        let query = unit(angle.cos(), angle.sin());
        let exact = crate::vector::cosine_similarity(&unit(1.0, 0.0), &query).unwrap();

        let config = DedupConfig {
            threshold: exact,
            ..DedupConfig::default()
        };
        let dedup = Deduplicator::new(Arc::clone(&store) as Arc<dyn VectorStore>, config);

        let outcome = dedup.check(&query).await.unwrap();
        assert!(
            matches!(outcome, DedupOutcome::Duplicate { .. }),
            "similarity at exactly the threshold classifies as duplicate"
        );
    }

    #[tokio::test]
    async fn below_threshold_is_unique_even_in_near_miss_band() {
        let store = Arc::new(MemoryVectorStore::new());
        store
            .upsert("a1", &unit(1.0, 0.0), "doc", &payload("a1", "a1"))
            .await
            .unwrap();

        let dedup = deduplicator(Arc::clone(&store));
        // cos = 0.60: inside [0.55, 0.70) review band, still unique
        let angle = 0.60_f32.acos();
        let outcome = dedup.check(&unit(angle.cos(), angle.sin())).await.unwrap();
        assert!(matches!(outcome, DedupOutcome::Unique));
    }

    #[tokio::test]
    async fn duplicate_links_to_cluster_not_neighbor() {
        // The nearest neighbor is itself a duplicate; the new article must
        // inherit the cluster id, not the neighbor's own article id.
        let store = Arc::new(MemoryVectorStore::new());
        store
            .upsert("a2", &unit(1.0, 0.0), "doc", &payload("a2", "a1"))
            .await
            .unwrap();

        let dedup = deduplicator(Arc::clone(&store));
        let outcome = dedup.check(&unit(1.0, 0.05)).await.unwrap();
        match outcome {
            DedupOutcome::Duplicate { cluster_id, .. } => assert_eq!(cluster_id, "a1"),
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn store_failure_fails_closed() {
        let store = Arc::new(MemoryVectorStore::new());
        store.set_failing(true);
        let dedup = deduplicator(store);
        let err = dedup.check(&unit(1.0, 0.0)).await.unwrap_err();
        assert!(matches!(err, PipelineError::DependencyUnavailable { .. }));
    }

    #[tokio::test]
    async fn unrelated_insertions_between_do_not_break_detection() {
        let store = Arc::new(MemoryVectorStore::new());
        store
            .upsert("a1", &unit(1.0, 0.0), "doc", &payload("a1", "a1"))
            .await
            .unwrap();
        // Unrelated article far away in embedding space.
        store
            .upsert("b1", &unit(-1.0, 0.2), "doc", &payload("b1", "b1"))
            .await
            .unwrap();

        let dedup = deduplicator(Arc::clone(&store));
        let outcome = dedup.check(&unit(1.0, 0.05)).await.unwrap();
        match outcome {
            DedupOutcome::Duplicate { cluster_id, .. } => assert_eq!(cluster_id, "a1"),
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn bucket_lock_serializes_same_bucket() {
        let store = Arc::new(MemoryVectorStore::new());
        let dedup = Arc::new(deduplicator(store));
        let embedding = unit(1.0, 0.5);

        let guard = dedup.lock_bucket(&embedding).await;
        let second = {
            let dedup = Arc::clone(&dedup);
            let embedding = embedding.clone();
            tokio::spawn(async move { dedup.lock_bucket(&embedding).await })
        };
        // The second acquisition cannot complete while the guard is held.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!second.is_finished());
        drop(guard);
        second.await.unwrap();
    }
}
