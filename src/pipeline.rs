use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::article::{Article, IngestOutcome, RawArticle};
use crate::catalog::EntityCatalog;
use crate::config::{AppConfig, RetryConfig, StageTimeouts};
use crate::db::StructuredStore;
use crate::dedup::{DedupOutcome, Deduplicator};
use crate::entity::EntityExtractor;
use crate::error::PipelineError;
use crate::impact::ImpactScorer;
use crate::indexer::{Indexer, StorageReceipt};
use crate::normalize;
use crate::retry::retry_with_backoff;
use crate::sentiment::{neutral_fallback, SentimentClassifier, SentimentModel};
use crate::vector::{EmbeddingProvider, VectorStore};
use crate::TARGET_PIPELINE;

/// Outcome counts for a batch ingest run.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchStats {
    pub total: usize,
    pub stored: usize,
    pub duplicates: usize,
    /// Rejected before pipeline entry (malformed input). Never retried.
    pub rejected: usize,
    /// Failed on a dependency after retries. Deferred, not dropped.
    pub deferred: usize,
}

/// The per-article ingestion pipeline:
/// normalize -> dedup -> (unique only) extract -> impact -> sentiment -> index.
///
/// All stages for one article run in sequence on one task; many articles
/// may run concurrently through `ingest_batch`. Providers are constructed
/// once at startup and injected here — the pipeline holds no global state.
pub struct Pipeline {
    embedder: Arc<dyn EmbeddingProvider>,
    deduplicator: Deduplicator,
    extractor: EntityExtractor,
    impact: ImpactScorer,
    sentiment: SentimentClassifier,
    indexer: Indexer,
    timeouts: StageTimeouts,
    retry: RetryConfig,
}

impl Pipeline {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorStore>,
        store: Arc<dyn StructuredStore>,
        sentiment_model: Arc<dyn SentimentModel>,
        catalog: Arc<EntityCatalog>,
        config: &AppConfig,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            embedder,
            deduplicator: Deduplicator::new(Arc::clone(&vectors), config.dedup.clone()),
            extractor: EntityExtractor::new(Arc::clone(&catalog))?,
            impact: ImpactScorer::new(catalog),
            sentiment: SentimentClassifier::new(sentiment_model),
            indexer: Indexer::new(vectors, store),
            timeouts: config.timeouts.clone(),
            retry: config.retry.clone(),
        })
    }

    /// Ingest one article. Returns the tri-state outcome or an error:
    /// `InvalidInput` for rejected text, a retriable error when a
    /// dependency stayed down (the article is deferred, not dropped).
    pub async fn ingest(&self, raw: RawArticle) -> Result<IngestOutcome, PipelineError> {
        // Stage 1: normalize. Fail-closed, no retry.
        let normalized = normalize::normalize(&raw.title, &raw.content)?;
        let combined = normalized.combined();

        // Stage 2: embed. Fail-closed; retried with backoff.
        let embedding = retry_with_backoff(self.retry.max_retries, self.retry.base_delay_ms, || {
            with_timeout("embed", self.timeouts.embed_ms, async {
                self.embedder
                    .embed(&combined)
                    .await
                    .map_err(|e| PipelineError::dependency("embedding provider", e))
            })
        })
        .await?;

        // The check-then-write sequence for this embedding's bucket must
        // not race with a near-duplicate in flight; hold the bucket lock
        // until the index write lands.
        let _bucket_guard = self.deduplicator.lock_bucket(&embedding).await;

        // Stage 3: dedup. Fail-closed; retried with backoff.
        let outcome = retry_with_backoff(self.retry.max_retries, self.retry.base_delay_ms, || {
            with_timeout(
                "dedup",
                self.timeouts.dedup_ms,
                self.deduplicator.check(&embedding),
            )
        })
        .await?;

        let article_id = Uuid::new_v4().to_string();
        let ingested_at = Utc::now();

        match outcome {
            DedupOutcome::Duplicate {
                cluster_id,
                similarity,
            } => {
                // Duplicates are recorded and linked but not enriched.
                let article = Article {
                    id: article_id.clone(),
                    title: normalized.title,
                    normalized_content: normalized.content,
                    source: raw.source,
                    url: raw.url,
                    published_at: raw.published_at,
                    ingested_at,
                    is_duplicate: true,
                    cluster_id: Some(cluster_id.clone()),
                    sentiment: None,
                    entities: Vec::new(),
                    stock_impacts: Vec::new(),
                };
                self.persist(&article, &embedding).await?;
                info!(
                    target: TARGET_PIPELINE,
                    article_id = %article_id,
                    cluster_id = %cluster_id,
                    similarity,
                    "duplicate linked to existing cluster"
                );
                Ok(IngestOutcome::Duplicate {
                    article_id,
                    cluster_id,
                    similarity,
                })
            }
            DedupOutcome::Unique => {
                // Stage 4: entity extraction. Fail-open; an internal error
                // already degrades to an empty result inside the extractor.
                let entities = self.extractor.extract(&combined);

                // Stage 5: impact scoring. Deterministic and synchronous.
                let stock_impacts = self.impact.score(&entities);

                // Stage 6: sentiment. Fail-open; a timeout degrades to the
                // neutral low-confidence default like any model failure.
                let sentiment = match with_timeout("sentiment", self.timeouts.sentiment_ms, async {
                    Ok(self.sentiment.classify(&combined).await)
                })
                .await
                {
                    Ok(assessment) => assessment,
                    Err(e) => {
                        warn!(
                            target: TARGET_PIPELINE,
                            error = %e,
                            "sentiment stage timed out, substituting neutral default"
                        );
                        Some(neutral_fallback())
                    }
                };

                let article = Article {
                    id: article_id.clone(),
                    title: normalized.title,
                    normalized_content: normalized.content,
                    source: raw.source,
                    url: raw.url,
                    published_at: raw.published_at,
                    ingested_at,
                    is_duplicate: false,
                    // Self-referential representative: the new article is
                    // its own cluster.
                    cluster_id: Some(article_id.clone()),
                    sentiment,
                    entities: entities.into_entities(),
                    stock_impacts,
                };
                self.persist(&article, &embedding).await?;
                Ok(IngestOutcome::Stored {
                    article_id: article_id.clone(),
                    cluster_id: article_id,
                })
            }
        }
    }

    /// Index with retry. After a partial failure only the failed half is
    /// retried; the receipt carries which halves have landed across
    /// attempts, so this keeps its own loop instead of the stateless
    /// retry helper.
    async fn persist(&self, article: &Article, embedding: &[f32]) -> Result<(), PipelineError> {
        let mut receipt = StorageReceipt::default();
        let mut attempt = 0u32;
        loop {
            let result = with_timeout(
                "store",
                self.timeouts.store_ms,
                self.indexer.store_with_receipt(article, embedding, receipt),
            )
            .await;

            let err = match result {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            if let PipelineError::PartialStorage {
                vector_stored,
                structured_stored,
                ..
            } = &err
            {
                receipt = StorageReceipt {
                    vector_stored: *vector_stored,
                    structured_stored: *structured_stored,
                };
            }

            if !err.is_retriable() || attempt >= self.retry.max_retries {
                return Err(err);
            }
            attempt += 1;
            let delay_ms = self
                .retry
                .base_delay_ms
                .saturating_mul(1u64 << (attempt - 1).min(10));
            warn!(
                target: TARGET_PIPELINE,
                attempt,
                delay_ms,
                error = %err,
                "storage attempt failed, retrying"
            );
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    /// Process a batch concurrently. Stages for any one article stay
    /// sequential; up to `concurrency` articles run at once.
    pub async fn ingest_batch(&self, articles: Vec<RawArticle>, concurrency: usize) -> BatchStats {
        let mut stats = BatchStats {
            total: articles.len(),
            ..BatchStats::default()
        };

        let mut results = futures::stream::iter(articles.into_iter().map(|raw| self.ingest(raw)))
            .buffer_unordered(concurrency.max(1));

        while let Some(result) = results.next().await {
            match result {
                Ok(IngestOutcome::Stored { .. }) => stats.stored += 1,
                Ok(IngestOutcome::Duplicate { .. }) => stats.duplicates += 1,
                Err(PipelineError::InvalidInput(reason)) => {
                    warn!(target: TARGET_PIPELINE, reason = %reason, "article rejected");
                    stats.rejected += 1;
                }
                Err(e) => {
                    warn!(target: TARGET_PIPELINE, error = %e, "article deferred");
                    stats.deferred += 1;
                }
            }
        }

        info!(
            target: TARGET_PIPELINE,
            total = stats.total,
            stored = stats.stored,
            duplicates = stats.duplicates,
            rejected = stats.rejected,
            deferred = stats.deferred,
            "batch complete"
        );
        stats
    }
}

async fn with_timeout<T, F>(
    stage: &'static str,
    budget_ms: u64,
    fut: F,
) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    match tokio::time::timeout(Duration::from_millis(budget_ms), fut).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Timeout { stage, budget_ms }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::{ImpactType, SentimentLabel};
    use crate::entity::EntityType;
    use crate::sentiment::LexiconModel;
    use crate::testing::{test_catalog, test_config, FakeEmbedder, MemoryStore, MemoryVectorStore};

    struct Harness {
        pipeline: Pipeline,
        vectors: Arc<MemoryVectorStore>,
        store: Arc<MemoryStore>,
    }

    fn harness() -> Harness {
        let vectors = Arc::new(MemoryVectorStore::new());
        let store = Arc::new(MemoryStore::new());
        let pipeline = Pipeline::new(
            Arc::new(FakeEmbedder::new()),
            Arc::clone(&vectors) as _,
            Arc::clone(&store) as _,
            Arc::new(LexiconModel::new()),
            test_catalog(),
            &test_config(),
        )
        .unwrap();
        Harness {
            pipeline,
            vectors,
            store,
        }
    }

    fn raw(title: &str, content: &str, source: &str) -> RawArticle {
        RawArticle {
            title: title.to_string(),
            content: content.to_string(),
            source: source.to_string(),
            url: None,
            published_at: Utc::now(),
        }
    }

    const HDFC_BODY: &str = "HDFC Bank posted a sharp rise in net profit for the quarter, \
         with margins holding steady across segments. Analysts expect the stock to open \
         higher after the strong numbers.";

    #[tokio::test]
    async fn scenario_a_direct_mention_bullish() {
        let h = harness();
        let outcome = h
            .pipeline
            .ingest(raw(
                "HDFC Bank reports record quarterly profit, shares seen higher",
                HDFC_BODY,
                "moneycontrol",
            ))
            .await
            .unwrap();

        let article_id = outcome.article_id().to_string();
        assert!(matches!(outcome, IngestOutcome::Stored { .. }));

        let article = h.store.get_article(&article_id).await.unwrap().unwrap();
        let companies: Vec<&str> = article
            .entities
            .iter()
            .filter(|e| e.entity_type == EntityType::Company)
            .map(|e| e.value.as_str())
            .collect();
        assert_eq!(companies, vec!["HDFC Bank"]);

        let direct: Vec<_> = article
            .stock_impacts
            .iter()
            .filter(|i| i.impact_type == ImpactType::Direct)
            .collect();
        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].stock_symbol, "HDFCBANK");
        assert_eq!(direct[0].confidence, 1.0);

        let sentiment = article.sentiment.unwrap();
        assert_eq!(sentiment.label, SentimentLabel::Bullish);
        assert!(sentiment.score > 0.0 && sentiment.score <= 1.0);
    }

    #[tokio::test]
    async fn scenario_b_near_identical_wording_is_duplicate() {
        let h = harness();
        let first = h
            .pipeline
            .ingest(raw(
                "HDFC Bank reports record quarterly profit, shares seen higher",
                HDFC_BODY,
                "moneycontrol",
            ))
            .await
            .unwrap();
        let first_id = first.article_id().to_string();

        let second = h
            .pipeline
            .ingest(raw(
                "HDFC Bank posts record profit, stock gains",
                HDFC_BODY,
                "economic_times",
            ))
            .await
            .unwrap();

        match second {
            IngestOutcome::Duplicate {
                cluster_id,
                similarity,
                article_id,
            } => {
                assert_eq!(cluster_id, first_id);
                assert!(similarity >= 0.70);
                // The duplicate record exists, linked but unenriched.
                let dup = h.store.get_article(&article_id).await.unwrap().unwrap();
                assert!(dup.is_duplicate);
                assert_eq!(dup.cluster_id.as_deref(), Some(first_id.as_str()));
                assert!(dup.entities.is_empty());
                assert!(dup.sentiment.is_none());
            }
            other => panic!("expected duplicate, got {other:?}"),
        }

        let cluster = h.store.get_cluster(&first_id).await.unwrap().unwrap();
        assert_eq!(cluster.member_count, 2);
        assert_eq!(cluster.representative_article_id, first_id);
    }

    #[tokio::test]
    async fn unrelated_articles_stay_unique() {
        let h = harness();
        h.pipeline
            .ingest(raw(
                "HDFC Bank reports record quarterly profit, shares seen higher",
                HDFC_BODY,
                "moneycontrol",
            ))
            .await
            .unwrap();

        let outcome = h
            .pipeline
            .ingest(raw(
                "TCS wins large software services deal in Europe",
                "TCS signed a multi-year software services agreement with a European \
                 retailer, expanding its digital transformation portfolio.",
                "livemint",
            ))
            .await
            .unwrap();
        assert!(matches!(outcome, IngestOutcome::Stored { .. }));
    }

    #[tokio::test]
    async fn scenario_d_regulator_only_article() {
        let h = harness();
        let outcome = h
            .pipeline
            .ingest(raw(
                "RBI raises repo rate by 25 basis points",
                "The Reserve Bank of India raised the policy repo rate by 25 basis points, \
                 citing persistent inflation pressure in its monetary policy review.",
                "business_standard",
            ))
            .await
            .unwrap();

        let article = h
            .store
            .get_article(outcome.article_id())
            .await
            .unwrap()
            .unwrap();
        assert!(!article
            .stock_impacts
            .iter()
            .any(|i| i.impact_type == ImpactType::Direct));
        let regulatory: Vec<_> = article
            .stock_impacts
            .iter()
            .filter(|i| i.impact_type == ImpactType::Regulatory)
            .collect();
        assert!(!regulatory.is_empty());
        for impact in regulatory {
            assert!(impact.confidence >= 0.3 && impact.confidence <= 0.7);
        }
    }

    #[tokio::test]
    async fn rejected_input_fails_closed_with_no_record() {
        let h = harness();
        let err = h
            .pipeline
            .ingest(raw("A headline", "too short", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
        assert_eq!(h.store.article_count(), 0);
        assert_eq!(h.vectors.upsert_count(), 0);
    }

    #[tokio::test]
    async fn vector_outage_defers_article_without_partial_state() {
        let h = harness();
        h.vectors.set_failing(true);
        let err = h
            .pipeline
            .ingest(raw(
                "HDFC Bank reports record quarterly profit, shares seen higher",
                HDFC_BODY,
                "moneycontrol",
            ))
            .await
            .unwrap_err();
        assert!(err.is_retriable(), "deferred, not dropped: {err:?}");
        assert_eq!(
            h.store.article_count(),
            0,
            "fail-closed: nothing stored when dedup cannot run"
        );
    }

    #[tokio::test]
    async fn partial_storage_retries_only_failed_half() {
        let h = harness();
        // Let dedup succeed (vector store up), then fail the structured
        // half on first write attempt.
        h.store.set_failing(true);
        let err = h
            .pipeline
            .ingest(raw(
                "HDFC Bank reports record quarterly profit, shares seen higher",
                HDFC_BODY,
                "moneycontrol",
            ))
            .await
            .unwrap_err();
        // Retries exhausted with the structured store still down.
        assert!(matches!(err, PipelineError::PartialStorage { .. }));
        // The vector half landed exactly once despite the retries.
        assert_eq!(h.vectors.upsert_count(), 1);
    }

    #[tokio::test]
    async fn batch_counts_outcomes() {
        let h = harness();
        let stats = h
            .pipeline
            .ingest_batch(
                vec![
                    raw(
                        "HDFC Bank reports record quarterly profit, shares seen higher",
                        HDFC_BODY,
                        "moneycontrol",
                    ),
                    raw(
                        "HDFC Bank posts record profit, stock gains",
                        HDFC_BODY,
                        "economic_times",
                    ),
                    raw("Bad article", "too short", "x"),
                ],
                1,
            )
            .await;
        assert_eq!(stats.total, 3);
        assert_eq!(stats.stored, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.deferred, 0);
    }

    #[tokio::test]
    async fn concurrent_near_duplicates_serialize_through_bucket_lock() {
        let h = harness();
        let pipeline = Arc::new(h.pipeline);
        let a = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                pipeline
                    .ingest(raw(
                        "HDFC Bank reports record quarterly profit, shares seen higher",
                        HDFC_BODY,
                        "moneycontrol",
                    ))
                    .await
            })
        };
        let b = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                pipeline
                    .ingest(raw(
                        "HDFC Bank reports record quarterly profit, shares seen higher",
                        HDFC_BODY,
                        "mirror_feed",
                    ))
                    .await
            })
        };
        let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
        let duplicates = [&a, &b]
            .iter()
            .filter(|o| matches!(o, IngestOutcome::Duplicate { .. }))
            .count();
        assert_eq!(
            duplicates, 1,
            "exactly one of two identical concurrent ingests links as duplicate"
        );
    }
}
