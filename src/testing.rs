//! Shared fakes for unit tests: a deterministic embedder and in-memory
//! implementations of both store traits.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::article::{Article, DedupCluster};
use crate::catalog::{EntityCatalog, DEFAULT_CATALOG_JSON};
use crate::db::StructuredStore;
use crate::entity::EntityType;
use crate::vector::{
    cosine_similarity, EmbeddingProvider, SearchFilter, SimilarPoint, VectorPayload, VectorStore,
};

/// Deterministic bag-of-words embedder: each lowercase token hashes to a
/// dimension. Near-identical texts get high cosine similarity, unrelated
/// texts get low, and the output never changes between runs.
pub(crate) struct FakeEmbedder {
    dimensions: usize,
}

impl FakeEmbedder {
    pub(crate) fn new() -> Self {
        Self { dimensions: 512 }
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let idx = (hasher.finish() % self.dimensions as u64) as usize;
            vector[idx] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        Ok(vector)
    }
}

/// In-memory vector store with a failure toggle for outage tests.
pub(crate) struct MemoryVectorStore {
    points: Mutex<HashMap<String, (Vec<f32>, VectorPayload)>>,
    failing: AtomicBool,
    upserts: AtomicUsize,
}

impl MemoryVectorStore {
    pub(crate) fn new() -> Self {
        Self {
            points: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
            upserts: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub(crate) async fn contains(&self, article_id: &str) -> bool {
        self.points.lock().unwrap().contains_key(article_id)
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(
        &self,
        article_id: &str,
        embedding: &[f32],
        _document: &str,
        payload: &VectorPayload,
    ) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("vector store unreachable"));
        }
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.points
            .lock()
            .unwrap()
            .insert(article_id.to_string(), (embedding.to_vec(), payload.clone()));
        Ok(())
    }

    async fn query_similar(
        &self,
        embedding: &[f32],
        top_n: u64,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SimilarPoint>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("vector store unreachable"));
        }
        let points = self.points.lock().unwrap();
        let mut hits: Vec<SimilarPoint> = points
            .iter()
            .filter(|(_, (_, payload))| match filter {
                Some(filter) if !filter.is_empty() => {
                    let sector_hit = filter
                        .sectors
                        .iter()
                        .any(|s| payload.sectors.iter().any(|p| p.eq_ignore_ascii_case(s)));
                    let entity_hit = filter.entity_values.iter().any(|v| {
                        payload
                            .entity_values
                            .iter()
                            .any(|p| p.eq_ignore_ascii_case(v))
                    });
                    sector_hit || entity_hit
                }
                _ => true,
            })
            .filter_map(|(id, (vector, payload))| {
                cosine_similarity(embedding, vector)
                    .ok()
                    .map(|similarity| SimilarPoint {
                        article_id: id.clone(),
                        similarity,
                        payload: payload.clone(),
                    })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_n as usize);
        Ok(hits)
    }
}

/// In-memory structured store with a failure toggle.
pub(crate) struct MemoryStore {
    articles: Mutex<HashMap<String, Article>>,
    clusters: Mutex<HashMap<String, DedupCluster>>,
    failing: AtomicBool,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self {
            articles: Mutex::new(HashMap::new()),
            clusters: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn article_count(&self) -> usize {
        self.articles.lock().unwrap().len()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("structured store unreachable"));
        }
        Ok(())
    }
}

#[async_trait]
impl StructuredStore for MemoryStore {
    async fn upsert_article(&self, article: &Article) -> Result<()> {
        self.check()?;
        self.articles
            .lock()
            .unwrap()
            .insert(article.id.clone(), article.clone());
        Ok(())
    }

    async fn get_article(&self, article_id: &str) -> Result<Option<Article>> {
        self.check()?;
        Ok(self.articles.lock().unwrap().get(article_id).cloned())
    }

    async fn query_by_entity(&self, entity_type: EntityType, value: &str) -> Result<Vec<String>> {
        self.check()?;
        let articles = self.articles.lock().unwrap();
        let mut matches: Vec<&Article> = articles
            .values()
            .filter(|article| {
                article.entities.iter().any(|e| {
                    e.entity_type == entity_type && e.value.eq_ignore_ascii_case(value)
                })
            })
            .collect();
        matches.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        Ok(matches.into_iter().map(|a| a.id.clone()).collect())
    }

    async fn query_by_sector(&self, sector: &str) -> Result<Vec<String>> {
        self.query_by_entity(EntityType::Sector, sector).await
    }

    async fn record_cluster_member(
        &self,
        cluster_id: &str,
        representative_article_id: &str,
    ) -> Result<()> {
        self.check()?;
        let mut clusters = self.clusters.lock().unwrap();
        let now = Utc::now();
        clusters
            .entry(cluster_id.to_string())
            .and_modify(|cluster| {
                cluster.member_count += 1;
                cluster.last_updated = now;
            })
            .or_insert_with(|| DedupCluster {
                id: cluster_id.to_string(),
                representative_article_id: representative_article_id.to_string(),
                member_count: 1,
                first_seen: now,
                last_updated: now,
            });
        Ok(())
    }

    async fn get_cluster(&self, cluster_id: &str) -> Result<Option<DedupCluster>> {
        self.check()?;
        Ok(self.clusters.lock().unwrap().get(cluster_id).cloned())
    }
}

/// Minimal stored article for store-level tests.
pub(crate) fn sample_article(id: &str) -> Article {
    Article {
        id: id.to_string(),
        title: format!("Article {}", id),
        normalized_content: "A placeholder body long enough to pass the length floor.".to_string(),
        source: "test".to_string(),
        url: None,
        published_at: Utc::now(),
        ingested_at: Utc::now(),
        is_duplicate: false,
        cluster_id: Some(id.to_string()),
        sentiment: None,
        entities: Vec::new(),
        stock_impacts: Vec::new(),
    }
}

pub(crate) fn test_catalog() -> Arc<EntityCatalog> {
    Arc::new(EntityCatalog::from_json(DEFAULT_CATALOG_JSON).expect("default catalog is valid"))
}

/// Test configuration: default tunables, but no retry delay.
pub(crate) fn test_config() -> crate::config::AppConfig {
    crate::config::AppConfig {
        db_path: String::new(),
        qdrant_url: String::new(),
        qdrant_collection: String::new(),
        catalog_path: String::new(),
        ollama_host: String::new(),
        ollama_port: 0,
        synthesis_model: String::new(),
        dedup: crate::config::DedupConfig::default(),
        timeouts: crate::config::StageTimeouts::default(),
        retry: crate::config::RetryConfig {
            max_retries: 2,
            base_delay_ms: 0,
        },
        query: crate::config::QueryConfig::default(),
        ingest_concurrency: 4,
    }
}
