use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use crate::article::Article;
use crate::catalog::EntityCatalog;
use crate::config::QueryConfig;
use crate::db::StructuredStore;
use crate::entity::{Entity, EntityExtractor};
use crate::error::PipelineError;
use crate::synthesis::{AnswerSynthesizer, SynthesizedAnswer};
use crate::vector::{EmbeddingProvider, VectorStore};

pub mod expansion;

pub use expansion::{expand, ExpandedContext};

// Module-level constants
pub const TARGET_QUERY: &str = "query";

/// Ranking weights from the single final scoring function.
const SEMANTIC_WEIGHT: f32 = 0.4;
const ENTITY_WEIGHT: f32 = 0.3;
const SECTOR_WEIGHT: f32 = 0.15;
const RECENCY_WEIGHT: f32 = 0.2;
/// Flat preference for cluster representatives, applied as a penalty on
/// duplicate-linked articles.
const DUPLICATE_PENALTY: f32 = 0.1;

/// Classified purely from which entity types were detected, first match
/// wins: company, then sector, then regulator, then theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    CompanyQuery,
    SectorQuery,
    RegulatorQuery,
    ThemeQuery,
}

impl fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryIntent::CompanyQuery => write!(f, "company_query"),
            QueryIntent::SectorQuery => write!(f, "sector_query"),
            QueryIntent::RegulatorQuery => write!(f, "regulator_query"),
            QueryIntent::ThemeQuery => write!(f, "theme_query"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryAnalysis {
    pub intent: QueryIntent,
    pub detected_entities: Vec<Entity>,
    pub sectors: Vec<String>,
    pub expanded_terms: Vec<String>,
}

/// Ephemeral, query-time only. The relevance score sums weighted terms and
/// is unbounded above; clamp for display only.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub article: Article,
    pub relevance_score: f32,
    pub match_reason: String,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub analysis: QueryAnalysis,
    pub results: Vec<QueryResult>,
    pub total_count: usize,
    pub execution_time_ms: f64,
    /// Set when the vector store was unreachable and ranking ran without
    /// the semantic term.
    pub semantic_degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesized_answer: Option<SynthesizedAnswer>,
}

/// Multi-strategy retrieval over the same stores the pipeline writes:
/// semantic nearest-neighbor, exact entity filter, and expanded sector
/// filter, merged under one ranking function.
pub struct QueryEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorStore>,
    store: Arc<dyn StructuredStore>,
    extractor: EntityExtractor,
    catalog: Arc<EntityCatalog>,
    config: QueryConfig,
    synthesizer: Option<AnswerSynthesizer>,
}

impl QueryEngine {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorStore>,
        store: Arc<dyn StructuredStore>,
        catalog: Arc<EntityCatalog>,
        config: QueryConfig,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            embedder,
            vectors,
            store,
            extractor: EntityExtractor::new(Arc::clone(&catalog))?,
            catalog,
            config,
            synthesizer: None,
        })
    }

    pub fn with_synthesizer(mut self, synthesizer: AnswerSynthesizer) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    /// Execute a search. Always returns a result set — possibly empty or
    /// semantically degraded — rather than a hard error, except on
    /// malformed input.
    pub async fn search(
        &self,
        query_text: &str,
        limit: usize,
    ) -> Result<QueryResponse, PipelineError> {
        if query_text.trim().is_empty() {
            return Err(PipelineError::InvalidInput("query text is empty".into()));
        }
        let started = Instant::now();

        // 1. Entity detection with the same extractor as ingestion, so
        // query terms map to the same canonical values as stored articles.
        let detected = self.extractor.extract(query_text);

        // 2. Context expansion against the catalog.
        let context = expand(&detected, &self.catalog);

        // 3. Intent from detected entity types, in priority order.
        let intent = classify_intent(&detected);

        // 4a. Semantic nearest-neighbor search. An unreachable vector
        // store degrades to filter-only ranking rather than failing.
        let mut semantic_scores: HashMap<String, f32> = HashMap::new();
        let mut semantic_degraded = false;
        let top_n = (limit.max(5) * 2) as u64;
        match self.semantic_candidates(query_text, top_n).await {
            Ok(scores) => semantic_scores = scores,
            Err(e) => {
                warn!(
                    target: TARGET_QUERY,
                    error = %e,
                    "semantic search unavailable, degrading to filter-only"
                );
                semantic_degraded = true;
            }
        }

        // 4b. Exact filter search on detected entity values.
        let mut entity_hits: HashMap<String, Vec<String>> = HashMap::new();
        for entity in detected.companies.iter().chain(detected.regulators.iter()) {
            match self
                .store
                .query_by_entity(entity.entity_type, &entity.value)
                .await
            {
                Ok(ids) => {
                    for id in ids {
                        entity_hits.entry(id).or_default().push(entity.value.clone());
                    }
                }
                Err(e) => {
                    warn!(target: TARGET_QUERY, error = %e, value = %entity.value, "entity filter search failed");
                }
            }
        }

        // 4c. Filter search on the expanded sector set.
        let mut sector_hits: HashMap<String, Vec<String>> = HashMap::new();
        for sector in &context.sectors {
            match self.store.query_by_sector(sector).await {
                Ok(ids) => {
                    for id in ids {
                        sector_hits.entry(id).or_default().push(sector.clone());
                    }
                }
                Err(e) => {
                    warn!(target: TARGET_QUERY, error = %e, sector = %sector, "sector filter search failed");
                }
            }
        }

        // 5. Merge by article id and rank under the single final score.
        let mut candidate_ids: HashSet<String> = HashSet::new();
        candidate_ids.extend(semantic_scores.keys().cloned());
        candidate_ids.extend(entity_hits.keys().cloned());
        candidate_ids.extend(sector_hits.keys().cloned());

        let mut results: Vec<QueryResult> = Vec::new();
        for id in candidate_ids {
            let article = match self.store.get_article(&id).await {
                Ok(Some(article)) => article,
                Ok(None) => continue,
                Err(e) => {
                    warn!(target: TARGET_QUERY, error = %e, article_id = %id, "candidate hydration failed");
                    continue;
                }
            };

            let semantic = semantic_scores.get(&id).copied().unwrap_or(0.0);
            let entity_matches = entity_hits.get(&id);
            let sector_matches = sector_hits.get(&id);

            let days_since = (Utc::now() - article.published_at).num_days().max(0) as f32;
            let recency_bonus = (0.2 - 0.02 * days_since).max(0.0);
            let duplicate_penalty = if article.is_duplicate {
                DUPLICATE_PENALTY
            } else {
                0.0
            };

            let score = SEMANTIC_WEIGHT * semantic
                + ENTITY_WEIGHT * if entity_matches.is_some() { 1.0 } else { 0.0 }
                + SECTOR_WEIGHT * if sector_matches.is_some() { 1.0 } else { 0.0 }
                + RECENCY_WEIGHT * recency_bonus
                - duplicate_penalty;

            let mut reasons: Vec<String> = Vec::new();
            if semantic > 0.0 {
                reasons.push(format!("semantic similarity {semantic:.2}"));
            }
            if let Some(values) = entity_matches {
                reasons.push(format!("entity match: {}", values.join(", ")));
            }
            if let Some(sectors) = sector_matches {
                reasons.push(format!("sector match: {}", sectors.join(", ")));
            }
            if reasons.is_empty() {
                reasons.push("no strategy matched".to_string());
            }

            results.push(QueryResult {
                article,
                relevance_score: score,
                match_reason: reasons.join("; "),
            });
        }

        results.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.article.published_at.cmp(&a.article.published_at))
        });
        results.truncate(limit);

        // 6. Optional answer synthesis over the top documents.
        let synthesized_answer = match &self.synthesizer {
            Some(synthesizer) if !results.is_empty() => {
                let top_docs: Vec<&Article> = results
                    .iter()
                    .take(self.config.synthesis_doc_count)
                    .map(|r| &r.article)
                    .collect();
                synthesizer.synthesize(query_text, &top_docs).await
            }
            _ => None,
        };

        let total_count = results.len();
        debug!(
            target: TARGET_QUERY,
            intent = %intent,
            results = total_count,
            semantic_degraded,
            "query complete"
        );

        Ok(QueryResponse {
            analysis: QueryAnalysis {
                intent,
                detected_entities: detected.into_entities(),
                sectors: context.sectors,
                expanded_terms: context.related_terms,
            },
            results,
            total_count,
            execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            semantic_degraded,
            synthesized_answer,
        })
    }

    async fn semantic_candidates(
        &self,
        query_text: &str,
        top_n: u64,
    ) -> anyhow::Result<HashMap<String, f32>> {
        let embedding = self.embedder.embed(query_text).await?;
        let points = self.vectors.query_similar(&embedding, top_n, None).await?;
        Ok(points
            .into_iter()
            .filter(|p| p.similarity >= self.config.min_semantic_score)
            .map(|p| (p.article_id, p.similarity))
            .collect())
    }
}

fn classify_intent(detected: &crate::entity::EntityExtractionResult) -> QueryIntent {
    if !detected.companies.is_empty() {
        QueryIntent::CompanyQuery
    } else if !detected.sectors.is_empty() {
        QueryIntent::SectorQuery
    } else if !detected.regulators.is_empty() {
        QueryIntent::RegulatorQuery
    } else {
        QueryIntent::ThemeQuery
    }
}
