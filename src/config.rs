use std::env;
use std::str::FromStr;

/// Per-stage time budgets in milliseconds. A stage that exceeds its budget
/// fails with `PipelineError::Timeout` and is handled per that stage's own
/// failure semantics.
#[derive(Debug, Clone)]
pub struct StageTimeouts {
    pub embed_ms: u64,
    pub dedup_ms: u64,
    pub extract_ms: u64,
    pub sentiment_ms: u64,
    pub store_ms: u64,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            embed_ms: 30_000,
            dedup_ms: 10_000,
            extract_ms: 5_000,
            sentiment_ms: 15_000,
            store_ms: 20_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Cosine similarity at or above this value classifies as duplicate.
    /// The threshold is inclusive and deliberately a tunable, not a
    /// constant: the right value is an open tuning question.
    pub threshold: f32,
    /// How many nearest neighbors to consider.
    pub neighbor_count: u64,
    /// Similarities in [threshold - margin, threshold) are logged for
    /// review but still classified unique.
    pub near_miss_margin: f32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            threshold: 0.70,
            neighbor_count: 5,
            near_miss_margin: 0.15,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Semantic candidates below this similarity are not considered matches.
    pub min_semantic_score: f32,
    /// How many top documents to hand to the answer-synthesis collaborator.
    pub synthesis_doc_count: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            min_semantic_score: 0.25,
            synthesis_doc_count: 5,
        }
    }
}

/// Process-wide configuration, read once at startup from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub qdrant_url: String,
    pub qdrant_collection: String,
    pub catalog_path: String,
    pub ollama_host: String,
    pub ollama_port: u16,
    pub synthesis_model: String,
    pub dedup: DedupConfig,
    pub timeouts: StageTimeouts,
    pub retry: RetryConfig,
    pub query: QueryConfig,
    pub ingest_concurrency: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            db_path: env::var("FINSIGHT_DB_PATH").unwrap_or_else(|_| "finsight.db".to_string()),
            qdrant_url: env::var("QDRANT_URL")
                .unwrap_or_else(|_| "http://localhost:6334".to_string()),
            qdrant_collection: env::var("FINSIGHT_COLLECTION")
                .unwrap_or_else(|_| "articles".to_string()),
            catalog_path: env::var("FINSIGHT_CATALOG_PATH")
                .unwrap_or_else(|_| "data/catalog.json".to_string()),
            ollama_host: env::var("OLLAMA_HOST").unwrap_or_else(|_| "localhost".to_string()),
            ollama_port: env_or("OLLAMA_PORT", 11434),
            synthesis_model: env::var("FINSIGHT_SYNTHESIS_MODEL")
                .unwrap_or_else(|_| "llama3.2".to_string()),
            dedup: DedupConfig {
                threshold: env_or("FINSIGHT_DEDUP_THRESHOLD", 0.70),
                neighbor_count: env_or("FINSIGHT_DEDUP_NEIGHBORS", 5),
                near_miss_margin: env_or("FINSIGHT_DEDUP_NEAR_MISS_MARGIN", 0.15),
            },
            timeouts: StageTimeouts {
                embed_ms: env_or("FINSIGHT_EMBED_TIMEOUT_MS", 30_000),
                dedup_ms: env_or("FINSIGHT_DEDUP_TIMEOUT_MS", 10_000),
                extract_ms: env_or("FINSIGHT_EXTRACT_TIMEOUT_MS", 5_000),
                sentiment_ms: env_or("FINSIGHT_SENTIMENT_TIMEOUT_MS", 15_000),
                store_ms: env_or("FINSIGHT_STORE_TIMEOUT_MS", 20_000),
            },
            retry: RetryConfig {
                max_retries: env_or("FINSIGHT_MAX_RETRIES", 3),
                base_delay_ms: env_or("FINSIGHT_RETRY_BASE_DELAY_MS", 500),
            },
            query: QueryConfig {
                min_semantic_score: env_or("FINSIGHT_MIN_SEMANTIC_SCORE", 0.25),
                synthesis_doc_count: env_or("FINSIGHT_SYNTHESIS_DOCS", 5),
            },
            ingest_concurrency: env_or("FINSIGHT_INGEST_CONCURRENCY", 4),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
