use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ollama_rs::Ollama;
use tracing::{info, warn};

use finsight::article::RawArticle;
use finsight::catalog::EntityCatalog;
use finsight::config::AppConfig;
use finsight::db::SqliteStore;
use finsight::logging;
use finsight::pipeline::Pipeline;
use finsight::query::QueryEngine;
use finsight::sentiment::{FinBertConfig, FinBertModel, LexiconModel, SentimentModel};
use finsight::synthesis::{AnswerSynthesizer, LLMClient};
use finsight::vector::{E5Config, E5Embedder, EmbeddingProvider, QdrantStore};

#[derive(Parser)]
#[command(name = "finsight", about = "Financial news intelligence pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest articles from a JSON file (array of raw articles)
    Ingest {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Search the indexed corpus
    Query {
        text: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Skip answer synthesis even when an LLM is reachable
        #[arg(long, default_value_t = false)]
        no_synthesis: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::configure_logging();
    let cli = Cli::parse();
    let config = AppConfig::from_env();

    // Providers are constructed exactly once here and injected; no
    // component loads models or opens connections on demand.
    let catalog =
        Arc::new(EntityCatalog::load(&config.catalog_path).context("entity catalog is required")?);

    let embedder = Arc::new(
        E5Embedder::load(E5Config::default())
            .await
            .context("embedding model is required")?,
    );

    let vectors = Arc::new(QdrantStore::connect(
        &config.qdrant_url,
        &config.qdrant_collection,
    )?);
    vectors.ensure_collection(embedder.dimensions()).await?;

    let store = Arc::new(SqliteStore::new(&config.db_path).await?);

    let sentiment_model: Arc<dyn SentimentModel> =
        match FinBertModel::load(FinBertConfig::default()).await {
            Ok(model) => Arc::new(model),
            Err(e) => {
                warn!(error = %e, "FinBERT unavailable, falling back to lexicon sentiment");
                Arc::new(LexiconModel::new())
            }
        };

    match cli.command {
        Command::Ingest { file, concurrency } => {
            let pipeline = Pipeline::new(
                embedder,
                vectors,
                store,
                sentiment_model,
                catalog,
                &config,
            )?;

            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let articles: Vec<RawArticle> =
                serde_json::from_str(&raw).context("expected a JSON array of raw articles")?;

            let stats = pipeline
                .ingest_batch(articles, concurrency.unwrap_or(config.ingest_concurrency))
                .await;

            println!(
                "processed {} articles: {} stored, {} duplicates, {} rejected, {} deferred",
                stats.total, stats.stored, stats.duplicates, stats.rejected, stats.deferred
            );
        }
        Command::Query {
            text,
            limit,
            no_synthesis,
        } => {
            let mut engine = QueryEngine::new(
                embedder,
                vectors,
                store,
                catalog,
                config.query.clone(),
            )?;

            if !no_synthesis {
                let ollama = Ollama::new(config.ollama_host.clone(), config.ollama_port);
                engine = engine.with_synthesizer(AnswerSynthesizer::new(
                    LLMClient::Ollama(ollama),
                    &config.synthesis_model,
                ));
            }

            let response = engine.search(&text, limit).await?;

            info!(
                intent = %response.analysis.intent,
                results = response.total_count,
                elapsed_ms = response.execution_time_ms,
                "query complete"
            );

            println!(
                "intent: {} ({} results, {:.1}ms{})",
                response.analysis.intent,
                response.total_count,
                response.execution_time_ms,
                if response.semantic_degraded {
                    ", semantic ranking unavailable"
                } else {
                    ""
                }
            );
            for (i, result) in response.results.iter().enumerate() {
                println!(
                    "{:2}. [{:.2}] {} ({})",
                    i + 1,
                    result.relevance_score.clamp(0.0, 1.0),
                    result.article.title,
                    result.match_reason
                );
            }
            if let Some(answer) = &response.synthesized_answer {
                println!("\n{}", answer.answer);
                println!(
                    "(synthesized from {} sources in {}ms)",
                    answer.sources_used.len(),
                    answer.latency_ms
                );
            }
        }
    }

    Ok(())
}
