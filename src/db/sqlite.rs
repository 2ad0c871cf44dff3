use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Pool, Row, Sqlite,
};
use std::str::FromStr;
use tokio::time::Duration;
use tracing::info;

use crate::article::{
    Article, DedupCluster, ImpactType, SentimentAssessment, SentimentDistribution, SentimentLabel,
    StockImpact,
};
use crate::db::StructuredStore;
use crate::entity::{Entity, EntityType, Span};
use crate::TARGET_DB;

/// Structured store backed by SQLite (WAL mode).
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub async fn new(db_path: &str) -> Result<Self> {
        info!(target: TARGET_DB, "Creating database pool for: {}", db_path);

        let connect_options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;

        let store = SqliteStore { pool };
        store.initialize_schema().await?;
        info!(target: TARGET_DB, "Database pool created");
        Ok(store)
    }

    /// In-memory database for tests. A single connection, since every
    /// `:memory:` connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await?;
        let store = SqliteStore { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS articles (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                normalized_content TEXT NOT NULL,
                source TEXT NOT NULL,
                url TEXT,
                published_at TEXT NOT NULL,
                ingested_at TEXT NOT NULL,
                is_duplicate INTEGER NOT NULL DEFAULT 0,
                cluster_id TEXT,
                sentiment_label TEXT,
                sentiment_score REAL,
                sentiment_low_confidence INTEGER,
                sentiment_distribution TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS article_entities (
                article_id TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                entity_value TEXT NOT NULL,
                confidence REAL NOT NULL,
                span_start INTEGER,
                span_end INTEGER
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entities_lookup
             ON article_entities (entity_type, entity_value)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS stock_impacts (
                article_id TEXT NOT NULL,
                stock_symbol TEXT NOT NULL,
                company_name TEXT NOT NULL,
                impact_type TEXT NOT NULL,
                confidence REAL NOT NULL,
                reasoning TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS clusters (
                id TEXT PRIMARY KEY,
                representative_article_id TEXT NOT NULL,
                member_count INTEGER NOT NULL,
                first_seen TEXT NOT NULL,
                last_updated TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl StructuredStore for SqliteStore {
    async fn upsert_article(&self, article: &Article) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let (label, score, low_confidence, distribution) = match &article.sentiment {
            Some(s) => (
                Some(s.label.to_string()),
                Some(s.score as f64),
                Some(s.low_confidence),
                Some(serde_json::to_string(&s.distribution)?),
            ),
            None => (None, None, None, None),
        };

        sqlx::query(
            "INSERT OR REPLACE INTO articles
             (id, title, normalized_content, source, url, published_at, ingested_at,
              is_duplicate, cluster_id, sentiment_label, sentiment_score,
              sentiment_low_confidence, sentiment_distribution)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&article.id)
        .bind(&article.title)
        .bind(&article.normalized_content)
        .bind(&article.source)
        .bind(&article.url)
        .bind(article.published_at.to_rfc3339())
        .bind(article.ingested_at.to_rfc3339())
        .bind(article.is_duplicate)
        .bind(&article.cluster_id)
        .bind(label)
        .bind(score)
        .bind(low_confidence)
        .bind(distribution)
        .execute(&mut *tx)
        .await?;

        // Replace child rows wholesale so a re-store never duplicates them.
        sqlx::query("DELETE FROM article_entities WHERE article_id = ?")
            .bind(&article.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM stock_impacts WHERE article_id = ?")
            .bind(&article.id)
            .execute(&mut *tx)
            .await?;

        for entity in &article.entities {
            sqlx::query(
                "INSERT INTO article_entities
                 (article_id, entity_type, entity_value, confidence, span_start, span_end)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&article.id)
            .bind(entity.entity_type.to_string())
            .bind(&entity.value)
            .bind(entity.confidence as f64)
            .bind(entity.span.map(|s| s.start as i64))
            .bind(entity.span.map(|s| s.end as i64))
            .execute(&mut *tx)
            .await?;
        }

        for impact in &article.stock_impacts {
            sqlx::query(
                "INSERT INTO stock_impacts
                 (article_id, stock_symbol, company_name, impact_type, confidence, reasoning)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&article.id)
            .bind(&impact.stock_symbol)
            .bind(&impact.company_name)
            .bind(impact.impact_type.to_string())
            .bind(impact.confidence as f64)
            .bind(&impact.reasoning)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_article(&self, article_id: &str) -> Result<Option<Article>> {
        let row = sqlx::query("SELECT * FROM articles WHERE id = ?")
            .bind(article_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let sentiment = match (
            row.get::<Option<String>, _>("sentiment_label"),
            row.get::<Option<f64>, _>("sentiment_score"),
        ) {
            (Some(label), Some(score)) => {
                let distribution = row
                    .get::<Option<String>, _>("sentiment_distribution")
                    .and_then(|json| serde_json::from_str::<SentimentDistribution>(&json).ok())
                    .unwrap_or_default();
                Some(SentimentAssessment {
                    label: SentimentLabel::from(label.as_str()),
                    score: score as f32,
                    distribution,
                    low_confidence: row
                        .get::<Option<bool>, _>("sentiment_low_confidence")
                        .unwrap_or(false),
                })
            }
            _ => None,
        };

        let entity_rows = sqlx::query(
            "SELECT entity_type, entity_value, confidence, span_start, span_end
             FROM article_entities WHERE article_id = ?",
        )
        .bind(article_id)
        .fetch_all(&self.pool)
        .await?;

        let entities = entity_rows
            .into_iter()
            .map(|row| {
                let span = match (
                    row.get::<Option<i64>, _>("span_start"),
                    row.get::<Option<i64>, _>("span_end"),
                ) {
                    (Some(start), Some(end)) => Some(Span::new(start as usize, end as usize)),
                    _ => None,
                };
                Entity {
                    entity_type: EntityType::from(row.get::<String, _>("entity_type").as_str()),
                    value: row.get("entity_value"),
                    confidence: row.get::<f64, _>("confidence") as f32,
                    span,
                }
            })
            .collect();

        let impact_rows = sqlx::query(
            "SELECT stock_symbol, company_name, impact_type, confidence, reasoning
             FROM stock_impacts WHERE article_id = ? ORDER BY confidence DESC",
        )
        .bind(article_id)
        .fetch_all(&self.pool)
        .await?;

        let stock_impacts = impact_rows
            .into_iter()
            .map(|row| StockImpact {
                stock_symbol: row.get("stock_symbol"),
                company_name: row.get("company_name"),
                impact_type: ImpactType::from(row.get::<String, _>("impact_type").as_str()),
                confidence: row.get::<f64, _>("confidence") as f32,
                reasoning: row.get("reasoning"),
            })
            .collect();

        Ok(Some(Article {
            id: row.get("id"),
            title: row.get("title"),
            normalized_content: row.get("normalized_content"),
            source: row.get("source"),
            url: row.get("url"),
            published_at: parse_timestamp(&row.get::<String, _>("published_at"))?,
            ingested_at: parse_timestamp(&row.get::<String, _>("ingested_at"))?,
            is_duplicate: row.get("is_duplicate"),
            cluster_id: row.get("cluster_id"),
            sentiment,
            entities,
            stock_impacts,
        }))
    }

    async fn query_by_entity(&self, entity_type: EntityType, value: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT a.id, a.published_at FROM articles a
             JOIN article_entities e ON e.article_id = a.id
             WHERE e.entity_type = ? AND lower(e.entity_value) = lower(?)
             ORDER BY a.published_at DESC",
        )
        .bind(entity_type.to_string())
        .bind(value)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| row.get("id")).collect())
    }

    async fn query_by_sector(&self, sector: &str) -> Result<Vec<String>> {
        self.query_by_entity(EntityType::Sector, sector).await
    }

    async fn record_cluster_member(
        &self,
        cluster_id: &str,
        representative_article_id: &str,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO clusters (id, representative_article_id, member_count, first_seen, last_updated)
             VALUES (?, ?, 1, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 member_count = member_count + 1,
                 last_updated = excluded.last_updated",
        )
        .bind(cluster_id)
        .bind(representative_article_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_cluster(&self, cluster_id: &str) -> Result<Option<DedupCluster>> {
        let row = sqlx::query("SELECT * FROM clusters WHERE id = ?")
            .bind(cluster_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok(DedupCluster {
                id: row.get("id"),
                representative_article_id: row.get("representative_article_id"),
                member_count: row.get("member_count"),
                first_seen: parse_timestamp(&row.get::<String, _>("first_seen"))?,
                last_updated: parse_timestamp(&row.get::<String, _>("last_updated"))?,
            })
        })
        .transpose()
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp in database: '{}'", raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityType;

    fn sample_article(id: &str) -> Article {
        Article {
            id: id.to_string(),
            title: "HDFC Bank quarterly results".to_string(),
            normalized_content: "HDFC Bank reported a rise in quarterly net profit.".to_string(),
            source: "moneycontrol".to_string(),
            url: Some("https://example.com/a".to_string()),
            published_at: Utc::now(),
            ingested_at: Utc::now(),
            is_duplicate: false,
            cluster_id: Some(id.to_string()),
            sentiment: Some(SentimentAssessment {
                label: SentimentLabel::Bullish,
                score: 0.91,
                distribution: SentimentDistribution {
                    bullish: 0.91,
                    bearish: 0.03,
                    neutral: 0.06,
                },
                low_confidence: false,
            }),
            entities: vec![
                Entity::new(EntityType::Company, "HDFC Bank", 1.0).with_span(0, 9),
                Entity::new(EntityType::Sector, "Banking", 0.9),
            ],
            stock_impacts: vec![StockImpact {
                stock_symbol: "HDFCBANK".to_string(),
                company_name: "HDFC Bank".to_string(),
                impact_type: ImpactType::Direct,
                confidence: 1.0,
                reasoning: "HDFC Bank directly mentioned in article".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn round_trips_an_article() {
        let store = SqliteStore::in_memory().await.unwrap();
        let article = sample_article("a1");
        store.upsert_article(&article).await.unwrap();

        let loaded = store.get_article("a1").await.unwrap().unwrap();
        assert_eq!(loaded.title, article.title);
        assert_eq!(loaded.entities.len(), 2);
        assert_eq!(loaded.stock_impacts.len(), 1);
        let sentiment = loaded.sentiment.unwrap();
        assert_eq!(sentiment.label, SentimentLabel::Bullish);
        assert!((sentiment.score - 0.91).abs() < 1e-6);
    }

    #[tokio::test]
    async fn storing_twice_leaves_exactly_one_record() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut article = sample_article("a1");
        store.upsert_article(&article).await.unwrap();

        article.title = "HDFC Bank quarterly results (updated)".to_string();
        store.upsert_article(&article).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles WHERE id = 'a1'")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);

        let entity_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM article_entities WHERE article_id = 'a1'")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(entity_count, 2, "child rows must not duplicate on re-store");

        let loaded = store.get_article("a1").await.unwrap().unwrap();
        assert!(loaded.title.ends_with("(updated)"), "latest content wins");
    }

    #[tokio::test]
    async fn entity_and_sector_queries_find_articles() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.upsert_article(&sample_article("a1")).await.unwrap();

        let by_company = store
            .query_by_entity(EntityType::Company, "hdfc bank")
            .await
            .unwrap();
        assert_eq!(by_company, vec!["a1".to_string()]);

        let by_sector = store.query_by_sector("Banking").await.unwrap();
        assert_eq!(by_sector, vec!["a1".to_string()]);

        let none = store.query_by_sector("Pharma").await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn missing_article_is_none() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(store.get_article("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn article_without_sentiment_round_trips_as_unset() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut article = sample_article("a2");
        article.sentiment = None;
        store.upsert_article(&article).await.unwrap();

        let loaded = store.get_article("a2").await.unwrap().unwrap();
        assert!(loaded.sentiment.is_none(), "no label means no score either");
    }

    #[tokio::test]
    async fn cluster_membership_grows_append_only() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.record_cluster_member("c1", "a1").await.unwrap();
        store.record_cluster_member("c1", "a1").await.unwrap();
        store.record_cluster_member("c1", "a1").await.unwrap();

        let cluster = store.get_cluster("c1").await.unwrap().unwrap();
        assert_eq!(cluster.representative_article_id, "a1");
        assert_eq!(cluster.member_count, 3);
        assert!(cluster.last_updated >= cluster.first_seen);
    }
}
