use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::entity::Entity;

/// Raw article payload accepted at the ingestion boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawArticle {
    pub title: String,
    pub content: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Bullish,
    Bearish,
    Neutral,
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SentimentLabel::Bullish => write!(f, "bullish"),
            SentimentLabel::Bearish => write!(f, "bearish"),
            SentimentLabel::Neutral => write!(f, "neutral"),
        }
    }
}

impl From<&str> for SentimentLabel {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "bullish" => SentimentLabel::Bullish,
            "bearish" => SentimentLabel::Bearish,
            _ => SentimentLabel::Neutral,
        }
    }
}

/// Full three-way probability distribution behind a sentiment call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SentimentDistribution {
    pub bullish: f32,
    pub bearish: f32,
    pub neutral: f32,
}

/// A sentiment call for one article. Absence of this struct is the "unset"
/// state, so a score can never exist without a label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentAssessment {
    pub label: SentimentLabel,
    /// Probability of the chosen label, in [0, 1].
    pub score: f32,
    pub distribution: SentimentDistribution,
    /// Set when the model failed and a neutral default was substituted.
    #[serde(default)]
    pub low_confidence: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactType {
    Direct,
    Sector,
    Regulatory,
    SupplyChain,
}

impl ImpactType {
    /// Tie-break priority: direct sorts before sector, sector before
    /// regulatory, regulatory before supply chain.
    pub fn priority(self) -> u8 {
        match self {
            ImpactType::Direct => 0,
            ImpactType::Sector => 1,
            ImpactType::Regulatory => 2,
            ImpactType::SupplyChain => 3,
        }
    }
}

impl fmt::Display for ImpactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImpactType::Direct => write!(f, "direct"),
            ImpactType::Sector => write!(f, "sector"),
            ImpactType::Regulatory => write!(f, "regulatory"),
            ImpactType::SupplyChain => write!(f, "supply_chain"),
        }
    }
}

impl From<&str> for ImpactType {
    fn from(s: &str) -> Self {
        match s {
            "direct" => ImpactType::Direct,
            "sector" => ImpactType::Sector,
            "regulatory" => ImpactType::Regulatory,
            _ => ImpactType::SupplyChain,
        }
    }
}

/// A scored relationship between an article and a tradable security.
///
/// Within one article at most one impact exists per (symbol, impact type)
/// pair; the same symbol may appear once per distinct type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockImpact {
    pub stock_symbol: String,
    pub company_name: String,
    pub impact_type: ImpactType,
    pub confidence: f32,
    pub reasoning: String,
}

/// A fully processed article. Created at ingestion, populated stage by
/// stage, immutable once stored — re-ingestion of the same logical event
/// creates a new duplicate-linked record, never mutates the original.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub normalized_content: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub published_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub is_duplicate: bool,
    /// Set iff duplicate or cluster representative. A representative's
    /// cluster_id equals its own id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<SentimentAssessment>,
    pub entities: Vec<Entity>,
    pub stock_impacts: Vec<StockImpact>,
}

/// A logical event group: one representative, zero or more duplicate-linked
/// members. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupCluster {
    pub id: String,
    pub representative_article_id: String,
    pub member_count: i64,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Tri-state result returned to the ingestion caller.
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Stored {
        article_id: String,
        cluster_id: String,
    },
    Duplicate {
        article_id: String,
        cluster_id: String,
        similarity: f32,
    },
}

impl IngestOutcome {
    pub fn article_id(&self) -> &str {
        match self {
            IngestOutcome::Stored { article_id, .. }
            | IngestOutcome::Duplicate { article_id, .. } => article_id,
        }
    }

    pub fn cluster_id(&self) -> &str {
        match self {
            IngestOutcome::Stored { cluster_id, .. }
            | IngestOutcome::Duplicate { cluster_id, .. } => cluster_id,
        }
    }
}
