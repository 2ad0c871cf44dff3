use async_trait::async_trait;

use crate::article::{Article, DedupCluster};
use crate::entity::EntityType;

pub mod sqlite;

pub use sqlite::SqliteStore;

/// Narrow interface over the structured store used for filterable queries
/// and cluster bookkeeping. Upserts are atomic per article id.
#[async_trait]
pub trait StructuredStore: Send + Sync {
    /// Insert or fully replace an article record (including its entity and
    /// impact rows). Re-storing the same id overwrites, never duplicates.
    async fn upsert_article(&self, article: &Article) -> anyhow::Result<()>;

    async fn get_article(&self, article_id: &str) -> anyhow::Result<Option<Article>>;

    /// Article ids mentioning the given entity, most recent first.
    async fn query_by_entity(
        &self,
        entity_type: EntityType,
        value: &str,
    ) -> anyhow::Result<Vec<String>>;

    /// Article ids carrying the given sector entity, most recent first.
    async fn query_by_sector(&self, sector: &str) -> anyhow::Result<Vec<String>>;

    /// Create the cluster on first call (member_count = 1) or bump its
    /// member count and last_updated on subsequent calls. Clusters are
    /// append-only and never deleted.
    async fn record_cluster_member(
        &self,
        cluster_id: &str,
        representative_article_id: &str,
    ) -> anyhow::Result<()>;

    async fn get_cluster(&self, cluster_id: &str) -> anyhow::Result<Option<DedupCluster>>;
}
