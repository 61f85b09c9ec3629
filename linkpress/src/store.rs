use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashSet;
use uuid::Uuid;

use crate::extract::ExtractedLink;

/// SQLite caps bound parameters per statement; existence lookups chunk their
/// IN-lists well below that.
const MAX_URLS_PER_QUERY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Slack,
    Manual,
    Import,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Slack => "slack",
            SourceType::Manual => "manual",
            SourceType::Import => "import",
        }
    }
}

/// A persisted article record prior to enrichment, identified by its URL and
/// origin metadata. `processed_at` stays unset until the enrichment stage
/// fills in summary and tags.
#[derive(Debug, Clone)]
pub struct ArticleStub {
    pub id: Uuid,
    pub url: String,
    pub title: String,
    pub tags: Vec<String>,
    pub source_type: SourceType,
    pub source_channel_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl ArticleStub {
    /// Build a stub for an accepted link. `created_at` is the originating
    /// message's timestamp, not "now", so article age reflects when the link
    /// was actually shared. The URL doubles as the title until enrichment.
    pub fn from_link(link: &ExtractedLink, channel_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: link.url.clone(),
            title: link.url.clone(),
            tags: Vec::new(),
            source_type: SourceType::Slack,
            source_channel_id: Some(channel_id.to_string()),
            created_at: link.timestamp,
            processed_at: None,
        }
    }
}

/// Persistence contract for the pipeline. The store enforces URL uniqueness;
/// inserting an already-known URL is a silent no-op, which is what makes
/// repeated sync runs safe.
#[async_trait::async_trait]
pub trait ArticleStore: Send + Sync {
    /// Report which of the given URLs already exist, in one batched lookup.
    async fn find_existing(&self, urls: &[String]) -> Result<HashSet<String>>;

    /// Insert a stub; no-op if the URL is already present.
    async fn insert_if_absent(&self, stub: &ArticleStub) -> Result<()>;
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ArticleStore for SqliteStore {
    async fn find_existing(&self, urls: &[String]) -> Result<HashSet<String>> {
        let mut existing = HashSet::new();

        for chunk in urls.chunks(MAX_URLS_PER_QUERY) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!("SELECT url FROM articles WHERE url IN ({})", placeholders);

            let mut query = sqlx::query_scalar::<_, String>(&sql);
            for url in chunk {
                query = query.bind(url);
            }

            let rows = query
                .fetch_all(&self.pool)
                .await
                .context("failed to check existing articles")?;
            existing.extend(rows);
        }

        Ok(existing)
    }

    async fn insert_if_absent(&self, stub: &ArticleStub) -> Result<()> {
        let tags_json = serde_json::to_string(&stub.tags).context("failed to serialize tags")?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO articles
                (id, url, title, tags, source_type, source_id, created_at, processed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(stub.id.to_string())
        .bind(&stub.url)
        .bind(&stub.title)
        .bind(&tags_json)
        .bind(stub.source_type.as_str())
        .bind(&stub.source_channel_id)
        .bind(stub.created_at)
        .bind(stub.processed_at)
        .execute(&self.pool)
        .await
        .context("failed to insert article")?;

        Ok(())
    }
}
