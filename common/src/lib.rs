/*!
common/src/lib.rs

Shared configuration types and DB helper functions for Linkpress.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader for a TOML config file
- Helpers to initialize the SQLite pool and create the schema
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

/// Database configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/linkpress.db")
    pub path: String,
}

/// Sync behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// How many recent messages to pull per channel
    pub history_limit: Option<usize>,
    /// How many classification calls run concurrently per batch
    pub batch_size: Option<usize>,
}

/// Classifier configuration. When `adapter` is "rules" or the API key
/// cannot be resolved, the rule-based fallback classifier is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub adapter: Option<String>, // "remote", "rules"
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
}

/// A single channel within a Slack workspace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: String,
    pub name: String,
}

/// One configured Slack workspace (session token + cookie pair)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackSourceConfig {
    pub workspace: String,
    pub token: String,
    pub cookie: String,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

/// Grouping of chat sources in the config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlackConfig {
    #[serde(default)]
    pub sources: Vec<SlackSourceConfig>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub sync: Option<SyncConfig>,
    pub classifier: Option<ClassifierConfig>,
    #[serde(default)]
    pub slack: SlackConfig,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    pub fn history_limit(&self) -> usize {
        self.sync
            .as_ref()
            .and_then(|s| s.history_limit)
            .unwrap_or(200)
    }

    pub fn batch_size(&self) -> usize {
        self.sync.as_ref().and_then(|s| s.batch_size).unwrap_or(5)
    }
}

/// Initialize an SQLite connection pool.
///
/// Creates the parent directory and the DB file if necessary, then returns a
/// configured `SqlitePool`. Defaults are conservative:
/// - max_connections: 5
/// - WAL journal mode
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create DB parent directory: {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}

/// Create the articles schema if it does not exist. Safe to call on every
/// startup. The unique constraint on `url` is the store-level dedup guarantee
/// the pipeline relies on; `INSERT OR IGNORE` turns duplicate inserts into
/// no-ops.
///
/// Columns beyond the stub fields (description, content, summary, difficulty,
/// reading_time_minutes, image, source_label, processed_at) are filled by a
/// later enrichment stage, not by the sync pipeline.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS articles (
            id TEXT PRIMARY KEY,
            url TEXT UNIQUE NOT NULL,
            title TEXT,
            description TEXT,
            content TEXT,
            summary TEXT,
            tags TEXT,
            difficulty TEXT,
            reading_time_minutes INTEGER,
            image TEXT,
            source_label TEXT,
            source_type TEXT NOT NULL,
            source_id TEXT,
            created_at TEXT NOT NULL,
            processed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create articles table")?;

    for ddl in [
        "CREATE INDEX IF NOT EXISTS idx_articles_url ON articles(url)",
        "CREATE INDEX IF NOT EXISTS idx_articles_source ON articles(source_type, source_id)",
        "CREATE INDEX IF NOT EXISTS idx_articles_created ON articles(created_at)",
    ] {
        sqlx::query(ddl)
            .execute(pool)
            .await
            .context("failed to create articles index")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn config_from_string_and_db_pool() {
        let toml = r#"
            [database]
            path = "data/test.db"

            [sync]
            history_limit = 50

            [[slack.sources]]
            workspace = "acme"
            token = "xoxc-test"
            cookie = "xoxd-test"
            channels = [{ id = "C0123", name = "reading" }]
        "#;

        let cfg: Config = toml::from_str(toml).expect("parse config");
        assert_eq!(cfg.history_limit(), 50);
        assert_eq!(cfg.batch_size(), 5); // default
        assert_eq!(cfg.slack.sources.len(), 1);
        assert_eq!(cfg.slack.sources[0].channels[0].id, "C0123");

        // DB pool + schema init against a temporary file
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("linkpress.db");
        let db_path_str = db_path.to_string_lossy().to_string();

        let pool = init_db_pool(&db_path_str).await.expect("init pool");
        init_schema(&pool).await.expect("init schema");
        // Schema init must be idempotent
        init_schema(&pool).await.expect("init schema twice");
    }

    #[test]
    fn classifier_section_is_optional() {
        let toml = r#"
            [database]
            path = "x.db"
        "#;
        let cfg: Config = toml::from_str(toml).expect("parse config");
        assert!(cfg.classifier.is_none());
        assert!(cfg.slack.sources.is_empty());
    }
}
