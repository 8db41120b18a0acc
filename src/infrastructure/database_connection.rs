//! Database connection and pool management
//!
//! SQLite pool over sqlx plus the schema applied by [`DatabaseConnection::migrate`].

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::info;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS products (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        product_key TEXT NOT NULL UNIQUE,
        source_url TEXT NOT NULL,
        goods_no TEXT,
        name TEXT NOT NULL,
        brand TEXT,
        brand_english TEXT,
        category_path TEXT NOT NULL DEFAULT '',
        image_url TEXT,
        review_count INTEGER,
        rating REAL,
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS price_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        product_id INTEGER NOT NULL,
        regular_price INTEGER NOT NULL CHECK (regular_price >= 0),
        sale_price INTEGER NOT NULL CHECK (sale_price >= 0 AND sale_price <= regular_price),
        discount_bp INTEGER NOT NULL CHECK (discount_bp BETWEEN 0 AND 10000),
        stock_status TEXT NOT NULL,
        captured_at TEXT NOT NULL,
        FOREIGN KEY (product_id) REFERENCES products (id) ON DELETE CASCADE
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS job_runs (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        status TEXT NOT NULL,
        started_at TEXT NOT NULL,
        finished_at TEXT,
        attempted INTEGER NOT NULL DEFAULT 0,
        succeeded INTEGER NOT NULL DEFAULT 0,
        failed INTEGER NOT NULL DEFAULT 0,
        skipped INTEGER NOT NULL DEFAULT 0,
        history_written INTEGER NOT NULL DEFAULT 0,
        detail TEXT
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_price_history_product ON price_history (product_id, id)",
    "CREATE INDEX IF NOT EXISTS idx_products_active ON products (is_active)",
    "CREATE INDEX IF NOT EXISTS idx_job_runs_kind_started ON job_runs (kind, started_at)",
    // at most one running row per job kind
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_job_runs_one_running ON job_runs (kind) WHERE status = 'running'",
];

#[derive(Debug, Clone)]
pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let db_path = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");
        let db_path = db_path.split('?').next().unwrap_or(db_path);

        let parent = Path::new(db_path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty() && !db_path.starts_with(":memory:"));
        if let Some(parent) = parent {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {database_url}"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to connect to {database_url}"))?;

        info!("🗄️ Connected to database: {}", database_url);
        Ok(Self { pool })
    }

    /// Private in-memory database on a single, never-recycled connection.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to apply schema")?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_database_connection() -> Result<()> {
        // 임시 디렉토리 생성
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("nested").join("test.db");
        let database_url = format!("sqlite:{}", db_path.to_string_lossy());

        let db = DatabaseConnection::new(&database_url, 2).await?;
        assert!(!db.pool().is_closed());
        assert!(db_path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_database_migration() -> Result<()> {
        let temp_dir = tempdir()?;
        let db_path = temp_dir.path().join("test_migration.db");
        let database_url = format!("sqlite:{}", db_path.display());

        let db = DatabaseConnection::new(&database_url, 2).await?;
        db.migrate().await?;
        // 두 번 실행해도 안전해야 함
        db.migrate().await?;

        for table in ["products", "price_history", "job_runs"] {
            let row = sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
                .bind(table)
                .fetch_optional(db.pool())
                .await?;
            assert!(row.is_some(), "missing table {table}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn running_rows_are_unique_per_kind() -> Result<()> {
        let db = DatabaseConnection::in_memory().await?;
        db.migrate().await?;

        let insert = "INSERT INTO job_runs (id, kind, status, started_at) VALUES (?, 'product_refresh', ?, '2024-01-01T00:00:00Z')";
        sqlx::query(insert).bind("a").bind("running").execute(db.pool()).await?;
        sqlx::query(insert).bind("b").bind("succeeded").execute(db.pool()).await?;
        let second_running = sqlx::query(insert).bind("c").bind("running").execute(db.pool()).await;
        assert!(second_running.is_err());
        Ok(())
    }
}
