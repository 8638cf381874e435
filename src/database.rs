use std::path::Path;
use std::time::Duration;

use color_eyre::{Result, eyre::Context};
use sea_orm::{ConnectOptions, ConnectionTrait, Database as SeaDatabase, DatabaseConnection};

const SCHEMA: &str = include_str!("../schema.sql");

pub struct Database {
    pub conn: DatabaseConnection,
}

impl Database {
    /// Open or create a database at the given path
    pub async fn open(path: &Path) -> Result<Self> {
        tracing::debug!("Opening database at: {}", path.display());

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context(format!(
                "Failed to create database directory: {}",
                parent.display()
            ))?;
        }

        let url = format!("sqlite://{}?mode=rwc", path.display());

        let mut opt = ConnectOptions::new(url);
        opt.max_connections(16)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(8))
            .acquire_timeout(Duration::from_secs(8))
            .sqlx_logging(false);

        let conn = SeaDatabase::connect(opt)
            .await
            .context(format!("Failed to open database: {}", path.display()))?;

        apply_schema(&conn).await?;

        tracing::info!("Database ready at: {}", path.display());
        Ok(Database { conn })
    }

    /// Private in-memory database, used by tests and one-off runs.
    pub async fn in_memory() -> Result<Self> {
        // Every pooled connection would get its own in-memory database.
        let mut opt = ConnectOptions::new("sqlite::memory:");
        opt.max_connections(1).min_connections(1).sqlx_logging(false);

        let conn = SeaDatabase::connect(opt)
            .await
            .context("Failed to open in-memory database")?;
        apply_schema(&conn).await?;
        Ok(Database { conn })
    }
}

/// Run every statement of `schema.sql`. Statements are idempotent.
async fn apply_schema(conn: &DatabaseConnection) -> Result<()> {
    for stmt in SCHEMA.split(';') {
        // Strip comment-only lines
        let statement: String = stmt
            .lines()
            .filter(|line| !line.trim_start().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        conn.execute_unprepared(statement)
            .await
            .with_context(|| format!("Failed to apply schema statement: {statement}"))?;
    }
    Ok(())
}
