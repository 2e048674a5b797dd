use std::path::PathBuf;

use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{info, warn};

use crate::models::ChatSession;

use super::error::{StorageError, StorageResult};
use super::session_repository::{
    BoxFuture, MemoryNoteStore, SessionRepository, note_record_key, session_record_key,
};

/// Migrations applied in order. Each entry is (version, sql).
/// To add a new migration: append a tuple with the next version number and its SQL.
/// Never edit or remove existing entries; existing databases depend on them.
const MIGRATIONS: &[(i64, &str)] = &[(
    1,
    "CREATE TABLE IF NOT EXISTS records (
        key        TEXT    PRIMARY KEY,
        body       TEXT    NOT NULL DEFAULT '',
        updated_at INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_records_updated_at
        ON records (updated_at DESC);",
)];

/// Embedded-database tier: one row per record, keyed exactly like the
/// directory tier (`{id}.json` for sessions, `{name}.md` for notes) so
/// records move between tiers unchanged.
///
/// Uses WAL journal mode for concurrent reads during background saves.
/// `SqlitePool` is internally reference-counted and cheap to clone.
#[derive(Clone)]
pub struct SqliteSessionRepository {
    pool: SqlitePool,
}

impl SqliteSessionRepository {
    /// Open (or create) the database at the platform-specific config path.
    pub async fn new() -> StorageResult<Self> {
        Self::open_at(Self::default_db_path()?).await
    }

    pub async fn open_at(db_path: PathBuf) -> StorageResult<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::run_migrations(&pool).await?;

        info!(path = %db_path.display(), "Opened session database");

        Ok(Self { pool })
    }

    /// In-process database for tests. A single connection keeps the
    /// `:memory:` store alive and shared.
    pub async fn in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Create the schema_version table if absent, then apply any pending migrations.
    async fn run_migrations(pool: &SqlitePool) -> StorageResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER NOT NULL
            )",
        )
        .execute(pool)
        .await?;

        // Seed version 0 if the table is empty (fresh database).
        sqlx::query("INSERT INTO schema_version (version) SELECT 0 WHERE NOT EXISTS (SELECT 1 FROM schema_version)")
            .execute(pool)
            .await?;

        let current: i64 = sqlx::query_scalar("SELECT version FROM schema_version")
            .fetch_one(pool)
            .await?;

        for (version, sql) in MIGRATIONS {
            if *version > current {
                info!(version, "Applying schema migration");
                // sqlx doesn't support multiple statements in a single query call,
                // so split on ';' and execute each statement individually.
                for statement in sql.split(';') {
                    let trimmed = statement.trim();
                    if !trimmed.is_empty() {
                        sqlx::query(trimmed).execute(pool).await?;
                    }
                }
                sqlx::query("UPDATE schema_version SET version = ?")
                    .bind(version)
                    .execute(pool)
                    .await?;
            }
        }

        Ok(())
    }

    fn default_db_path() -> StorageResult<PathBuf> {
        dirs::config_dir()
            .ok_or_else(|| StorageError::Initialization {
                message: "Cannot find config directory".into(),
            })
            .map(|p| p.join("ultrawan").join("ultrawan.db"))
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl SessionRepository for SqliteSessionRepository {
    fn load_all(&self) -> BoxFuture<'static, StorageResult<Vec<ChatSession>>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT key, body FROM records
                 WHERE key LIKE '%.json'
                 ORDER BY updated_at DESC",
            )
            .fetch_all(&pool)
            .await?;

            let mut sessions = Vec::new();
            for row in &rows {
                let key: String = row.get("key");
                let body: String = row.get("body");
                match serde_json::from_str::<ChatSession>(&body) {
                    Ok(session) => sessions.push(session),
                    Err(e) => {
                        warn!(key = %key, error = %e, "Skipping malformed session record");
                    }
                }
            }
            Ok(sessions)
        })
    }

    fn save(&self, session: &ChatSession) -> BoxFuture<'static, StorageResult<()>> {
        let pool = self.pool.clone();
        let key = session_record_key(&session.id);
        let updated_at = session.last_updated;
        let session = session.clone();

        Box::pin(async move {
            let body = serde_json::to_string(&session)?;
            sqlx::query(
                "INSERT INTO records (key, body, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                    body       = excluded.body,
                    updated_at = excluded.updated_at",
            )
            .bind(&key)
            .bind(&body)
            .bind(updated_at)
            .execute(&pool)
            .await?;
            Ok(())
        })
    }

    fn delete(&self, id: &str) -> BoxFuture<'static, StorageResult<()>> {
        let pool = self.pool.clone();
        let key = session_record_key(id);
        Box::pin(async move {
            sqlx::query("DELETE FROM records WHERE key = ?")
                .bind(&key)
                .execute(&pool)
                .await?;
            Ok(())
        })
    }
}

impl MemoryNoteStore for SqliteSessionRepository {
    fn save_note(&self, name: &str, content: &str) -> BoxFuture<'static, StorageResult<()>> {
        let pool = self.pool.clone();
        let key = note_record_key(name);
        let content = content.to_string();

        Box::pin(async move {
            sqlx::query(
                "INSERT INTO records (key, body, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                    body       = excluded.body,
                    updated_at = excluded.updated_at",
            )
            .bind(&key)
            .bind(&content)
            .bind(crate::models::session::now_millis())
            .execute(&pool)
            .await?;
            Ok(())
        })
    }

    fn list_notes(&self) -> BoxFuture<'static, StorageResult<Vec<String>>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let rows = sqlx::query("SELECT key FROM records WHERE key LIKE '%.md'")
                .fetch_all(&pool)
                .await?;
            Ok(rows
                .iter()
                .map(|row| {
                    let key: String = row.get("key");
                    key.trim_end_matches(".md").to_string()
                })
                .collect())
        })
    }
}
