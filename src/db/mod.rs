//! SQLite persistence for loop state and the reconciliation journal.
//!
//! Stores what the bot needs to resume after a restart:
//! - Per-instrument loop state (last signal, expected direction, stop-out bar)
//! - One journal row per instrument per tick, including skipped and failed ticks

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::{Direction, InstrumentState, ReconciliationAction, SignalKind};

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,
}

/// Stored loop state row.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredState {
    symbol: String,
    last_signal: String,
    last_bar_at: Option<DateTime<Utc>>,
    last_direction: String,
    stopped_out_bar: Option<DateTime<Utc>>,
}

impl From<StoredState> for InstrumentState {
    fn from(row: StoredState) -> Self {
        InstrumentState {
            symbol: row.symbol,
            last_signal: SignalKind::parse(&row.last_signal).unwrap_or_default(),
            last_bar_at: row.last_bar_at,
            last_direction: Direction::parse(&row.last_direction).unwrap_or_default(),
            stopped_out_bar: row.stopped_out_bar,
        }
    }
}

/// One journal entry.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Reconciliation {
    pub id: i64,
    pub symbol: String,
    pub signal: String,
    pub position: String,
    /// JSON array of the planned actions
    pub actions: String,
    /// noop, executed, skipped, failed or partial
    pub status: String,
    pub error: Option<String>,
    pub created_at: String,
}

/// Journal totals by outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JournalStats {
    pub total: i64,
    pub executed: i64,
    pub noop: i64,
    pub skipped: i64,
    pub failed: i64,
    pub partial: i64,
}

impl std::fmt::Display for JournalStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ticks: {} executed, {} no-op, {} skipped, {} failed, {} partial",
            self.total, self.executed, self.noop, self.skipped, self.failed, self.partial
        )
    }
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Private in-memory database. A single connection, since every
    /// `:memory:` connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS instrument_state (
                symbol TEXT PRIMARY KEY,
                last_signal TEXT NOT NULL DEFAULT 'NONE',
                last_bar_at TEXT,
                last_direction TEXT NOT NULL DEFAULT 'FLAT',
                stopped_out_bar TEXT,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reconciliations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                signal TEXT NOT NULL,
                position TEXT NOT NULL,
                actions TEXT NOT NULL DEFAULT '[]',
                status TEXT NOT NULL,
                error TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_reconciliations_symbol ON reconciliations(symbol, id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Loop State ====================

    pub async fn load_state(&self, symbol: &str) -> Result<Option<InstrumentState>> {
        let row = sqlx::query_as::<_, StoredState>(
            r#"
            SELECT symbol, last_signal, last_bar_at, last_direction, stopped_out_bar
            FROM instrument_state WHERE symbol = ?
            "#,
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load instrument state")?;

        Ok(row.map(Into::into))
    }

    pub async fn save_state(&self, state: &InstrumentState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO instrument_state
                (symbol, last_signal, last_bar_at, last_direction, stopped_out_bar, updated_at)
            VALUES (?, ?, ?, ?, ?, datetime('now'))
            ON CONFLICT(symbol) DO UPDATE SET
                last_signal = excluded.last_signal,
                last_bar_at = excluded.last_bar_at,
                last_direction = excluded.last_direction,
                stopped_out_bar = excluded.stopped_out_bar,
                updated_at = datetime('now')
            "#,
        )
        .bind(&state.symbol)
        .bind(state.last_signal.as_str())
        .bind(state.last_bar_at)
        .bind(state.last_direction.as_str())
        .bind(state.stopped_out_bar)
        .execute(&self.pool)
        .await
        .context("Failed to save instrument state")?;

        Ok(())
    }

    // ==================== Journal ====================

    /// Append a journal entry and return its id.
    pub async fn record_reconciliation(
        &self,
        symbol: &str,
        signal: &str,
        position: &str,
        actions: &[ReconciliationAction],
        status: &str,
        error: Option<&str>,
    ) -> Result<i64> {
        let actions = serde_json::to_string(actions).context("Failed to encode actions")?;

        let result = sqlx::query(
            r#"
            INSERT INTO reconciliations (symbol, signal, position, actions, status, error)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(symbol)
        .bind(signal)
        .bind(position)
        .bind(actions)
        .bind(status)
        .bind(error)
        .execute(&self.pool)
        .await
        .context("Failed to record reconciliation")?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent entries first, optionally for one symbol.
    pub async fn recent_reconciliations(
        &self,
        symbol: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Reconciliation>> {
        sqlx::query_as::<_, Reconciliation>(
            r#"
            SELECT * FROM reconciliations
            WHERE (? IS NULL OR symbol = ?)
            ORDER BY id DESC LIMIT ?
            "#,
        )
        .bind(symbol)
        .bind(symbol)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch reconciliations")
    }

    pub async fn journal_stats(&self) -> Result<JournalStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM reconciliations GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = JournalStats::default();
        for (status, count) in rows {
            stats.total += count;
            match status.as_str() {
                "executed" => stats.executed = count,
                "noop" => stats.noop = count,
                "skipped" => stats.skipped = count,
                "failed" => stats.failed = count,
                "partial" => stats.partial = count,
                _ => {}
            }
        }

        Ok(stats)
    }
}
