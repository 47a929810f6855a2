//! PayopsStore: durable student snapshots, a decision audit log, and metrics.

use crate::decision::{AgentSource, CouncilDebate, Decision};
use crate::error::StoreError;
use crate::student::StudentSnapshot;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// SQLite pool for payops.db.
pub struct PayopsStore {
    pool: SqlitePool,
}

/// A snapshot row as read back from the store.
#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    pub id: i64,
    pub samples_seen: u64,
    pub created_at: String,
    pub snapshot: StudentSnapshot,
}

/// Per-source decision totals from the audit log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DecisionCounts {
    pub student: u64,
    pub teacher: u64,
}

impl PayopsStore {
    /// Connect to (or create) the database at `path`, enable WAL, and apply
    /// the embedded schema.
    pub async fn connect(path: &Path) -> Result<Arc<Self>, StoreError> {
        let url = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|error| StoreError::InvalidPath(error.to_string()))?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await?;

        Ok(Arc::new(Self { pool }))
    }

    pub async fn save_snapshot(&self, snapshot: &StudentSnapshot) -> Result<i64, StoreError> {
        let payload = snapshot.to_bytes()?;
        let result = sqlx::query(
            "INSERT INTO student_snapshots (samples_seen, correct_predictions, payload, created_at)
             VALUES (?, ?, ?, datetime('now'))",
        )
        .bind(to_i64(snapshot.samples_seen))
        .bind(to_i64(snapshot.correct_predictions))
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Most recently written snapshot, if any.
    pub async fn load_latest_snapshot(&self) -> Result<Option<StoredSnapshot>, StoreError> {
        let row: Option<(i64, i64, String, Vec<u8>)> = sqlx::query_as(
            "SELECT id, samples_seen, created_at, payload FROM student_snapshots
             ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(id, samples_seen, created_at, payload)| {
            Ok(StoredSnapshot {
                id,
                samples_seen: u64::try_from(samples_seen).unwrap_or(0),
                created_at,
                snapshot: StudentSnapshot::from_bytes(&payload)?,
            })
        })
        .transpose()
    }

    pub async fn snapshot_count(&self) -> Result<u64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM student_snapshots")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Drop all but the newest `keep` snapshots.
    pub async fn prune_snapshots(&self, keep: u32) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM student_snapshots WHERE id NOT IN
             (SELECT id FROM student_snapshots ORDER BY id DESC LIMIT ?)",
        )
        .bind(keep)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Append a decision to the audit log. `debate` is stored as JSON when the
    /// decision came from the council.
    pub async fn log_decision(
        &self,
        decision: &Decision,
        transaction_ids: &[String],
        debate: Option<&CouncilDebate>,
    ) -> Result<(), StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let transaction_ids = serde_json::to_string(transaction_ids)?;
        let debate_json = debate.map(serde_json::to_string).transpose()?;

        sqlx::query(
            "INSERT INTO decision_log
             (id, agent_source, action, confidence, reasoning, transaction_ids, debate, decided_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(decision.agent_source.to_string())
        .bind(decision.action.as_str())
        .bind(decision.confidence_score)
        .bind(&decision.reasoning)
        .bind(&transaction_ids)
        .bind(&debate_json)
        .bind(decision.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn decision_counts(&self) -> Result<DecisionCounts, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT agent_source, COUNT(*) FROM decision_log GROUP BY agent_source",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = DecisionCounts::default();
        for (source, count) in rows {
            let count = u64::try_from(count).unwrap_or(0);
            if source == AgentSource::Student.to_string() {
                counts.student = count;
            } else if source == AgentSource::Teacher.to_string() {
                counts.teacher = count;
            }
        }
        Ok(counts)
    }

    /// Record a metric data point.
    pub async fn record_metric(&self, metric_name: &str, metric_value: f64) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO metrics (metric_name, metric_value, recorded_at) VALUES (?, ?, datetime('now'))",
        )
        .bind(metric_name)
        .bind(metric_value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Latest value of a metric, if it was ever recorded.
    pub async fn latest_metric(&self, metric_name: &str) -> Result<Option<f64>, StoreError> {
        let row: Option<(f64,)> = sqlx::query_as(
            "SELECT metric_value FROM metrics WHERE metric_name = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(metric_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(value,)| value))
    }
}

impl std::fmt::Debug for PayopsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayopsStore").finish_non_exhaustive()
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS student_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    samples_seen INTEGER NOT NULL,
    correct_predictions INTEGER NOT NULL,
    payload BLOB NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS decision_log (
    id TEXT PRIMARY KEY,
    agent_source TEXT NOT NULL,
    action TEXT NOT NULL,
    confidence REAL NOT NULL,
    reasoning TEXT NOT NULL,
    transaction_ids TEXT NOT NULL,
    debate TEXT,
    decided_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_decision_log_source ON decision_log(agent_source);

CREATE TABLE IF NOT EXISTS metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    metric_name TEXT NOT NULL,
    metric_value REAL NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_metrics_name ON metrics(metric_name, recorded_at);
"#;
