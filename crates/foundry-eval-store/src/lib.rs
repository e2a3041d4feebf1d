use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use foundry_eval_types::{Category, EvaluationOutcome, EvaluatorStats, RunResult};

/// SQLite history of finished runs, for diffing evaluator results across runs.
#[derive(Debug)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEntity {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub execution_mode: String,
    pub dataset_size: usize,
    pub evaluator_count: usize,
    pub cancelled: bool,
}

/// One evaluator's stats in one past run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub run_id: i64,
    pub started_at: DateTime<Utc>,
    pub stats: EvaluatorStats,
}

impl Store {
    /// Open a new store at the given path (e.g., "eval.db")
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_URI,
        )?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("store connection lock poisoned"))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                execution_mode TEXT NOT NULL,
                dataset_size INTEGER NOT NULL,
                evaluator_count INTEGER NOT NULL,
                cancelled BOOLEAN NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS evaluator_stats (
                id INTEGER PRIMARY KEY,
                run_id INTEGER NOT NULL,
                evaluator TEXT NOT NULL,
                category TEXT NOT NULL,
                attempted INTEGER NOT NULL,
                succeeded INTEGER NOT NULL,
                passed INTEGER NOT NULL,
                failed INTEGER NOT NULL,
                skipped INTEGER NOT NULL,
                pass_rate REAL NOT NULL,
                FOREIGN KEY(run_id) REFERENCES runs(id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS outcomes (
                id INTEGER PRIMARY KEY,
                run_id INTEGER NOT NULL,
                evaluator TEXT NOT NULL,
                record_index INTEGER NOT NULL,
                kind TEXT NOT NULL,
                passed BOOLEAN,
                payload TEXT NOT NULL,
                FOREIGN KEY(run_id) REFERENCES runs(id)
            )",
            [],
        )?;

        Ok(())
    }

    /// Save a finished run: its metadata, per-evaluator stats and every outcome.
    pub fn save_run(&self, result: &RunResult) -> Result<i64> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let meta = &result.metadata;

        tx.execute(
            "INSERT INTO runs (started_at, finished_at, execution_mode, dataset_size, evaluator_count, cancelled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                meta.started_at.to_rfc3339(),
                meta.finished_at.to_rfc3339(),
                meta.execution_mode.to_string(),
                meta.dataset_size as i64,
                meta.evaluator_count as i64,
                meta.cancelled
            ],
        )?;
        let run_id = tx.last_insert_rowid();

        for stats in result.evaluator_stats() {
            tx.execute(
                "INSERT INTO evaluator_stats
                 (run_id, evaluator, category, attempted, succeeded, passed, failed, skipped, pass_rate)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    run_id,
                    stats.evaluator,
                    stats.category.slug(),
                    stats.attempted as i64,
                    stats.succeeded as i64,
                    stats.passed as i64,
                    stats.failed as i64,
                    stats.skipped as i64,
                    stats.pass_rate
                ],
            )?;
        }

        for outcome in result.outcomes() {
            tx.execute(
                "INSERT INTO outcomes (run_id, evaluator, record_index, kind, passed, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    run_id,
                    outcome.evaluator,
                    outcome.record_index as i64,
                    outcome.kind.as_str(),
                    outcome.passed,
                    serde_json::to_string(outcome)?
                ],
            )?;
        }

        tx.commit()?;
        Ok(run_id)
    }

    /// Runs, newest first.
    pub fn list_runs(&self) -> Result<Vec<RunEntity>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, started_at, finished_at, execution_mode, dataset_size, evaluator_count, cancelled
             FROM runs ORDER BY id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, bool>(6)?,
            ))
        })?;

        let mut runs = Vec::new();
        for row in rows {
            let (id, started_at, finished_at, execution_mode, dataset_size, evaluator_count, cancelled) = row?;
            runs.push(RunEntity {
                id,
                started_at: parse_time(&started_at)?,
                finished_at: parse_time(&finished_at)?,
                execution_mode,
                dataset_size: dataset_size as usize,
                evaluator_count: evaluator_count as usize,
                cancelled,
            });
        }
        Ok(runs)
    }

    /// Stats recorded for `evaluator` across all saved runs, oldest first.
    pub fn evaluator_history(&self, evaluator: &str) -> Result<Vec<HistoryEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT s.run_id, r.started_at, s.category, s.attempted, s.succeeded, s.passed, s.failed,
                    s.skipped, s.pass_rate
             FROM evaluator_stats s JOIN runs r ON r.id = s.run_id
             WHERE s.evaluator = ?1
             ORDER BY s.run_id ASC",
        )?;
        let rows = stmt.query_map(params![evaluator], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                [
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, i64>(7)?,
                ],
                row.get::<_, f64>(8)?,
            ))
        })?;

        let mut history = Vec::new();
        for row in rows {
            let (run_id, started_at, category, [attempted, succeeded, passed, failed, skipped], pass_rate) = row?;
            history.push(HistoryEntry {
                run_id,
                started_at: parse_time(&started_at)?,
                stats: EvaluatorStats {
                    evaluator: evaluator.to_string(),
                    category: parse_category(&category)?,
                    attempted: attempted as usize,
                    succeeded: succeeded as usize,
                    passed: passed as usize,
                    failed: failed as usize,
                    skipped: skipped as usize,
                    pass_rate,
                },
            });
        }
        Ok(history)
    }

    /// Outcomes of one run, in evaluator then record order as saved.
    pub fn load_outcomes(&self, run_id: i64) -> Result<Vec<EvaluationOutcome>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT payload FROM outcomes WHERE run_id = ?1 ORDER BY id ASC")?;
        let rows = stmt.query_map(params![run_id], |row| row.get::<_, String>(0))?;
        let mut outcomes = Vec::new();
        for payload in rows {
            outcomes.push(serde_json::from_str(&payload?)?);
        }
        Ok(outcomes)
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

fn parse_category(slug: &str) -> Result<Category> {
    Category::ALL
        .iter()
        .copied()
        .find(|c| c.slug() == slug)
        .ok_or_else(|| anyhow!("unknown category '{slug}' in store"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use foundry_eval_types::{
        CategoryReport, ExecutionMode, FailureKind, FailureReason, RunMetadata, ScoreValue,
    };

    fn run(pass_rate: f64) -> RunResult {
        RunResult {
            metadata: RunMetadata {
                started_at: Utc::now(),
                finished_at: Utc::now(),
                dataset_size: 2,
                execution_mode: ExecutionMode::Local,
                evaluator_count: 1,
                cancelled: false,
            },
            categories: vec![CategoryReport {
                category: Category::TextualSimilarity,
                evaluators: vec!["f1_score".into()],
                stats: vec![EvaluatorStats {
                    evaluator: "f1_score".into(),
                    category: Category::TextualSimilarity,
                    attempted: 2,
                    succeeded: 1,
                    passed: 1,
                    failed: 1,
                    skipped: 0,
                    pass_rate,
                }],
                outcomes: vec![
                    EvaluationOutcome::success("f1_score", 0, Some(ScoreValue::Scalar(0.8)), None, true),
                    EvaluationOutcome::failure("f1_score", 1, FailureReason::new(FailureKind::Timeout, "slow")),
                ],
            }],
        }
    }

    #[test]
    fn saves_runs_and_reads_history() {
        let store = Store::open_in_memory().unwrap();
        let first = store.save_run(&run(1.0)).unwrap();
        let second = store.save_run(&run(0.5)).unwrap();
        assert!(second > first);

        let history = store.evaluator_history("f1_score").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].run_id, first);
        assert_eq!(history[1].stats.pass_rate, 0.5);
        assert_eq!(history[1].stats.category, Category::TextualSimilarity);

        let runs = store.list_runs().unwrap();
        assert_eq!(runs[0].id, second);
        assert_eq!(runs[0].execution_mode, "local");

        assert!(store.evaluator_history("coherence").unwrap().is_empty());
    }

    #[test]
    fn outcomes_round_trip_through_payload() {
        let store = Store::open_in_memory().unwrap();
        let result = run(1.0);
        let id = store.save_run(&result).unwrap();
        let loaded = store.load_outcomes(id).unwrap();
        assert_eq!(loaded, result.outcomes().cloned().collect::<Vec<_>>());
    }
}
