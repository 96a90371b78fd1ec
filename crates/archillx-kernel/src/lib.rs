//! SQLite-backed relational store for the control plane.
//!
//! The kernel owns the tables the governance engine reads and mirrors into:
//! sessions, tasks, memory records, the audit mirror, risk profiles, and
//! evolution schedules. Connections are opened per call and dropped on scope
//! exit; blocking entry points get `*_async` wrappers via `spawn_blocking`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod migration;

pub use migration::{migration_state, MigrationState};

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[derive(Clone)]
pub struct Kernel {
    db_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRow {
    pub id: i64,
    pub time: String,
    pub action: String,
    pub decision: String,
    pub risk_score: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub context: Value,
}

/// Aggregates backing the entropy memory signal (last N memory rows).
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryStats {
    pub total: u64,
    pub duplicates: u64,
    pub low_importance: u64,
}

/// Aggregates backing the entropy task signal (last N tasks, newest first).
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskStats {
    pub total: u64,
    pub unfinished: u64,
    pub failed: u64,
    pub newer_half: u64,
    pub older_half: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ModelStats {
    pub total: u64,
    pub distinct_models: u64,
}

#[derive(Debug, Clone, Default)]
pub struct AuditStats {
    pub total: u64,
    pub approved: u64,
    pub warned: u64,
    pub blocked: u64,
    pub risk_scores: Vec<f64>,
}

impl Kernel {
    /// Open (and initialize on first use) the store at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create db dir {}", parent.display()))?;
        }
        let kernel = Self {
            db_path: db_path.to_path_buf(),
        };
        let conn = kernel.conn()?;
        Self::init_schema(&conn)?;
        Ok(kernel)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        let busy_ms: u64 = std::env::var("ARCHILLX_SQLITE_BUSY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5000);
        conn.busy_timeout(std::time::Duration::from_millis(busy_ms))?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              name TEXT NOT NULL,
              status TEXT NOT NULL DEFAULT 'active',
              context TEXT,
              created TEXT NOT NULL,
              updated TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);

            CREATE TABLE IF NOT EXISTS tasks (
              id TEXT PRIMARY KEY,
              session_id INTEGER,
              kind TEXT NOT NULL,
              status TEXT NOT NULL,          -- queued|running|done|failed
              model TEXT,
              fallback_used INTEGER NOT NULL DEFAULT 0,
              input TEXT,
              output TEXT,
              error TEXT,
              created TEXT NOT NULL,
              updated TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
            CREATE INDEX IF NOT EXISTS idx_tasks_created ON tasks(created);

            CREATE TABLE IF NOT EXISTS memory_records (
              id TEXT PRIMARY KEY,
              key TEXT,
              content TEXT NOT NULL,
              content_hash TEXT,
              importance REAL NOT NULL DEFAULT 0.5,
              created TEXT NOT NULL,
              updated TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_memory_hash ON memory_records(content_hash);

            CREATE TABLE IF NOT EXISTS audit_log (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              time TEXT NOT NULL,
              action TEXT NOT NULL,
              decision TEXT NOT NULL,        -- APPROVED|WARNED|BLOCKED
              risk_score INTEGER NOT NULL,
              reason TEXT,
              context TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_audit_time ON audit_log(time);

            CREATE TABLE IF NOT EXISTS risk_profiles (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              subject TEXT NOT NULL UNIQUE,
              score REAL NOT NULL,
              updated TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS evolution_schedules (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              name TEXT NOT NULL UNIQUE,
              cron TEXT NOT NULL,
              enabled INTEGER NOT NULL DEFAULT 1,
              last_run TEXT,
              created TEXT NOT NULL,
              updated TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS schema_version (
              version TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    pub fn ping(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    // ---- sessions / tasks / memory -------------------------------------

    pub fn insert_session(&self, name: &str, context: Option<&Value>) -> Result<i64> {
        let conn = self.conn()?;
        let now = now_iso();
        conn.execute(
            "INSERT INTO sessions (name, status, context, created, updated) VALUES (?1, 'active', ?2, ?3, ?3)",
            params![name, context.map(|c| c.to_string()), now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert_task(
        &self,
        id: &str,
        session_id: Option<i64>,
        kind: &str,
        status: &str,
        model: Option<&str>,
        fallback_used: bool,
        input: Option<&Value>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let now = now_iso();
        conn.execute(
            "INSERT INTO tasks (id, session_id, kind, status, model, fallback_used, input, created, updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                id,
                session_id,
                kind,
                status,
                model,
                fallback_used as i64,
                input.map(|v| v.to_string()),
                now
            ],
        )?;
        Ok(())
    }

    pub fn set_task_status(&self, id: &str, status: &str, error: Option<&str>) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE tasks SET status = ?2, error = ?3, updated = ?4 WHERE id = ?1",
            params![id, status, error, now_iso()],
        )?;
        Ok(changed > 0)
    }

    pub fn insert_memory(
        &self,
        id: &str,
        key: Option<&str>,
        content: &str,
        content_hash: Option<&str>,
        importance: f64,
    ) -> Result<()> {
        let conn = self.conn()?;
        let now = now_iso();
        conn.execute(
            "INSERT INTO memory_records (id, key, content, content_hash, importance, created, updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![id, key, content, content_hash, importance, now],
        )?;
        Ok(())
    }

    // ---- audit mirror ---------------------------------------------------

    pub fn append_audit(
        &self,
        action: &str,
        decision: &str,
        risk_score: i64,
        reason: Option<&str>,
        context: Option<&Value>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO audit_log (time, action, decision, risk_score, reason, context)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                now_iso(),
                action,
                decision,
                risk_score,
                reason,
                context.map(|c| c.to_string())
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn recent_audit(&self, limit: i64) -> Result<Vec<AuditRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, time, action, decision, risk_score, reason, context
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            let context: Option<String> = row.get(6)?;
            Ok(AuditRow {
                id: row.get(0)?,
                time: row.get(1)?,
                action: row.get(2)?,
                decision: row.get(3)?,
                risk_score: row.get(4)?,
                reason: row.get(5)?,
                context: context
                    .and_then(|c| serde_json::from_str(&c).ok())
                    .unwrap_or(Value::Null),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn upsert_risk_profile(&self, subject: &str, score: f64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO risk_profiles (subject, score, updated) VALUES (?1, ?2, ?3)
             ON CONFLICT(subject) DO UPDATE SET score = excluded.score, updated = excluded.updated",
            params![subject, score, now_iso()],
        )?;
        Ok(())
    }

    // ---- evolution schedules -------------------------------------------

    pub fn upsert_schedule(&self, name: &str, cron: &str, enabled: bool) -> Result<()> {
        let conn = self.conn()?;
        let now = now_iso();
        conn.execute(
            "INSERT INTO evolution_schedules (name, cron, enabled, created, updated)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(name) DO UPDATE SET cron = excluded.cron, enabled = excluded.enabled, updated = excluded.updated",
            params![name, cron, enabled as i64, now],
        )?;
        Ok(())
    }

    pub fn mark_schedule_run(&self, name: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE evolution_schedules SET last_run = ?2, updated = ?2 WHERE name = ?1",
            params![name, now_iso()],
        )?;
        Ok(())
    }

    // ---- signal aggregates ---------------------------------------------

    pub fn memory_signal_stats(&self, limit: i64) -> Result<MemoryStats> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT content_hash, importance FROM memory_records ORDER BY rowid DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            let hash: Option<String> = row.get(0)?;
            let importance: f64 = row.get(1)?;
            Ok((hash, importance))
        })?;
        let mut total = 0u64;
        let mut low = 0u64;
        let mut seen = std::collections::HashSet::new();
        let mut duplicates = 0u64;
        for row in rows {
            let (hash, importance) = row?;
            total += 1;
            if importance < 0.3 {
                low += 1;
            }
            if let Some(hash) = hash {
                if !seen.insert(hash) {
                    duplicates += 1;
                }
            }
        }
        Ok(MemoryStats {
            total,
            duplicates,
            low_importance: low,
        })
    }

    pub fn task_signal_stats(&self, limit: i64) -> Result<TaskStats> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT status FROM tasks ORDER BY created DESC, id DESC LIMIT ?1")?;
        let statuses = stmt
            .query_map(params![limit], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let total = statuses.len() as u64;
        let unfinished = statuses
            .iter()
            .filter(|s| matches!(s.as_str(), "queued" | "running"))
            .count() as u64;
        let failed = statuses.iter().filter(|s| s.as_str() == "failed").count() as u64;
        // The query is newest-first, so the front half of the list is the
        // newer half of the window.
        let half = statuses.len() / 2;
        let newer_half = half as u64 + (statuses.len() % 2) as u64;
        let older_half = half as u64;
        Ok(TaskStats {
            total,
            unfinished,
            failed,
            newer_half,
            older_half,
        })
    }

    pub fn model_signal_stats(&self, limit: i64) -> Result<ModelStats> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT model FROM tasks WHERE model IS NOT NULL ORDER BY created DESC, id DESC LIMIT ?1",
        )?;
        let models = stmt
            .query_map(params![limit], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let total = models.len() as u64;
        let distinct: std::collections::HashSet<_> = models.into_iter().collect();
        Ok(ModelStats {
            total,
            distinct_models: distinct.len() as u64,
        })
    }

    pub fn audit_signal_stats(&self, limit: i64) -> Result<AuditStats> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT decision, risk_score FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut stats = AuditStats::default();
        for row in rows {
            let (decision, score) = row?;
            stats.total += 1;
            match decision.as_str() {
                "APPROVED" => stats.approved += 1,
                "WARNED" => stats.warned += 1,
                "BLOCKED" => stats.blocked += 1,
                _ => {}
            }
            stats.risk_scores.push(score as f64);
        }
        Ok(stats)
    }

    // ---- schema revisions ----------------------------------------------

    pub fn current_revision(&self) -> Result<Option<String>> {
        let conn = self.conn()?;
        let rev = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(rev)
    }

    pub fn set_revision(&self, revision: &str) -> Result<()> {
        let conn = self.conn()?;
        let existing: Option<String> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        if existing.is_some() {
            conn.execute("UPDATE schema_version SET version = ?1", params![revision])?;
        } else {
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![revision],
            )?;
        }
        Ok(())
    }

    /// Apply pending `.sql` migrations from `dir` in revision order,
    /// recording the newest applied revision. Returns applied revisions.
    pub fn apply_migrations(&self, dir: &Path) -> Result<Vec<String>> {
        let mut files = migration::migration_files(dir)?;
        files.sort_by(|a, b| a.0.cmp(&b.0));
        let current = self.current_revision()?;
        let mut applied = Vec::new();
        for (revision, path) in files {
            if let Some(current) = &current {
                if revision.as_str() <= current.as_str() {
                    continue;
                }
            }
            let sql = std::fs::read_to_string(&path)
                .with_context(|| format!("read migration {}", path.display()))?;
            let conn = self.conn()?;
            conn.execute_batch(&sql)
                .with_context(|| format!("apply migration {}", path.display()))?;
            self.set_revision(&revision)?;
            tracing::info!(revision = %revision, "applied schema migration");
            applied.push(revision);
        }
        Ok(applied)
    }

    // ---- async wrappers -------------------------------------------------

    pub async fn ping_async(&self) -> Result<()> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.ping()).await?
    }

    pub async fn append_audit_async(
        &self,
        action: String,
        decision: String,
        risk_score: i64,
        reason: Option<String>,
        context: Option<Value>,
    ) -> Result<i64> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            this.append_audit(
                &action,
                &decision,
                risk_score,
                reason.as_deref(),
                context.as_ref(),
            )
        })
        .await?
    }

    pub async fn recent_audit_async(&self, limit: i64) -> Result<Vec<AuditRow>> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.recent_audit(limit)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kernel() -> (tempfile::TempDir, Kernel) {
        let dir = tempfile::tempdir().unwrap();
        let kernel = Kernel::open(&dir.path().join("archillx.sqlite")).unwrap();
        (dir, kernel)
    }

    #[test]
    fn empty_tables_yield_zero_stats() {
        let (_dir, kernel) = kernel();
        let memory = kernel.memory_signal_stats(200).unwrap();
        let tasks = kernel.task_signal_stats(300).unwrap();
        let models = kernel.model_signal_stats(150).unwrap();
        let audit = kernel.audit_signal_stats(200).unwrap();
        assert_eq!(memory.total, 0);
        assert_eq!(tasks.total, 0);
        assert_eq!(models.total, 0);
        assert_eq!(audit.total, 0);
        assert!(audit.risk_scores.is_empty());
    }

    #[test]
    fn memory_stats_count_duplicates_and_low_importance() {
        let (_dir, kernel) = kernel();
        kernel.insert_memory("m1", None, "alpha", Some("h1"), 0.9).unwrap();
        kernel.insert_memory("m2", None, "alpha", Some("h1"), 0.1).unwrap();
        kernel.insert_memory("m3", None, "beta", Some("h2"), 0.2).unwrap();

        let stats = kernel.memory_signal_stats(200).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.low_importance, 2);
    }

    #[test]
    fn task_stats_classify_statuses() {
        let (_dir, kernel) = kernel();
        kernel.insert_task("t1", None, "skill", "done", Some("m-a"), false, None).unwrap();
        kernel.insert_task("t2", None, "skill", "failed", Some("m-b"), true, None).unwrap();
        kernel.insert_task("t3", None, "skill", "queued", Some("m-a"), false, None).unwrap();
        kernel.insert_task("t4", None, "skill", "running", None, false, None).unwrap();

        let stats = kernel.task_signal_stats(300).unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.unfinished, 2);
        assert_eq!(stats.failed, 1);

        let models = kernel.model_signal_stats(150).unwrap();
        assert_eq!(models.total, 3);
        assert_eq!(models.distinct_models, 2);
    }

    #[test]
    fn audit_mirror_round_trips_context() {
        let (_dir, kernel) = kernel();
        let id = kernel
            .append_audit("rm -rf /", "BLOCKED", 95, Some("high risk"), Some(&json!({"source": "cron"})))
            .unwrap();
        assert!(id > 0);
        let rows = kernel.recent_audit(10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].decision, "BLOCKED");
        assert_eq!(rows[0].context["source"], json!("cron"));

        let stats = kernel.audit_signal_stats(200).unwrap();
        assert_eq!(stats.blocked, 1);
        assert_eq!(stats.risk_scores, vec![95.0]);
    }

    #[test]
    fn migrations_apply_in_revision_order_and_stamp_version() {
        let (dir, kernel) = kernel();
        let migrations = dir.path().join("migrations");
        std::fs::create_dir_all(&migrations).unwrap();
        std::fs::write(
            migrations.join("20260301000001_initial.sql"),
            "CREATE TABLE IF NOT EXISTS probe_a (id INTEGER PRIMARY KEY);",
        )
        .unwrap();
        std::fs::write(
            migrations.join("20260301000002_add_probe_b.sql"),
            "CREATE TABLE IF NOT EXISTS probe_b (id INTEGER PRIMARY KEY);",
        )
        .unwrap();

        let applied = kernel.apply_migrations(&migrations).unwrap();
        assert_eq!(applied, vec!["20260301000001", "20260301000002"]);
        assert_eq!(
            kernel.current_revision().unwrap().as_deref(),
            Some("20260301000002")
        );

        // Re-applying is a no-op.
        assert!(kernel.apply_migrations(&migrations).unwrap().is_empty());
    }

    #[test]
    fn schedules_upsert_and_mark_runs() {
        let (_dir, kernel) = kernel();
        kernel.upsert_schedule("evolution_auto_cycle", "15 */6 * * *", true).unwrap();
        kernel.upsert_schedule("evolution_auto_cycle", "0 * * * *", true).unwrap();
        kernel.mark_schedule_run("evolution_auto_cycle").unwrap();
        // A second upsert must not create a duplicate row.
        let conn = Connection::open(kernel.db_path()).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM evolution_schedules", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
