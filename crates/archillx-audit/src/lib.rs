//! Append-only security audit ledger with size-based rotation.
//!
//! The active file is `<evidence_dir>/security_audit.jsonl`; once it reaches
//! the configured byte threshold the next append moves it into `archive/`
//! and starts fresh. Every record is additionally mirrored into the
//! relational audit table when a kernel handle is available; a failed mirror
//! is reported on the returned record, never raised.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};

use archillx_evidence::jsonl;
use archillx_kernel::Kernel;

pub mod context;

pub use context::{current_request_context, with_request_context, RequestContext};

pub const DEFAULT_AUDIT_FILE_MAX_BYTES: u64 = 5 * 1024 * 1024;

const AUDIT_STEM: &str = "security_audit";

#[derive(Debug, Clone)]
pub struct RotateOutcome {
    pub rotated: bool,
    pub archived_to: Option<PathBuf>,
}

pub struct AuditStore {
    evidence_dir: PathBuf,
    max_bytes: u64,
    // Serializes the size check, rotation, and framed append.
    append_lock: Mutex<()>,
}

impl AuditStore {
    pub fn new(evidence_dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            evidence_dir: evidence_dir.into(),
            max_bytes,
            append_lock: Mutex::new(()),
        }
    }

    pub fn active_path(&self) -> PathBuf {
        self.evidence_dir.join(format!("{}.jsonl", AUDIT_STEM))
    }

    fn archive_dir(&self) -> PathBuf {
        self.evidence_dir.join("archive")
    }

    /// Append one framed record, rotating first when the active file has
    /// reached the threshold.
    pub fn append_jsonl(&self, record: &Value) -> Result<PathBuf> {
        let _guard = self.append_lock.lock().expect("audit append lock");
        self.rotate_locked(self.max_bytes)?;
        let path = self.active_path();
        jsonl::append_line(&path, record)?;
        Ok(path)
    }

    /// Rotate the active file into `archive/` if it has reached
    /// `max_bytes` (or the override). JSONL entries are never rewritten,
    /// only moved wholesale.
    pub fn rotate_audit_file(&self, max_bytes: Option<u64>) -> Result<RotateOutcome> {
        let _guard = self.append_lock.lock().expect("audit append lock");
        self.rotate_locked(max_bytes.unwrap_or(self.max_bytes))
    }

    fn rotate_locked(&self, max_bytes: u64) -> Result<RotateOutcome> {
        let path = self.active_path();
        let size = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(_) => {
                return Ok(RotateOutcome {
                    rotated: false,
                    archived_to: None,
                })
            }
        };
        if size < max_bytes {
            return Ok(RotateOutcome {
                rotated: false,
                archived_to: None,
            });
        }
        let archive_dir = self.archive_dir();
        fs::create_dir_all(&archive_dir)
            .with_context(|| format!("create {}", archive_dir.display()))?;
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let target = archive_dir.join(format!("{}.{}.jsonl", AUDIT_STEM, stamp));
        fs::rename(&path, &target)
            .with_context(|| format!("rotate {} -> {}", path.display(), target.display()))?;
        tracing::info!(archived = %target.display(), size, "rotated audit ledger");
        Ok(RotateOutcome {
            rotated: true,
            archived_to: Some(target),
        })
    }

    /// Records in the active file only; archives are reachable via
    /// [`archive_snapshot`](Self::archive_snapshot).
    pub fn load_jsonl_records(&self, limit: Option<usize>) -> Result<Vec<Value>> {
        jsonl::read_lines(&self.active_path(), limit)
    }

    pub fn archive_snapshot(&self) -> Result<Value> {
        let active = self.active_path();
        let active_size = fs::metadata(&active).map(|m| m.len()).unwrap_or(0);
        let mut archived = Vec::new();
        if let Ok(read) = fs::read_dir(self.archive_dir()) {
            for entry in read.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                    continue;
                }
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                archived.push(json!({"path": path.display().to_string(), "size": size}));
            }
        }
        archived.sort_by(|a, b| a["path"].as_str().cmp(&b["path"].as_str()));
        Ok(json!({
            "active": {"path": active.display().to_string(), "size": active_size},
            "archived": archived,
            "max_bytes": self.max_bytes,
        }))
    }

    /// Build, append, and best-effort mirror one audit record. The returned
    /// value carries `evidence_path` and `db_persisted`.
    pub fn persist_audit(
        &self,
        kernel: Option<&Kernel>,
        action: &str,
        decision: &str,
        risk_score: i64,
        reason: Option<&str>,
        context: Option<Value>,
    ) -> Result<Value> {
        let mut ctx = match context {
            Some(Value::Object(map)) => map,
            Some(other) => {
                let mut map = Map::new();
                map.insert("value".into(), other);
                map
            }
            None => Map::new(),
        };
        ctx.insert(
            "request_context".into(),
            serde_json::to_value(current_request_context())?,
        );

        let mut record = json!({
            "ts": archillx_evidence::now_iso(),
            "action": action,
            "decision": decision,
            "risk_score": risk_score,
            "context": Value::Object(ctx.clone()),
        });
        if let Some(reason) = reason {
            record["reason"] = json!(reason);
        }

        let path = self.append_jsonl(&record)?;

        let mut db_persisted = false;
        if let Some(kernel) = kernel {
            match kernel.append_audit(
                action,
                decision,
                risk_score,
                reason,
                Some(&Value::Object(ctx)),
            ) {
                Ok(_) => db_persisted = true,
                Err(err) => {
                    tracing::warn!(%err, action, "audit mirror failed; JSONL record kept");
                }
            }
        }

        record["evidence_path"] = json!(path.display().to_string());
        record["db_persisted"] = json!(db_persisted);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuditStore::new(dir.path(), DEFAULT_AUDIT_FILE_MAX_BYTES);
        store
            .append_jsonl(&json!({"action": "a", "decision": "APPROVED"}))
            .unwrap();

        let records = store.load_jsonl_records(None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["action"], json!("a"));
    }

    #[test]
    fn rotation_archives_oversized_file_before_next_append() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuditStore::new(dir.path(), 10);
        store
            .append_jsonl(&json!({"k": "x".repeat(40)}))
            .unwrap();
        // Next append crosses the threshold first: the old file is archived
        // and the active ledger only holds the new record.
        store
            .append_jsonl(&json!({"action": "fresh", "decision": "APPROVED"}))
            .unwrap();

        let records = store.load_jsonl_records(None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["action"], json!("fresh"));

        let snapshot = store.archive_snapshot().unwrap();
        let archived = snapshot["archived"].as_array().unwrap();
        assert_eq!(archived.len(), 1);
        let name = archived[0]["path"].as_str().unwrap();
        assert!(name.contains("security_audit."));
        assert!(name.ends_with(".jsonl"));
        assert!(name.contains('T'), "archive name carries a UTC timestamp");
        assert!(archived[0]["size"].as_u64().unwrap() >= 10);
    }

    #[test]
    fn explicit_rotate_reports_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuditStore::new(dir.path(), 10);
        let outcome = store.rotate_audit_file(None).unwrap();
        assert!(!outcome.rotated, "nothing to rotate yet");

        store.append_jsonl(&json!({"k": "y".repeat(40)})).unwrap();
        let outcome = store.rotate_audit_file(None).unwrap();
        assert!(outcome.rotated);
        assert!(outcome.archived_to.unwrap().exists());
    }

    #[test]
    fn persist_audit_tags_request_context_and_reports_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuditStore::new(dir.path(), DEFAULT_AUDIT_FILE_MAX_BYTES);
        let kernel =
            Kernel::open(&dir.path().join("db.sqlite")).unwrap();

        let record = store
            .persist_audit(
                Some(&kernel),
                "file_ops",
                "WARNED",
                65,
                Some("sensitive path"),
                Some(json!({"skill": "file_ops"})),
            )
            .unwrap();

        assert_eq!(record["db_persisted"], json!(true));
        assert!(record["evidence_path"].as_str().unwrap().ends_with("security_audit.jsonl"));
        let ctx = &record["context"]["request_context"];
        assert!(ctx.is_object(), "request context slot is always present");

        let mirrored = kernel.recent_audit(10).unwrap();
        assert_eq!(mirrored.len(), 1);
        assert_eq!(mirrored[0].decision, "WARNED");
    }

    #[test]
    fn persist_audit_without_kernel_still_lands_in_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuditStore::new(dir.path(), DEFAULT_AUDIT_FILE_MAX_BYTES);
        let record = store
            .persist_audit(None, "noop", "APPROVED", 0, None, None)
            .unwrap();
        assert_eq!(record["db_persisted"], json!(false));
        assert_eq!(store.load_jsonl_records(None).unwrap().len(), 1);
    }
}
