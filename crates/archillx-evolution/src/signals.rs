//! Evolution signal collector: freezes readiness, migration state,
//! telemetry, audit summary, and release-gate summary into one snapshot
//! that inspections and baselines are computed from.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use archillx_audit::AuditStore;
use archillx_evidence::EvidenceStore;
use archillx_kernel::{migration_state, Kernel, MigrationState};
use archillx_telemetry::Telemetry;

use crate::schemas::SignalSnapshot;

const AUDIT_SUMMARY_LIMIT: usize = 200;
const GATE_SUMMARY_LIMIT: usize = 20;

#[derive(Debug, Clone)]
pub struct MigrationSettings {
    pub dir: PathBuf,
    pub enabled: bool,
    pub required: bool,
}

pub struct SignalCollector {
    kernel: Kernel,
    telemetry: Arc<Telemetry>,
    audit: Arc<AuditStore>,
    evidence: EvidenceStore,
    migration: MigrationSettings,
}

impl SignalCollector {
    pub fn new(
        kernel: Kernel,
        telemetry: Arc<Telemetry>,
        audit: Arc<AuditStore>,
        evidence: EvidenceStore,
        migration: MigrationSettings,
    ) -> Self {
        Self {
            kernel,
            telemetry,
            audit,
            evidence,
            migration,
        }
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn collect(&self) -> SignalSnapshot {
        SignalSnapshot {
            created_at: archillx_evidence::now_iso(),
            readiness: self.collect_readiness(),
            migration: serde_json::to_value(self.migration_state()).unwrap_or(Value::Null),
            telemetry: json!({
                "aggregate": self.telemetry.aggregated_snapshot(),
                "history": self.telemetry.history_snapshot(),
            }),
            audit_summary: self.audit_summary(),
            gate_summary: self.gate_summary(),
        }
    }

    pub fn migration_state(&self) -> MigrationState {
        migration_state(
            &self.kernel,
            &self.migration.dir,
            self.migration.enabled,
            self.migration.required,
        )
    }

    /// Readiness rollup over the db, the evidence tree, and migration state.
    pub fn collect_readiness(&self) -> Value {
        let mut checks = Map::new();
        let mut details = Map::new();
        let mut errors: Vec<String> = Vec::new();

        match self.kernel.ping() {
            Ok(()) => {
                checks.insert("db".into(), json!(true));
                details.insert(
                    "db".into(),
                    json!({"path": self.kernel.db_path().display().to_string()}),
                );
            }
            Err(err) => {
                checks.insert("db".into(), json!(false));
                details.insert("db".into(), json!({"error": err.to_string()}));
                errors.push(format!("db:{err}"));
            }
        }

        let evidence_root = self.evidence.root();
        let evidence_ok = std::fs::create_dir_all(evidence_root).is_ok() && evidence_root.is_dir();
        checks.insert("audit_dir".into(), json!(evidence_ok));
        details.insert(
            "audit_dir".into(),
            json!({"path": evidence_root.display().to_string()}),
        );
        if !evidence_ok {
            errors.push("audit_dir:unavailable".into());
        }

        let migration = self.migration_state();
        checks.insert("migration".into(), json!(migration.ok));
        if !migration.ok {
            errors.push(format!("migration:{}", migration.status));
        }
        details.insert(
            "migration".into(),
            serde_json::to_value(&migration).unwrap_or(Value::Null),
        );

        let ready = checks.values().all(|v| v.as_bool().unwrap_or(false));
        json!({
            "status": if ready { "ready" } else { "degraded" },
            "checks": Value::Object(checks),
            "details": Value::Object(details),
            "errors": errors,
        })
    }

    /// Decision/action counts over the newest audit ledger records.
    pub fn audit_summary(&self) -> Value {
        let records = self
            .audit
            .load_jsonl_records(Some(AUDIT_SUMMARY_LIMIT))
            .unwrap_or_default();
        let mut by_decision: Map<String, Value> = Map::new();
        let mut by_action: Map<String, Value> = Map::new();
        for record in &records {
            let decision = record
                .get("decision")
                .and_then(Value::as_str)
                .unwrap_or("UNKNOWN")
                .to_uppercase();
            let action = record
                .get("action")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            bump(&mut by_decision, &decision);
            bump(&mut by_action, &action);
        }
        let latest = records.last().and_then(|r| r.get("ts").cloned());
        json!({
            "total_recent": records.len(),
            "by_decision": Value::Object(by_decision),
            "by_action": Value::Object(by_action),
            "latest_ts": latest.unwrap_or(Value::Null),
        })
    }

    /// Aggregate over `evidence/releases/{release,rollback}_check_*.json`.
    /// Only `ok` / `status` are interpreted; everything else is opaque.
    pub fn gate_summary(&self) -> Value {
        let dir = self.evidence.releases_dir();
        let mut files: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
        if let Ok(read) = std::fs::read_dir(&dir) {
            for entry in read.flatten() {
                let path = entry.path();
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default();
                if !name.ends_with(".json") || !name.contains("_check_") {
                    continue;
                }
                let mtime = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
                files.push((mtime, path));
            }
        }
        if files.is_empty() {
            return json!({"total": 0, "release": {}, "rollback": {}});
        }
        files.sort_by(|a, b| b.0.cmp(&a.0));
        files.truncate(GATE_SUMMARY_LIMIT);

        let mut release = GateBucket::default();
        let mut rollback = GateBucket::default();
        let mut latest_paths = Vec::new();
        for (mtime, path) in &files {
            let Ok(bytes) = std::fs::read(path) else { continue };
            let Ok(payload) = serde_json::from_slice::<Value>(&bytes) else { continue };
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            let bucket = if name.starts_with("release_check_") {
                &mut release
            } else {
                &mut rollback
            };
            let ok = payload
                .get("ok")
                .and_then(Value::as_bool)
                .unwrap_or_else(|| {
                    matches!(
                        payload.get("status").and_then(Value::as_str),
                        Some("ok") | Some("passed")
                    )
                });
            bucket.record(path, *mtime, ok);
            latest_paths.push(path.display().to_string());
        }
        json!({
            "total": latest_paths.len(),
            "release": release.into_value(),
            "rollback": rollback.into_value(),
            "latest_paths": latest_paths.into_iter().take(5).collect::<Vec<_>>(),
        })
    }
}

#[derive(Default)]
struct GateBucket {
    total: u64,
    passed: u64,
    failed: u64,
    latest: Option<String>,
    updated_at: Option<String>,
}

impl GateBucket {
    fn record(&mut self, path: &std::path::Path, mtime: std::time::SystemTime, ok: bool) {
        self.total += 1;
        if ok {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
        if self.latest.is_none() {
            self.latest = Some(path.display().to_string());
            self.updated_at = Some(
                chrono::DateTime::<chrono::Utc>::from(mtime)
                    .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            );
        }
    }

    fn into_value(self) -> Value {
        json!({
            "total": self.total,
            "passed": self.passed,
            "failed": self.failed,
            "latest": self.latest,
            "updated_at": self.updated_at,
        })
    }
}

fn bump(map: &mut Map<String, Value>, key: &str) {
    let next = map.get(key).and_then(Value::as_u64).unwrap_or(0) + 1;
    map.insert(key.to_string(), json!(next));
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn collector(dir: &std::path::Path) -> SignalCollector {
        let kernel = Kernel::open(&dir.join("db.sqlite")).unwrap();
        let audit = Arc::new(AuditStore::new(
            dir,
            archillx_audit::DEFAULT_AUDIT_FILE_MAX_BYTES,
        ));
        SignalCollector::new(
            kernel,
            Arc::new(Telemetry::new()),
            audit,
            EvidenceStore::new(dir),
            MigrationSettings {
                dir: dir.join("migrations"),
                enabled: false,
                required: false,
            },
        )
    }

    #[test]
    fn readiness_is_ready_when_all_checks_pass() {
        let dir = tempfile::tempdir().unwrap();
        let collector = collector(dir.path());
        let readiness = collector.collect_readiness();
        assert_eq!(readiness["status"], json!("ready"));
        assert_eq!(readiness["checks"]["db"], json!(true));
        assert_eq!(readiness["checks"]["migration"], json!(true));
    }

    #[test]
    fn audit_summary_counts_by_decision_and_action() {
        let dir = tempfile::tempdir().unwrap();
        let collector = collector(dir.path());
        collector
            .audit
            .persist_audit(None, "deploy", "WARNED", 65, None, None)
            .unwrap();
        collector
            .audit
            .persist_audit(None, "deploy", "BLOCKED", 95, None, None)
            .unwrap();

        let summary = collector.audit_summary();
        assert_eq!(summary["total_recent"], json!(2));
        assert_eq!(summary["by_decision"]["WARNED"], json!(1));
        assert_eq!(summary["by_decision"]["BLOCKED"], json!(1));
        assert_eq!(summary["by_action"]["deploy"], json!(2));
        assert!(summary["latest_ts"].is_string());
    }

    #[test]
    fn gate_summary_buckets_release_and_rollback_checks() {
        let dir = tempfile::tempdir().unwrap();
        let collector = collector(dir.path());
        let releases = collector.evidence.releases_dir();
        std::fs::create_dir_all(&releases).unwrap();
        std::fs::write(
            releases.join("release_check_20260101.json"),
            serde_json::to_string(&json!({"ok": true})).unwrap(),
        )
        .unwrap();
        std::fs::write(
            releases.join("rollback_check_20260101.json"),
            serde_json::to_string(&json!({"status": "failed"})).unwrap(),
        )
        .unwrap();

        let summary = collector.gate_summary();
        assert_eq!(summary["release"]["passed"], json!(1));
        assert_eq!(summary["rollback"]["failed"], json!(1));
        assert_eq!(summary["total"], json!(2));
    }

    #[test]
    fn snapshot_freezes_all_sections() {
        let dir = tempfile::tempdir().unwrap();
        let collector = collector(dir.path());
        let snapshot = collector.collect();
        assert!(snapshot.readiness.is_object());
        assert!(snapshot.telemetry["aggregate"].is_object());
        assert!(snapshot.telemetry["history"]["windows"].is_object());
        assert!(snapshot.audit_summary.is_object());
        assert!(snapshot.gate_summary.is_object());
    }
}
