//! Append-only recovery event ledger under `<evidence_dir>/recovery/`.

use std::path::PathBuf;

use anyhow::Result;
use serde_json::{json, Value};

#[derive(Clone, Debug)]
pub struct RecoveryLog {
    dir: PathBuf,
}

impl RecoveryLog {
    pub fn new(evidence_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: evidence_dir.into().join("recovery"),
        }
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.dir.join("recovery.jsonl")
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join("archillx_recovery_state.json")
    }

    pub fn handoff_path(&self) -> PathBuf {
        self.dir.join("archillx_handoff.json")
    }

    /// Append one event; `fields` must be a JSON object.
    pub fn append(&self, event: &str, fields: Value) -> Result<()> {
        let mut record = json!({
            "ts": archillx_evidence::now_iso(),
            "event": event,
        });
        if let (Some(record_map), Value::Object(extra)) = (record.as_object_mut(), fields) {
            for (key, value) in extra {
                record_map.insert(key, value);
            }
        }
        archillx_evidence::jsonl::append_line(&self.ledger_path(), &record)
    }

    pub fn read(&self, limit: Option<usize>) -> Result<Vec<Value>> {
        archillx_evidence::jsonl::read_lines(&self.ledger_path(), limit)
    }

    pub fn write_state(&self, mode: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let payload = json!({"mode": mode, "ts": archillx_evidence::now_iso()});
        std::fs::write(
            self.state_path(),
            format!("{}\n", serde_json::to_string_pretty(&payload)?),
        )?;
        Ok(())
    }

    pub fn write_handoff(&self, reason: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let payload = json!({
            "from": "recovery",
            "to": "primary",
            "reason": reason,
            "ts": archillx_evidence::now_iso(),
        });
        std::fs::write(
            self.handoff_path(),
            format!("{}\n", serde_json::to_string_pretty(&payload)?),
        )?;
        Ok(())
    }
}
