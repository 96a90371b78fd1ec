//! Durable evidence tree shared by the governance components.
//!
//! Evidence comes in two flavors: kind-partitioned JSON objects under
//! `<evidence_dir>/evolution/<kind>/<object_id>.json`, and append-only JSONL
//! ledgers (audit, entropy, recovery). Writers own their files exclusively;
//! readers treat everything as immutable.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;

pub mod jsonl;

pub use jsonl::{append_line, read_lines};

/// RFC 3339 UTC timestamp with millisecond precision and `Z` suffix.
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Mint an object id shaped `<prefix>_<YYYYmmdd_HHMMSS>_<hex8>`.
pub fn object_id(prefix: &str) -> String {
    let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", prefix, stamp, &suffix[..8])
}

#[derive(Clone, Debug)]
pub struct EvidenceStore {
    root: PathBuf,
}

impl EvidenceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for one evidence kind, e.g. `proposals` or `guards`.
    pub fn kind_dir(&self, kind: &str) -> PathBuf {
        self.root.join("evolution").join(kind)
    }

    /// Directory holding rendered patch artifacts for one proposal.
    pub fn artifact_dir(&self, proposal_id: &str) -> PathBuf {
        self.root.join("evolution").join("artifacts").join(proposal_id)
    }

    /// Directory scanned for release/rollback gate evidence.
    pub fn releases_dir(&self) -> PathBuf {
        self.root.join("releases")
    }

    pub fn recovery_dir(&self) -> PathBuf {
        self.root.join("recovery")
    }

    /// Path an object of `kind` lands at, whether or not it exists yet.
    pub fn object_path(&self, kind: &str, object_id: &str) -> PathBuf {
        self.kind_dir(kind).join(format!("{}.json", object_id))
    }

    /// Persist one evidence object as pretty JSON. Overwrites an existing
    /// object of the same id (artifact re-rendering relies on this).
    pub fn write_json(&self, kind: &str, object_id: &str, payload: &Value) -> Result<PathBuf> {
        let dir = self.kind_dir(kind);
        fs::create_dir_all(&dir)
            .with_context(|| format!("create evidence dir {}", dir.display()))?;
        let path = dir.join(format!("{}.json", object_id));
        let mut body = serde_json::to_string_pretty(payload)?;
        body.push('\n');
        fs::write(&path, body).with_context(|| format!("write evidence {}", path.display()))?;
        Ok(path)
    }

    pub fn load_json(&self, kind: &str, object_id: &str) -> Result<Option<Value>> {
        let path = self.kind_dir(kind).join(format!("{}.json", object_id));
        read_json_file(&path)
    }

    /// Most recent object of a kind, by mtime (filename breaks ties).
    pub fn latest_json(&self, kind: &str) -> Result<Option<Value>> {
        Ok(self.list_json(kind, 1)?.into_iter().next())
    }

    /// Newest-first listing of a kind, bounded by `limit`.
    pub fn list_json(&self, kind: &str, limit: usize) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        for path in self.list_paths(kind)?.into_iter().take(limit) {
            if let Some(value) = read_json_file(&path)? {
                out.push(value);
            }
        }
        Ok(out)
    }

    pub fn count_json(&self, kind: &str) -> Result<usize> {
        Ok(self.list_paths(kind)?.len())
    }

    fn list_paths(&self, kind: &str) -> Result<Vec<PathBuf>> {
        let dir = self.kind_dir(kind);
        let mut entries: Vec<(std::time::SystemTime, String, PathBuf)> = Vec::new();
        let read = match fs::read_dir(&dir) {
            Ok(read) => read,
            Err(_) => return Ok(Vec::new()),
        };
        for entry in read.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let mtime = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            entries.push((mtime, name, path));
        }
        entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        Ok(entries.into_iter().map(|(_, _, p)| p).collect())
    }
}

fn read_json_file(path: &Path) -> Result<Option<Value>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "skipping unparsable evidence file");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn write_then_latest_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = EvidenceStore::new(dir.path());
        let payload = json!({"proposal_id": "prop_1", "status": "generated"});
        store.write_json("proposals", "prop_1", &payload).unwrap();

        let latest = store.latest_json("proposals").unwrap().unwrap();
        assert_eq!(latest, payload);
    }

    #[test]
    fn list_is_newest_first_with_filename_tiebreak() {
        let dir = tempfile::tempdir().unwrap();
        let store = EvidenceStore::new(dir.path());
        store.write_json("plans", "plan_a", &json!({"n": 1})).unwrap();
        store.write_json("plans", "plan_b", &json!({"n": 2})).unwrap();

        // Force identical mtimes so the filename tiebreak decides.
        let dir_path = store.kind_dir("plans");
        let when = filetime_now();
        for name in ["plan_a.json", "plan_b.json"] {
            set_mtime(&dir_path.join(name), when);
        }

        let listed = store.list_json("plans", 10).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0]["n"], json!(2));
    }

    #[test]
    fn missing_kind_is_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = EvidenceStore::new(dir.path());
        assert!(store.latest_json("guards").unwrap().is_none());
        assert!(store.list_json("guards", 5).unwrap().is_empty());
    }

    #[test]
    fn object_ids_carry_prefix_and_are_unique() {
        let a = object_id("prop");
        let b = object_id("prop");
        assert!(a.starts_with("prop_"));
        assert_ne!(a, b);
    }

    fn filetime_now() -> std::time::SystemTime {
        std::time::SystemTime::now()
    }

    fn set_mtime(path: &Path, when: std::time::SystemTime) {
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_modified(when).unwrap();
    }
}
