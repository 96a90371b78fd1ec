//! Schema revision probe: required head from the migrations directory,
//! current from the single-row `schema_version` table.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;

use crate::Kernel;

#[derive(Debug, Clone, Serialize)]
pub struct MigrationState {
    pub enabled: bool,
    pub required: bool,
    pub head: Option<String>,
    pub current: Option<String>,
    pub status: String, // disabled|head|behind|unversioned|unknown
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Revision = the filename segment before the first `_`; the head is the
/// lexicographically greatest revision present.
pub fn head_revision(dir: &Path) -> Option<String> {
    migration_files(dir)
        .ok()?
        .into_iter()
        .map(|(rev, _)| rev)
        .max()
}

pub(crate) fn migration_files(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut out = Vec::new();
    let read = match std::fs::read_dir(dir) {
        Ok(read) => read,
        Err(_) => return Ok(out),
    };
    for entry in read.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("sql") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let revision = stem.split('_').next().unwrap_or(stem);
        if revision.is_empty() {
            continue;
        }
        out.push((revision.to_string(), path));
    }
    Ok(out)
}

pub fn migration_state(
    kernel: &Kernel,
    migrations_dir: &Path,
    enabled: bool,
    required: bool,
) -> MigrationState {
    let head = head_revision(migrations_dir);
    let mut state = MigrationState {
        enabled,
        required,
        head: head.clone(),
        current: None,
        status: if enabled { "unknown" } else { "disabled" }.to_string(),
        ok: !enabled,
        error: None,
    };
    if !enabled {
        return state;
    }

    let current = match kernel.current_revision() {
        Ok(current) => current,
        Err(err) => {
            state.error = Some(err.to_string());
            state.ok = !required;
            return state;
        }
    };

    state.current = current.clone();
    match (head, current) {
        (Some(head), Some(current)) if head == current => {
            state.status = "head".into();
            state.ok = true;
        }
        (_, Some(_)) => {
            state.status = "behind".into();
            state.ok = !required;
        }
        (_, None) => {
            state.status = "unversioned".into();
            state.ok = !required;
        }
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, Kernel, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let kernel = Kernel::open(&dir.path().join("db.sqlite")).unwrap();
        let migrations = dir.path().join("migrations");
        std::fs::create_dir_all(&migrations).unwrap();
        std::fs::write(
            migrations.join("20260301000001_initial.sql"),
            "SELECT 1;",
        )
        .unwrap();
        std::fs::write(
            migrations.join("20260301000002_more.sql"),
            "SELECT 1;",
        )
        .unwrap();
        (dir, kernel, migrations)
    }

    #[test]
    fn disabled_probe_is_ok() {
        let (_dir, kernel, migrations) = setup();
        let state = migration_state(&kernel, &migrations, false, false);
        assert_eq!(state.status, "disabled");
        assert!(state.ok);
    }

    #[test]
    fn unversioned_then_behind_then_head() {
        let (_dir, kernel, migrations) = setup();

        let state = migration_state(&kernel, &migrations, true, true);
        assert_eq!(state.status, "unversioned");
        assert!(!state.ok);

        kernel.set_revision("20260301000001").unwrap();
        let state = migration_state(&kernel, &migrations, true, false);
        assert_eq!(state.status, "behind");
        assert!(state.ok, "behind is acceptable when head is not required");

        kernel.set_revision("20260301000002").unwrap();
        let state = migration_state(&kernel, &migrations, true, true);
        assert_eq!(state.status, "head");
        assert!(state.ok);
    }

    #[test]
    fn head_revision_is_lexicographic_max() {
        let (_dir, _kernel, migrations) = setup();
        assert_eq!(
            head_revision(&migrations).as_deref(),
            Some("20260301000002")
        );
    }
}
