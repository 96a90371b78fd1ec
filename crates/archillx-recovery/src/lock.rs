//! Fenced takeover locks. Exactly one supervisor instance may hold the lock
//! while repairing; the monotonic fencing token lets repair steps verify
//! leadership before every side effect.

use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Context;
use fs2::FileExt;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct LockHandle {
    pub owner: String,
    pub token: u64,
    pub resource: String,
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock busy: {0}")]
    Busy(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub trait LockBackend: Send + Sync {
    fn acquire(&self, owner: &str) -> Result<LockHandle, LockError>;
    fn is_leader(&self, handle: &LockHandle) -> bool;
    fn release(&self, handle: &LockHandle);
}

/// `flock`-based backend with a sidecar JSON carrying owner + fencing token.
pub struct FileLockBackend {
    path: PathBuf,
    held: Mutex<Option<(u64, File)>>,
}

impl FileLockBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            held: Mutex::new(None),
        }
    }

    fn sidecar_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "takeover.lock".into());
        name.push_str(".owner.json");
        self.path.with_file_name(name)
    }

    fn sidecar_token(&self) -> Option<u64> {
        let bytes = std::fs::read(self.sidecar_path()).ok()?;
        let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
        value.get("token").and_then(|t| t.as_u64())
    }
}

impl LockBackend for FileLockBackend {
    fn acquire(&self, owner: &str) -> Result<LockHandle, LockError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create lock dir {}", parent.display()))
                .map_err(LockError::Other)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .with_context(|| format!("open lock file {}", self.path.display()))
            .map_err(LockError::Other)?;
        if file.try_lock_exclusive().is_err() {
            return Err(LockError::Busy(self.path.display().to_string()));
        }

        let token = self.sidecar_token().unwrap_or(0) + 1;
        let sidecar = json!({
            "owner": owner,
            "token": token,
            "acquired_at": archillx_evidence::now_iso(),
        });
        std::fs::write(
            self.sidecar_path(),
            format!("{}\n", serde_json::to_string_pretty(&sidecar).unwrap_or_default()),
        )
        .with_context(|| format!("write lock sidecar {}", self.sidecar_path().display()))
        .map_err(LockError::Other)?;

        *self.held.lock().expect("lock state") = Some((token, file));
        Ok(LockHandle {
            owner: owner.to_string(),
            token,
            resource: self.path.display().to_string(),
        })
    }

    fn is_leader(&self, handle: &LockHandle) -> bool {
        let held = self.held.lock().expect("lock state");
        let holding = matches!(&*held, Some((token, _)) if *token == handle.token);
        holding && self.sidecar_token() == Some(handle.token)
    }

    fn release(&self, handle: &LockHandle) {
        let mut held = self.held.lock().expect("lock state");
        if let Some((token, file)) = held.take() {
            if token != handle.token {
                *held = Some((token, file));
                return;
            }
            let _ = fs2::FileExt::unlock(&file);
        }
    }
}

/// Redis backend: `INCR <key>:fence_seq` mints the token, `SET NX EX` takes
/// the lock, `<key>:fence_latest` carries the current leader's token.
pub struct RedisLockBackend {
    url: String,
    key: String,
    ttl_s: u64,
}

impl RedisLockBackend {
    pub fn new(url: impl Into<String>, key: impl Into<String>, ttl_s: u64) -> Self {
        Self {
            url: url.into(),
            key: key.into(),
            ttl_s: ttl_s.max(1),
        }
    }

    fn connection(&self) -> anyhow::Result<redis::Connection> {
        let client = redis::Client::open(self.url.as_str()).context("open redis client")?;
        client.get_connection().context("connect to redis")
    }
}

impl LockBackend for RedisLockBackend {
    fn acquire(&self, owner: &str) -> Result<LockHandle, LockError> {
        let mut conn = self.connection().map_err(LockError::Other)?;
        let token: u64 = redis::cmd("INCR")
            .arg(format!("{}:fence_seq", self.key))
            .query(&mut conn)
            .context("mint fencing token")
            .map_err(LockError::Other)?;
        let body = json!({"owner": owner, "token": token}).to_string();
        let set: Option<String> = redis::cmd("SET")
            .arg(&self.key)
            .arg(&body)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_s)
            .query(&mut conn)
            .context("take redis lock")
            .map_err(LockError::Other)?;
        if set.is_none() {
            return Err(LockError::Busy(self.key.clone()));
        }
        let _: () = redis::cmd("SET")
            .arg(format!("{}:fence_latest", self.key))
            .arg(token)
            .query(&mut conn)
            .context("record fence_latest")
            .map_err(LockError::Other)?;
        Ok(LockHandle {
            owner: owner.to_string(),
            token,
            resource: self.key.clone(),
        })
    }

    fn is_leader(&self, handle: &LockHandle) -> bool {
        let Ok(mut conn) = self.connection() else {
            return false;
        };
        let latest: Option<u64> = redis::cmd("GET")
            .arg(format!("{}:fence_latest", self.key))
            .query(&mut conn)
            .ok()
            .flatten();
        latest == Some(handle.token)
    }

    fn release(&self, handle: &LockHandle) {
        let Ok(mut conn) = self.connection() else {
            return;
        };
        // Only delete the lock if it still belongs to this token.
        let current: Option<String> = redis::cmd("GET")
            .arg(&self.key)
            .query(&mut conn)
            .ok()
            .flatten();
        let ours = current
            .and_then(|body| serde_json::from_str::<serde_json::Value>(&body).ok())
            .and_then(|v| v.get("token").and_then(|t| t.as_u64()))
            == Some(handle.token);
        if ours {
            let _: Result<(), _> = redis::cmd("DEL").arg(&self.key).query(&mut conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_lock_acquires_and_blocks_second_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("takeover.lock");
        let first = FileLockBackend::new(&path);
        let second = FileLockBackend::new(&path);

        let handle = first.acquire("supervisor-a").unwrap();
        assert!(first.is_leader(&handle));

        match second.acquire("supervisor-b") {
            Err(LockError::Busy(_)) => {}
            other => panic!("expected busy, got {other:?}"),
        }

        first.release(&handle);
        assert!(!first.is_leader(&handle));
        let next = second.acquire("supervisor-b").unwrap();
        assert_eq!(next.token, handle.token + 1, "fencing token is monotonic");
    }

    #[test]
    fn stale_handle_is_not_leader_after_new_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("takeover.lock");
        let backend = FileLockBackend::new(&path);

        let old = backend.acquire("supervisor-a").unwrap();
        backend.release(&old);
        let new = backend.acquire("supervisor-a").unwrap();

        assert!(!backend.is_leader(&old), "superseded token loses leadership");
        assert!(backend.is_leader(&new));
    }

    #[test]
    fn sidecar_records_owner_and_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("takeover.lock");
        let backend = FileLockBackend::new(&path);
        let handle = backend.acquire("supervisor-a").unwrap();

        let sidecar: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("takeover.lock.owner.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(sidecar["owner"], json!("supervisor-a"));
        assert_eq!(sidecar["token"], json!(handle.token));
    }
}
