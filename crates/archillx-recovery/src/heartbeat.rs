//! Primary-side heartbeat: a periodic liveness file the supervisor watches.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

pub struct HeartbeatWriter {
    handle: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

impl HeartbeatWriter {
    /// Spawn the writer loop; it emits one beat immediately and then every
    /// `interval`, and notices a stop signal between writes.
    pub fn spawn(path: PathBuf, version: String, interval: Duration) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut epoch: u64 = 0;
            loop {
                epoch += 1;
                if let Err(err) = write_beat(&path, epoch, &version) {
                    tracing::warn!(%err, path = %path.display(), "heartbeat write failed");
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = stopped.changed() => {
                        if *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        Self { handle, stop }
    }

    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}

fn write_beat(path: &Path, epoch: u64, version: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    let beat = json!({
        "ts": archillx_evidence::now_iso(),
        "epoch": now,
        "beat": epoch,
        "pid": std::process::id(),
        "version": version,
        "mode": "primary",
    });
    std::fs::write(path, format!("{}\n", serde_json::to_string(&beat)?))?;
    Ok(())
}

/// Age of the newest beat in seconds; `None` when the file is missing or
/// unparsable (both count as a stale heartbeat for the supervisor).
pub fn heartbeat_age_s(path: &Path) -> Option<f64> {
    let bytes = std::fs::read(path).ok()?;
    let beat: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let epoch = beat.get("epoch")?.as_f64()?;
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .ok()?
        .as_secs_f64();
    Some((now - epoch).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_beats_and_stops_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("heartbeat.json");
        let writer = HeartbeatWriter::spawn(
            path.clone(),
            "0.1.0-test".into(),
            Duration::from_millis(20),
        );
        tokio::time::sleep(Duration::from_millis(80)).await;
        writer.shutdown().await;

        let beat: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(beat["mode"], serde_json::json!("primary"));
        assert!(beat["beat"].as_u64().unwrap() >= 2, "beats keep flowing");
        assert_eq!(beat["version"], serde_json::json!("0.1.0-test"));

        let age = heartbeat_age_s(&path).unwrap();
        assert!(age < 5.0);
    }

    #[test]
    fn missing_heartbeat_reads_as_stale() {
        let dir = tempfile::tempdir().unwrap();
        assert!(heartbeat_age_s(&dir.path().join("absent.json")).is_none());
    }
}
