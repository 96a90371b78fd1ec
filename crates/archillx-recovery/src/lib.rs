//! Recovery supervisor: detects primary failure via readiness probe +
//! heartbeat freshness, takes over under a fenced lock, runs the bounded
//! repair sequence, and hands control back.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

pub mod events;
pub mod heartbeat;
pub mod lock;
pub mod repair;

pub use events::RecoveryLog;
pub use heartbeat::{heartbeat_age_s, HeartbeatWriter, HEARTBEAT_INTERVAL};
pub use lock::{FileLockBackend, LockBackend, LockError, LockHandle, RedisLockBackend};
pub use repair::{CmdOutcome, CommandRunner, ProcessRunner, RepairEngine, RepairError, RepairPlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    Ready,
    ServerError,
    Unreachable,
}

pub trait ReadyProbe: Send + Sync {
    fn check(&self) -> ProbeStatus;
}

/// Blocking HTTP probe; 5xx and transport errors both count as failure.
pub struct HttpReadyProbe {
    url: String,
    client: reqwest::blocking::Client,
}

impl HttpReadyProbe {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

impl ReadyProbe for HttpReadyProbe {
    fn check(&self) -> ProbeStatus {
        match self.client.get(&self.url).send() {
            Ok(response) if response.status().is_server_error() => ProbeStatus::ServerError,
            Ok(_) => ProbeStatus::Ready,
            Err(_) => ProbeStatus::Unreachable,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub owner: String,
    pub heartbeat_path: PathBuf,
    pub heartbeat_ttl_s: f64,
    pub check_interval: Duration,
    pub force_takeover: bool,
    pub offline: bool,
    pub once: bool,
    pub repair_plan: RepairPlan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Repaired,
    NoActionNeeded,
    Failed,
}

impl RunOutcome {
    /// CLI exit code contract: 0 repaired, 1 nothing to do, 2 failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Repaired => 0,
            RunOutcome::NoActionNeeded => 1,
            RunOutcome::Failed => 2,
        }
    }
}

pub struct Supervisor {
    config: SupervisorConfig,
    probe: Box<dyn ReadyProbe>,
    backend: Box<dyn LockBackend>,
    runner: Arc<dyn CommandRunner>,
    log: RecoveryLog,
    stop: AtomicBool,
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        probe: Box<dyn ReadyProbe>,
        backend: Box<dyn LockBackend>,
        runner: Arc<dyn CommandRunner>,
        log: RecoveryLog,
    ) -> Self {
        Self {
            config,
            probe,
            backend,
            runner,
            log,
            stop: AtomicBool::new(false),
        }
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Need score: failed readiness probe +1, stale/missing heartbeat +1.
    /// Takeover happens at 2, or whenever forced.
    fn need_takeover(&self) -> (bool, u8) {
        let mut score = 0u8;
        let probe = self.probe.check();
        if probe != ProbeStatus::Ready {
            score += 1;
        }
        let age = heartbeat_age_s(&self.config.heartbeat_path);
        let heartbeat_fresh = matches!(age, Some(age) if age <= self.config.heartbeat_ttl_s);
        if !heartbeat_fresh {
            score += 1;
        }
        let need = self.config.force_takeover || score >= 2;
        let _ = self.log.append(
            "monitor_tick",
            json!({
                "probe": format!("{probe:?}"),
                "heartbeat_age_s": age,
                "need_score": score,
                "need": need,
            }),
        );
        (need, score)
    }

    fn attempt_takeover(&self) -> RunOutcome {
        let handle = match self.backend.acquire(&self.config.owner) {
            Ok(handle) => handle,
            Err(LockError::Busy(resource)) => {
                tracing::warn!(%resource, "takeover lock busy; another supervisor is active");
                let _ = self.log.append("lock_busy", json!({"resource": resource}));
                return RunOutcome::Failed;
            }
            Err(err) => {
                tracing::error!(%err, "lock acquisition failed");
                return RunOutcome::Failed;
            }
        };
        let _ = self.log.append(
            "takeover",
            json!({"owner": handle.owner, "token": handle.token, "resource": handle.resource}),
        );
        if let Err(err) = self.log.write_state("recovery") {
            tracing::warn!(%err, "failed to write recovery state file");
        }

        let backend = self.backend.as_ref();
        let fence_handle = handle.clone();
        let is_leader = move || backend.is_leader(&fence_handle);
        let engine = RepairEngine::new(
            self.runner.as_ref(),
            &self.log,
            &is_leader,
            self.config.repair_plan.clone(),
            self.config.offline,
        );
        let outcome = match engine.run() {
            Ok(()) => {
                let _ = self.log.append("repair_complete", json!({"token": handle.token}));
                RunOutcome::Repaired
            }
            Err(err) => {
                tracing::error!(%err, "repair attempt failed");
                let _ = self
                    .log
                    .append("repair_failed", json!({"error": err.to_string()}));
                RunOutcome::Failed
            }
        };
        self.backend.release(&handle);
        outcome
    }

    /// One monitoring pass: probe, score, and repair when needed.
    pub fn run_once(&self) -> RunOutcome {
        let (need, _score) = self.need_takeover();
        if !need {
            return RunOutcome::NoActionNeeded;
        }
        self.attempt_takeover()
    }

    /// Monitor until repaired (`once`) or stopped. Failed attempts re-enter
    /// the loop unless `once` is set.
    pub fn run(&self) -> RunOutcome {
        loop {
            let outcome = self.run_once();
            if self.config.once {
                return outcome;
            }
            if outcome == RunOutcome::Repaired {
                return outcome;
            }
            if self.stop.load(Ordering::SeqCst) {
                return outcome;
            }
            std::thread::sleep(self.config.check_interval);
        }
    }
}
