//! Bounded repair sequence executed after a fenced takeover.
//!
//! Every side-effectful step re-checks leadership first; losing the fence
//! aborts the attempt. Each step lands one event in the recovery ledger.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use serde_json::json;
use thiserror::Error;

use crate::events::RecoveryLog;

const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(120);
const DEPS_TIMEOUT: Duration = Duration::from_secs(300);
const MIGRATE_TIMEOUT: Duration = Duration::from_secs(300);
const SCRIPT_TIMEOUT: Duration = Duration::from_secs(300);
const OUTPUT_TAIL_BYTES: usize = 3000;

#[derive(Debug, Clone)]
pub struct CmdOutcome {
    pub ok: bool,
    pub output: String,
}

pub trait CommandRunner: Send + Sync {
    fn run(&self, cmd: &[String], timeout: Duration) -> CmdOutcome;
}

/// OS process runner with a hard wall-clock deadline.
pub struct ProcessRunner {
    cwd: PathBuf,
}

impl ProcessRunner {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self { cwd: cwd.into() }
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, cmd: &[String], timeout: Duration) -> CmdOutcome {
        let Some((program, args)) = cmd.split_first() else {
            return CmdOutcome {
                ok: false,
                output: "empty command".into(),
            };
        };
        let mut child = match Command::new(program)
            .args(args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                return CmdOutcome {
                    ok: false,
                    output: format!("spawn failed: {err}"),
                }
            }
        };
        let out = child.stdout.take().map(|mut stream| {
            std::thread::spawn(move || {
                let mut buf = String::new();
                let _ = stream.read_to_string(&mut buf);
                buf
            })
        });
        let err = child.stderr.take().map(|mut stream| {
            std::thread::spawn(move || {
                let mut buf = String::new();
                let _ = stream.read_to_string(&mut buf);
                buf
            })
        });

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    break None;
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(50)),
                Err(_) => {
                    let _ = child.kill();
                    break None;
                }
            }
        };

        let mut output = out.and_then(|h| h.join().ok()).unwrap_or_default();
        if let Some(err_text) = err.and_then(|h| h.join().ok()) {
            if !err_text.is_empty() {
                if !output.is_empty() {
                    output.push('\n');
                }
                output.push_str(&err_text);
            }
        }
        if output.len() > OUTPUT_TAIL_BYTES {
            let mut start = output.len() - OUTPUT_TAIL_BYTES;
            while !output.is_char_boundary(start) {
                start += 1;
            }
            output = output[start..].to_string();
        }
        match status {
            Some(status) => CmdOutcome {
                ok: status.success(),
                output: output.trim().to_string(),
            },
            None => CmdOutcome {
                ok: false,
                output: format!("{}\ntimed out", output.trim()),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum RepairError {
    #[error("dependency install failed: {0}")]
    DepsInstallFailed(String),
    #[error("migration failed: {0}")]
    MigrationFailed(String),
    #[error("restart failed: {0}")]
    RestartFailed(String),
    #[error("readiness wait failed: {0}")]
    ReadyFailed(String),
    #[error("lost leadership before step {0}")]
    LostLeadership(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct RepairPlan {
    pub snapshot_cmds: Vec<Vec<String>>,
    pub deps_check: Vec<String>,
    pub deps_install: Vec<String>,
    pub offline_install_args: Vec<String>,
    pub migrate: Vec<String>,
    pub start_script: PathBuf,
    pub wait_ready_script: PathBuf,
}

impl Default for RepairPlan {
    fn default() -> Self {
        Self {
            snapshot_cmds: vec![
                vec!["cargo".into(), "--version".into()],
                vec!["rustc".into(), "--version".into()],
            ],
            deps_check: vec!["cargo".into(), "fetch".into(), "--locked".into()],
            deps_install: vec!["cargo".into(), "fetch".into()],
            offline_install_args: vec!["--offline".into()],
            migrate: vec!["archillx-cli".into(), "migrate".into()],
            start_script: PathBuf::from("scripts/start_server.sh"),
            wait_ready_script: PathBuf::from("scripts/wait_ready.sh"),
        }
    }
}

pub struct RepairEngine<'a> {
    runner: &'a dyn CommandRunner,
    log: &'a RecoveryLog,
    is_leader: &'a dyn Fn() -> bool,
    plan: RepairPlan,
    offline: bool,
}

impl<'a> RepairEngine<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        log: &'a RecoveryLog,
        is_leader: &'a dyn Fn() -> bool,
        plan: RepairPlan,
        offline: bool,
    ) -> Self {
        Self {
            runner,
            log,
            is_leader,
            plan,
            offline,
        }
    }

    fn fence_check(&self, step: &str) -> Result<(), RepairError> {
        if (self.is_leader)() {
            return Ok(());
        }
        let _ = self.log.append("repair_abort", json!({"step": step, "reason": "lost_leadership"}));
        Err(RepairError::LostLeadership(step.to_string()))
    }

    fn record(&self, step: &str, outcome: &CmdOutcome) {
        let _ = self.log.append(
            "repair_step",
            json!({"step": step, "ok": outcome.ok, "detail": outcome.output}),
        );
    }

    /// The bounded sequence: snapshot, dependency check/install, migration
    /// upgrade, conditional restart + readiness wait, handoff.
    pub fn run(&self) -> Result<(), RepairError> {
        // Environment snapshot with secrets redacted; diagnostics only.
        let env = redacted_env();
        let _ = self
            .log
            .append("repair_snapshot", json!({"env": env}));
        for cmd in &self.plan.snapshot_cmds {
            let outcome = self.runner.run(cmd, SNAPSHOT_TIMEOUT);
            self.record("snapshot", &outcome);
        }

        let check = self.runner.run(&self.plan.deps_check, DEPS_TIMEOUT);
        self.record("deps_check", &check);
        if !check.ok {
            self.fence_check("deps_install")?;
            let mut install = self.plan.deps_install.clone();
            if self.offline {
                install.extend(self.plan.offline_install_args.iter().cloned());
            }
            let outcome = self.runner.run(&install, DEPS_TIMEOUT);
            self.record("deps_install", &outcome);
            if !outcome.ok {
                return Err(RepairError::DepsInstallFailed(outcome.output));
            }
        }

        self.fence_check("migrate")?;
        let outcome = self.runner.run(&self.plan.migrate, MIGRATE_TIMEOUT);
        self.record("migrate", &outcome);
        if !outcome.ok {
            return Err(RepairError::MigrationFailed(outcome.output));
        }

        if self.plan.start_script.exists() {
            self.fence_check("restart")?;
            let cmd = vec![self.plan.start_script.display().to_string()];
            let outcome = self.runner.run(&cmd, SCRIPT_TIMEOUT);
            self.record("restart", &outcome);
            if !outcome.ok {
                return Err(RepairError::RestartFailed(outcome.output));
            }
        }

        if self.plan.wait_ready_script.exists() {
            self.fence_check("wait_ready")?;
            let cmd = vec![self.plan.wait_ready_script.display().to_string()];
            let outcome = self.runner.run(&cmd, SCRIPT_TIMEOUT);
            self.record("wait_ready", &outcome);
            if !outcome.ok {
                return Err(RepairError::ReadyFailed(outcome.output));
            }
        }

        self.log
            .write_handoff("ready_restored")
            .map_err(RepairError::Other)?;
        let _ = self.log.append("handoff", json!({"reason": "ready_restored"}));
        Ok(())
    }
}

fn redacted_env() -> BTreeMap<String, String> {
    let sensitive = ["SECRET", "TOKEN", "PASSWORD", "PASS", "KEY", "CREDENTIAL"];
    std::env::vars()
        .map(|(name, value)| {
            let upper = name.to_uppercase();
            if sensitive.iter().any(|marker| upper.contains(marker)) {
                (name, "<redacted>".to_string())
            } else {
                (name, value)
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    pub(crate) struct ScriptedRunner {
        pub fail_markers: Vec<String>,
        pub calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        pub(crate) fn passing() -> Self {
            Self {
                fail_markers: Vec::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing_on(marker: &str) -> Self {
            Self {
                fail_markers: vec![marker.to_string()],
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, cmd: &[String], _timeout: Duration) -> CmdOutcome {
            let joined = cmd.join(" ");
            self.calls.lock().unwrap().push(joined.clone());
            let fail = self.fail_markers.iter().any(|m| joined.contains(m));
            CmdOutcome {
                ok: !fail,
                output: if fail { "simulated failure".into() } else { "ok".into() },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedRunner;
    use super::*;

    fn always_leader() -> bool {
        true
    }

    fn never_leader() -> bool {
        false
    }

    #[test]
    fn passing_sequence_writes_handoff_and_events() {
        let dir = tempfile::tempdir().unwrap();
        let log = RecoveryLog::new(dir.path());
        let runner = ScriptedRunner::passing();
        let leader: &dyn Fn() -> bool = &always_leader;
        let engine = RepairEngine::new(&runner, &log, leader, RepairPlan::default(), false);

        engine.run().unwrap();

        assert!(log.handoff_path().exists());
        let events = log.read(None).unwrap();
        let steps: Vec<&str> = events
            .iter()
            .filter_map(|e| e["step"].as_str())
            .collect();
        assert!(steps.contains(&"deps_check"));
        assert!(steps.contains(&"migrate"));
        assert_eq!(events.last().unwrap()["event"], serde_json::json!("handoff"));
    }

    #[test]
    fn failed_migration_aborts_with_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let log = RecoveryLog::new(dir.path());
        let runner = ScriptedRunner::failing_on("migrate");
        let leader: &dyn Fn() -> bool = &always_leader;
        let engine = RepairEngine::new(&runner, &log, leader, RepairPlan::default(), false);

        let err = engine.run().unwrap_err();
        assert!(matches!(err, RepairError::MigrationFailed(_)));
        assert!(!log.handoff_path().exists());
    }

    #[test]
    fn deps_install_runs_only_when_check_fails_and_respects_offline() {
        let dir = tempfile::tempdir().unwrap();
        let log = RecoveryLog::new(dir.path());
        let runner = ScriptedRunner::failing_on("--locked");
        let leader: &dyn Fn() -> bool = &always_leader;
        let engine = RepairEngine::new(&runner, &log, leader, RepairPlan::default(), true);

        engine.run().unwrap();
        let calls = runner.calls.lock().unwrap();
        assert!(calls.iter().any(|c| c == "cargo fetch --offline"));
    }

    #[test]
    fn lost_leadership_blocks_side_effect_steps() {
        let dir = tempfile::tempdir().unwrap();
        let log = RecoveryLog::new(dir.path());
        let runner = ScriptedRunner::passing();
        let leader: &dyn Fn() -> bool = &never_leader;
        let engine = RepairEngine::new(&runner, &log, leader, RepairPlan::default(), false);

        let err = engine.run().unwrap_err();
        assert!(matches!(err, RepairError::LostLeadership(_)));
        // The migration command must never have run.
        let calls = runner.calls.lock().unwrap();
        assert!(!calls.iter().any(|c| c.contains("migrate")));
        let events = log.read(None).unwrap();
        assert!(events
            .iter()
            .any(|e| e["event"] == serde_json::json!("repair_abort")));
    }
}
