//! Upgrade guard: the fixed, ordered validation batch run against one
//! proposal before it may advance.

use std::time::Duration;

use crate::exec::CommandRunner;
use crate::schemas::{CheckStatus, GuardCheck, GuardMode, GuardRun};

const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(900);
const TEST_CHECK_TIMEOUT: Duration = Duration::from_secs(1200);
const MIGRATION_CHECK_TIMEOUT: Duration = Duration::from_secs(300);

fn cmd(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

/// The ordered check list. Quick mode targets the pipeline crates; full mode
/// sweeps the whole workspace.
fn check_plan(mode: GuardMode) -> Vec<(&'static str, Vec<String>, Duration)> {
    let tests = match mode {
        GuardMode::Quick => cmd(&[
            "cargo",
            "test",
            "--quiet",
            "-p",
            "archillx-evolution",
            "-p",
            "archillx-governor",
        ]),
        GuardMode::Full => cmd(&["cargo", "test", "--quiet", "--workspace"]),
    };
    vec![
        (
            "compile",
            cmd(&["cargo", "check", "--quiet", "--workspace"]),
            DEFAULT_CHECK_TIMEOUT,
        ),
        ("tests", tests, TEST_CHECK_TIMEOUT),
        ("smoke", cmd(&["scripts/smoke_check.sh"]), DEFAULT_CHECK_TIMEOUT),
        (
            "release_check",
            cmd(&["scripts/release_check.sh", "--json"]),
            TEST_CHECK_TIMEOUT,
        ),
        (
            "rollback_check",
            cmd(&["scripts/rollback_check.sh", "--json"]),
            TEST_CHECK_TIMEOUT,
        ),
        (
            "migration_check",
            cmd(&["scripts/check_migration.sh"]),
            MIGRATION_CHECK_TIMEOUT,
        ),
    ]
}

/// Run all checks, in order, against a proposal. A failing subprocess marks
/// its check failed; the run itself always completes and is persisted by the
/// caller.
pub fn run_guard(runner: &dyn CommandRunner, proposal_id: &str, mode: GuardMode) -> GuardRun {
    let mut checks = Vec::new();
    for (name, command, timeout) in check_plan(mode) {
        let outcome = runner.run(&command, timeout);
        let detail = if outcome.output.is_empty() {
            if outcome.ok { "ok" } else { "failed" }.to_string()
        } else {
            outcome.output
        };
        checks.push(GuardCheck {
            name: name.to_string(),
            status: if outcome.ok {
                CheckStatus::Passed
            } else {
                CheckStatus::Failed
            },
            detail,
            command: command.join(" "),
        });
    }
    let status = if checks.iter().all(|c| c.status == CheckStatus::Passed) {
        CheckStatus::Passed
    } else {
        CheckStatus::Failed
    };
    GuardRun {
        guard_id: archillx_evidence::object_id("guard"),
        created_at: archillx_evidence::now_iso(),
        proposal_id: proposal_id.to_string(),
        mode,
        status,
        checks,
        evidence_path: None,
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedRunner;
    use super::*;

    #[test]
    fn all_passing_checks_pass_the_run_in_order() {
        let runner = ScriptedRunner::passing();
        let run = run_guard(&runner, "prop_1", GuardMode::Quick);

        assert_eq!(run.status, CheckStatus::Passed);
        let names: Vec<_> = run.checks.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "compile",
                "tests",
                "smoke",
                "release_check",
                "rollback_check",
                "migration_check"
            ]
        );
        assert!(run.guard_id.starts_with("guard_"));
        assert_eq!(run.proposal_id, "prop_1");
    }

    #[test]
    fn one_failed_check_fails_the_run_but_keeps_all_checks() {
        let runner = ScriptedRunner::failing_on("rollback_check");
        let run = run_guard(&runner, "prop_1", GuardMode::Quick);

        assert_eq!(run.status, CheckStatus::Failed);
        assert_eq!(run.checks.len(), 6, "later checks still execute");
        let failed: Vec<_> = run
            .checks
            .iter()
            .filter(|c| c.status == CheckStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].name, "rollback_check");
        assert!(failed[0].detail.contains("simulated failure"));
    }

    #[test]
    fn full_mode_widens_the_test_sweep() {
        let runner = ScriptedRunner::passing();
        run_guard(&runner, "prop_1", GuardMode::Full);
        let calls = runner.calls.lock().unwrap();
        assert!(calls.iter().any(|c| c.contains("--workspace") && c.contains("test")));
    }
}
