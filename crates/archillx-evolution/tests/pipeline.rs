//! End-to-end pipeline flow: proposal lifecycle through guard, approval,
//! apply, and rollback, with every transition leaving evidence behind.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use archillx_audit::AuditStore;
use archillx_evidence::EvidenceStore;
use archillx_evolution::exec::{CmdOutcome, CommandRunner};
use archillx_evolution::{
    EvolutionError, EvolutionService, GuardMode, MigrationSettings, Plan, PlanItem, Priority,
    ProposalStatus, RiskLevel, SignalCollector, TransitionError,
};
use archillx_kernel::Kernel;
use archillx_telemetry::Telemetry;

struct PassingRunner;

impl CommandRunner for PassingRunner {
    fn run(&self, _cmd: &[String], _timeout: Duration) -> CmdOutcome {
        CmdOutcome {
            ok: true,
            output: "ok".into(),
        }
    }
}

fn service(dir: &std::path::Path) -> EvolutionService {
    let kernel = Kernel::open(&dir.join("db.sqlite")).unwrap();
    let telemetry = Arc::new(Telemetry::new());
    let audit = Arc::new(AuditStore::new(
        dir,
        archillx_audit::DEFAULT_AUDIT_FILE_MAX_BYTES,
    ));
    let collector = SignalCollector::new(
        kernel,
        telemetry.clone(),
        audit,
        EvidenceStore::new(dir),
        MigrationSettings {
            dir: dir.join("migrations"),
            enabled: false,
            required: false,
        },
    );
    EvolutionService::new(
        EvidenceStore::new(dir),
        collector,
        telemetry,
        Arc::new(PassingRunner),
        dir,
    )
}

fn review_plan() -> Plan {
    Plan {
        plan_id: "plan_s3".into(),
        created_at: archillx_evidence::now_iso(),
        inspection_id: "insp_s3".into(),
        items: vec![PlanItem {
            priority: Priority::P1,
            category: "stability".into(),
            title: "Investigate http: 5xx burst".into(),
            subject: "http".into(),
            expected_benefit: "fewer incidents".into(),
            suggested_scope: vec!["tests/foo.py".into(), "app/x.py".into()],
            requires_human_review: true,
            source_inspection_id: "insp_s3".into(),
        }],
        evidence_path: None,
    }
}

#[test]
fn proposal_walks_the_full_approval_state_machine() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());

    let proposal = service.generate_proposal(Some(&review_plan()), 0).unwrap();
    assert_eq!(proposal.risk.risk_score, 50);
    assert_eq!(proposal.risk.risk_level, RiskLevel::Medium);
    assert!(proposal.approval_required);

    // Applying before approval must fail and leave the proposal untouched.
    let err = service.apply(&proposal.proposal_id, "alice", None).unwrap_err();
    assert!(matches!(
        err,
        EvolutionError::Transition(TransitionError::InvalidTransition { .. })
    ));

    let guard = service
        .run_guard(Some(&proposal.proposal_id), GuardMode::Quick)
        .unwrap();
    assert_eq!(guard.checks.len(), 6);

    let (approved, action) = service
        .approve(&proposal.proposal_id, "alice", Some("reviewed"))
        .unwrap();
    assert_eq!(approved.status, ProposalStatus::Approved);
    assert_eq!(approved.approved_by.as_deref(), Some("alice"));
    assert_eq!(action.from_status, "guard_passed");
    assert_eq!(action.to_status, "approved");

    let (applied, action) = service
        .apply(&proposal.proposal_id, "bob", Some("rollout start"))
        .unwrap();
    assert_eq!(applied.status, ProposalStatus::Applied);
    assert_eq!(applied.applied_by.as_deref(), Some("bob"));
    assert_eq!(action.from_status, "approved");

    let (rolled, action) = service
        .rollback(&proposal.proposal_id, "ops", Some("post-check failed"))
        .unwrap();
    assert_eq!(rolled.status, ProposalStatus::RolledBack);
    assert_eq!(rolled.rolled_back_by.as_deref(), Some("ops"));
    assert_eq!(action.to_status, "rolled_back");

    // One immutable action record per transition.
    let actions = service.list("actions", 10).unwrap();
    assert_eq!(actions.len(), 3);

    // Terminal state: applying again is invalid.
    let err = service.apply(&proposal.proposal_id, "bob", None).unwrap_err();
    assert!(matches!(err, EvolutionError::Transition(_)));

    let status = service.status_summary().unwrap();
    assert_eq!(status["proposal"]["status"], json!("rolled_back"));
    assert_eq!(status["action"]["action"], json!("rollback"));
    assert_eq!(status["counts"]["actions"], json!(3));
}

#[test]
fn guard_evidence_round_trips_through_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    let proposal = service.generate_proposal(Some(&review_plan()), 0).unwrap();

    let run = service
        .run_guard(Some(&proposal.proposal_id), GuardMode::Quick)
        .unwrap();
    let stored = service.list("guards", 1).unwrap();
    assert_eq!(stored[0]["guard_id"], json!(run.guard_id));
    assert_eq!(stored[0]["proposal_id"], json!(proposal.proposal_id));
    assert_eq!(stored[0]["status"], json!("passed"));
}

#[test]
fn rejection_is_terminal_for_application() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    let proposal = service.generate_proposal(Some(&review_plan()), 0).unwrap();

    service
        .reject(&proposal.proposal_id, "alice", Some("not worth it"))
        .unwrap();
    let err = service.apply(&proposal.proposal_id, "bob", None).unwrap_err();
    assert!(matches!(err, EvolutionError::Transition(_)));
}
