//! Facade over the pipeline: persists every stage as evidence, keeps the
//! cross-references (inspection → plan → proposal → guard/baseline/action)
//! as ids, and serializes state transitions per proposal.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde_json::{json, Value};
use thiserror::Error;

use archillx_evidence::EvidenceStore;
use archillx_telemetry::Telemetry;

use crate::approval::{apply_transition, ApprovalVerb, TransitionError};
use crate::artifacts::render_patch_artifacts;
use crate::baseline::{compare_points, point_from_snapshot};
use crate::exec::CommandRunner;
use crate::guard::run_guard;
use crate::inspector::build_report;
use crate::planner;
use crate::proposer::build_proposal;
use crate::schemas::{
    ApprovalAction, BaselineCompare, CheckStatus, GuardMode, GuardRun, InspectionReport, Plan,
    Proposal, ProposalStatus,
};
use crate::signals::SignalCollector;

#[derive(Debug, Error)]
pub enum EvolutionError {
    #[error("evidence missing: {0}")]
    EvidenceMissing(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for EvolutionError {
    fn from(err: serde_json::Error) -> Self {
        EvolutionError::Other(err.into())
    }
}

pub struct EvolutionService {
    evidence: EvidenceStore,
    collector: SignalCollector,
    telemetry: Arc<Telemetry>,
    runner: Arc<dyn CommandRunner>,
    project_root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EvolutionService {
    pub fn new(
        evidence: EvidenceStore,
        collector: SignalCollector,
        telemetry: Arc<Telemetry>,
        runner: Arc<dyn CommandRunner>,
        project_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            evidence,
            collector,
            telemetry,
            runner,
            project_root: project_root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn evidence(&self) -> &EvidenceStore {
        &self.evidence
    }

    pub fn collector(&self) -> &SignalCollector {
        &self.collector
    }

    fn lock_for(&self, proposal_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("proposal lock table");
        locks
            .entry(proposal_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // ---- inspection / plan ---------------------------------------------

    pub fn run_inspection(&self) -> Result<InspectionReport> {
        let snapshot = self.collector.collect();
        let mut report = build_report(snapshot);
        let path = self.evidence.write_json(
            "inspections",
            &report.inspection_id,
            &serde_json::to_value(&report)?,
        )?;
        report.evidence_path = Some(path.display().to_string());
        self.telemetry.incr("evolution_inspections_total");
        Ok(report)
    }

    pub fn latest_inspection(&self) -> Result<Option<InspectionReport>> {
        Ok(self
            .evidence
            .latest_json("inspections")?
            .and_then(|value| serde_json::from_value(value).ok()))
    }

    pub fn load_inspection(&self, inspection_id: &str) -> Result<Option<InspectionReport>> {
        Ok(self
            .evidence
            .load_json("inspections", inspection_id)?
            .and_then(|value| serde_json::from_value(value).ok()))
    }

    pub fn build_plan(&self, report: Option<&InspectionReport>) -> Result<Plan> {
        let owned;
        let report = match report {
            Some(report) => report,
            None => {
                owned = match self.latest_inspection()? {
                    Some(latest) => latest,
                    None => self.run_inspection()?,
                };
                &owned
            }
        };
        let mut plan = planner::build_plan(report);
        let path =
            self.evidence
                .write_json("plans", &plan.plan_id, &serde_json::to_value(&plan)?)?;
        plan.evidence_path = Some(path.display().to_string());
        Ok(plan)
    }

    pub fn latest_plan(&self) -> Result<Option<Plan>> {
        Ok(self
            .evidence
            .latest_json("plans")?
            .and_then(|value| serde_json::from_value(value).ok()))
    }

    // ---- proposals ------------------------------------------------------

    pub fn generate_proposal(&self, plan: Option<&Plan>, item_index: usize) -> Result<Proposal> {
        let owned;
        let plan = match plan {
            Some(plan) => plan,
            None => {
                owned = match self.latest_plan()? {
                    Some(latest) => latest,
                    None => self.build_plan(None)?,
                };
                &owned
            }
        };
        let mut proposal = build_proposal(plan, item_index)?;
        self.save_proposal(&mut proposal)?;
        let artifacts = render_patch_artifacts(&self.evidence, &self.project_root, &proposal)?;
        proposal.artifact_paths = Some(artifacts);
        self.save_proposal(&mut proposal)?;
        self.telemetry.incr("evolution_proposals_generated_total");
        Ok(proposal)
    }

    pub fn load_proposal(&self, proposal_id: &str) -> Result<Option<Proposal>> {
        Ok(self
            .evidence
            .load_json("proposals", proposal_id)?
            .and_then(|value| serde_json::from_value(value).ok()))
    }

    pub fn latest_proposal(&self) -> Result<Option<Proposal>> {
        Ok(self
            .evidence
            .latest_json("proposals")?
            .and_then(|value| serde_json::from_value(value).ok()))
    }

    fn save_proposal(&self, proposal: &mut Proposal) -> Result<()> {
        proposal.evidence_path = Some(
            self.evidence
                .object_path("proposals", &proposal.proposal_id)
                .display()
                .to_string(),
        );
        self.evidence.write_json(
            "proposals",
            &proposal.proposal_id,
            &serde_json::to_value(&*proposal)?,
        )?;
        Ok(())
    }

    fn require_proposal(&self, proposal_id: Option<&str>) -> Result<Proposal, EvolutionError> {
        let proposal = match proposal_id {
            Some(id) => self.load_proposal(id).map_err(EvolutionError::Other)?,
            None => self.latest_proposal().map_err(EvolutionError::Other)?,
        };
        proposal.ok_or_else(|| {
            EvolutionError::EvidenceMissing(format!(
                "proposal {}",
                proposal_id.unwrap_or("<latest>")
            ))
        })
    }

    // ---- guard / baseline ----------------------------------------------

    pub fn run_guard(
        &self,
        proposal_id: Option<&str>,
        mode: GuardMode,
    ) -> Result<GuardRun, EvolutionError> {
        let resolved_id = self.require_proposal(proposal_id)?.proposal_id;
        let lock = self.lock_for(&resolved_id);
        let _guard = lock.lock().expect("proposal transition lock");
        // Reload under the lock so concurrent transitions cannot interleave
        // between our read and the status write below.
        let mut proposal = self.require_proposal(Some(&resolved_id))?;

        let mut run = run_guard(self.runner.as_ref(), &proposal.proposal_id, mode);
        let path = self
            .evidence
            .write_json("guards", &run.guard_id, &serde_json::to_value(&run)?)
            .context("persist guard run")?;
        run.evidence_path = Some(path.display().to_string());

        proposal.last_guard_id = Some(run.guard_id.clone());
        proposal.status = if run.status == CheckStatus::Passed {
            ProposalStatus::GuardPassed
        } else {
            ProposalStatus::GuardFailed
        };
        self.save_proposal(&mut proposal)?;
        self.telemetry.incr("evolution_guard_runs_total");
        Ok(run)
    }

    pub fn run_baseline(
        &self,
        proposal_id: Option<&str>,
    ) -> Result<BaselineCompare, EvolutionError> {
        let resolved_id = self.require_proposal(proposal_id)?.proposal_id;
        let lock = self.lock_for(&resolved_id);
        let _guard = lock.lock().expect("proposal transition lock");
        let mut proposal = self.require_proposal(Some(&resolved_id))?;
        let inspection = self
            .load_inspection(&proposal.inspection_id)
            .map_err(EvolutionError::Other)?
            .ok_or_else(|| {
                EvolutionError::EvidenceMissing(format!("inspection {}", proposal.inspection_id))
            })?;

        let before = point_from_snapshot(&inspection.signal_snapshot);
        let after = point_from_snapshot(&self.collector.collect());
        let mut compare = compare_points(
            &proposal.proposal_id,
            &proposal.inspection_id,
            before,
            after,
        );
        let path = self
            .evidence
            .write_json("baselines", &compare.baseline_id, &serde_json::to_value(&compare)?)
            .context("persist baseline compare")?;
        compare.evidence_path = Some(path.display().to_string());

        proposal.last_baseline_id = Some(compare.baseline_id.clone());
        self.save_proposal(&mut proposal)?;
        Ok(compare)
    }

    // ---- approval state machine ----------------------------------------

    pub fn approve(
        &self,
        proposal_id: &str,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<(Proposal, ApprovalAction), EvolutionError> {
        self.transition(proposal_id, ApprovalVerb::Approve, actor, reason)
    }

    pub fn reject(
        &self,
        proposal_id: &str,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<(Proposal, ApprovalAction), EvolutionError> {
        self.transition(proposal_id, ApprovalVerb::Reject, actor, reason)
    }

    pub fn apply(
        &self,
        proposal_id: &str,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<(Proposal, ApprovalAction), EvolutionError> {
        self.transition(proposal_id, ApprovalVerb::Apply, actor, reason)
    }

    pub fn rollback(
        &self,
        proposal_id: &str,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<(Proposal, ApprovalAction), EvolutionError> {
        self.transition(proposal_id, ApprovalVerb::Rollback, actor, reason)
    }

    fn transition(
        &self,
        proposal_id: &str,
        verb: ApprovalVerb,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<(Proposal, ApprovalAction), EvolutionError> {
        let lock = self.lock_for(proposal_id);
        let _guard = lock.lock().expect("proposal transition lock");

        let mut proposal = self.require_proposal(Some(proposal_id))?;
        let action = apply_transition(&mut proposal, verb, actor, reason)?;
        self.evidence
            .write_json("actions", &action.action_id, &serde_json::to_value(&action)?)
            .context("persist approval action")?;
        self.save_proposal(&mut proposal)?;
        self.telemetry.incr("evolution_actions_total");
        tracing::info!(
            proposal = %proposal.proposal_id,
            action = %action.action,
            actor,
            from = %action.from_status,
            to = %action.to_status,
            "proposal transition"
        );
        Ok((proposal, action))
    }

    // ---- listings / status ---------------------------------------------

    pub fn list(&self, kind: &str, limit: usize) -> Result<Vec<Value>> {
        self.evidence.list_json(kind, limit)
    }

    pub fn status_summary(&self) -> Result<Value> {
        let proposal = self.evidence.latest_json("proposals")?;
        let action = self.evidence.latest_json("actions")?;
        let inspection = self.evidence.latest_json("inspections")?;
        let mut counts = serde_json::Map::new();
        for kind in [
            "inspections",
            "plans",
            "proposals",
            "guards",
            "baselines",
            "actions",
            "schedules",
        ] {
            counts.insert(kind.into(), json!(self.evidence.count_json(kind)?));
        }
        Ok(json!({
            "proposal": proposal,
            "action": action,
            "inspection_status": inspection
                .as_ref()
                .and_then(|i| i.get("status").cloned())
                .unwrap_or(Value::Null),
            "counts": Value::Object(counts),
        }))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::guard::testing::ScriptedRunner;
    use crate::signals::{MigrationSettings, SignalCollector};
    use archillx_audit::AuditStore;
    use archillx_kernel::Kernel;

    pub(crate) fn service_with_runner(
        dir: &std::path::Path,
        runner: Arc<dyn CommandRunner>,
    ) -> EvolutionService {
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
            runner,
            dir,
        )
    }

    fn service(dir: &std::path::Path) -> EvolutionService {
        service_with_runner(dir, Arc::new(ScriptedRunner::passing()))
    }

    /// Make the next inspection produce findings by planting a failed gate
    /// check in the evidence tree.
    fn plant_gate_failure(dir: &std::path::Path) {
        let releases = dir.join("releases");
        std::fs::create_dir_all(&releases).unwrap();
        std::fs::write(
            releases.join("release_check_20260101.json"),
            serde_json::to_string(&json!({"ok": false})).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn inspection_and_plan_are_persisted_and_cross_linked() {
        let dir = tempfile::tempdir().unwrap();
        plant_gate_failure(dir.path());
        let service = service(dir.path());

        let report = service.run_inspection().unwrap();
        assert!(!report.findings.is_empty());
        assert!(report.evidence_path.is_some());

        let plan = service.build_plan(Some(&report)).unwrap();
        assert_eq!(plan.inspection_id, report.inspection_id);
        assert!(!plan.items.is_empty());

        // Round-trip through the evidence store.
        let loaded = service.latest_plan().unwrap().unwrap();
        assert_eq!(loaded.plan_id, plan.plan_id);
    }

    #[test]
    fn guard_pass_updates_proposal_status_and_link() {
        let dir = tempfile::tempdir().unwrap();
        plant_gate_failure(dir.path());
        let service = service(dir.path());

        let proposal = service.generate_proposal(None, 0).unwrap();
        assert_eq!(proposal.status, ProposalStatus::Generated);
        assert!(proposal.artifact_paths.is_some());

        let run = service
            .run_guard(Some(&proposal.proposal_id), GuardMode::Quick)
            .unwrap();
        assert_eq!(run.status, CheckStatus::Passed);

        let refreshed = service.load_proposal(&proposal.proposal_id).unwrap().unwrap();
        assert_eq!(refreshed.status, ProposalStatus::GuardPassed);
        assert_eq!(refreshed.last_guard_id.as_deref(), Some(run.guard_id.as_str()));
    }

    #[test]
    fn guard_failure_marks_proposal_guard_failed() {
        let dir = tempfile::tempdir().unwrap();
        plant_gate_failure(dir.path());
        let service =
            service_with_runner(dir.path(), Arc::new(ScriptedRunner::failing_on("smoke")));

        let proposal = service.generate_proposal(None, 0).unwrap();
        let run = service
            .run_guard(Some(&proposal.proposal_id), GuardMode::Quick)
            .unwrap();
        assert_eq!(run.status, CheckStatus::Failed);
        let refreshed = service.load_proposal(&proposal.proposal_id).unwrap().unwrap();
        assert_eq!(refreshed.status, ProposalStatus::GuardFailed);
    }

    #[test]
    fn baseline_links_back_and_detects_cleared_state() {
        let dir = tempfile::tempdir().unwrap();
        plant_gate_failure(dir.path());
        let service = service(dir.path());
        let proposal = service.generate_proposal(None, 0).unwrap();

        let compare = service.run_baseline(Some(&proposal.proposal_id)).unwrap();
        assert_eq!(compare.proposal_id, proposal.proposal_id);
        // The gate failure existed at inspection time and still exists: no
        // *increase*, hence no regression.
        assert!(!compare.regression_detected);

        let refreshed = service.load_proposal(&proposal.proposal_id).unwrap().unwrap();
        assert_eq!(
            refreshed.last_baseline_id.as_deref(),
            Some(compare.baseline_id.as_str())
        );
    }

    #[test]
    fn missing_proposal_is_evidence_missing() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let err = service.run_guard(Some("prop_nope"), GuardMode::Quick).unwrap_err();
        assert!(matches!(err, EvolutionError::EvidenceMissing(_)));
    }

    #[test]
    fn invalid_transition_surfaces_as_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        plant_gate_failure(dir.path());
        let service = service(dir.path());
        let proposal = service.generate_proposal(None, 0).unwrap();
        assert!(proposal.approval_required);

        let err = service
            .apply(&proposal.proposal_id, "alice", None)
            .unwrap_err();
        assert!(matches!(
            err,
            EvolutionError::Transition(TransitionError::InvalidTransition { .. })
        ));
    }
}
