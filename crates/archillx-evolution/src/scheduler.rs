//! Auto-scheduler: cron-paced cycles that inspect, plan, and push low-risk
//! proposals through guard/approve/baseline/apply under strict preconditions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use serde_json::{json, Value};

use archillx_kernel::Kernel;

use crate::cron::CronSchedule;
use crate::schemas::{CheckStatus, GuardMode, ProposalStatus, RiskLevel};
use crate::service::EvolutionService;

pub const SCHEDULE_NAME: &str = "evolution_auto_cycle";

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub enabled: bool,
    pub cron: String,
    pub generate_limit: usize,
    pub auto_guard_low_risk: bool,
    pub guard_mode: GuardMode,
    pub auto_approve_low_risk: bool,
    pub approve_requires_guard_pass: bool,
    pub auto_apply_low_risk: bool,
    pub apply_requires_guard_pass: bool,
    pub apply_requires_baseline_clear: bool,
    pub approve_actor: String,
    pub apply_actor: String,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            cron: "15 */6 * * *".into(),
            generate_limit: 3,
            auto_guard_low_risk: true,
            guard_mode: GuardMode::Quick,
            auto_approve_low_risk: false,
            approve_requires_guard_pass: true,
            auto_apply_low_risk: false,
            apply_requires_guard_pass: true,
            apply_requires_baseline_clear: true,
            approve_actor: "evolution-auto".into(),
            apply_actor: "evolution-auto".into(),
        }
    }
}

pub struct AutoScheduler {
    service: Arc<EvolutionService>,
    kernel: Kernel,
    settings: SchedulerSettings,
    schedule: CronSchedule,
    // One cycle in flight; overlapping ticks are skipped.
    running: AtomicBool,
    last_cycle: Mutex<Option<Value>>,
}

impl AutoScheduler {
    pub fn new(
        service: Arc<EvolutionService>,
        kernel: Kernel,
        settings: SchedulerSettings,
    ) -> Result<Self> {
        let schedule = CronSchedule::parse(&settings.cron)?;
        kernel.upsert_schedule(SCHEDULE_NAME, &settings.cron, settings.enabled)?;
        Ok(Self {
            service,
            kernel,
            settings,
            schedule,
            running: AtomicBool::new(false),
            last_cycle: Mutex::new(None),
        })
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn schedule(&self) -> &CronSchedule {
        &self.schedule
    }

    pub fn status(&self) -> Value {
        let next_run = self
            .schedule
            .next_after(chrono::Utc::now())
            .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true));
        json!({
            "enabled": self.settings.enabled,
            "cron": self.settings.cron,
            "generate_limit": self.settings.generate_limit,
            "auto_guard_low_risk": self.settings.auto_guard_low_risk,
            "guard_mode": self.settings.guard_mode,
            "auto_approve_low_risk": self.settings.auto_approve_low_risk,
            "auto_approve_requires_guard_pass": self.settings.approve_requires_guard_pass,
            "auto_apply_low_risk": self.settings.auto_apply_low_risk,
            "auto_apply_requires_guard_pass": self.settings.apply_requires_guard_pass,
            "auto_apply_requires_baseline_clear": self.settings.apply_requires_baseline_clear,
            "auto_approve_actor": self.settings.approve_actor,
            "auto_apply_actor": self.settings.apply_actor,
            "next_run": next_run,
            "last_cycle": self.last_cycle.lock().expect("last cycle").clone(),
        })
    }

    pub fn latest_cycle(&self) -> Result<Option<Value>> {
        if let Some(cycle) = self.service.evidence().latest_json("schedules")? {
            return Ok(Some(cycle));
        }
        Ok(self.last_cycle.lock().expect("last cycle").clone())
    }

    /// Fire a cycle if the schedule matches `now` and none is in flight.
    pub fn tick(&self, now: chrono::DateTime<chrono::Utc>) -> Result<Option<Value>> {
        if !self.settings.enabled || !self.schedule.matches(now) {
            return Ok(None);
        }
        match self.run_cycle(None) {
            Ok(cycle) => Ok(Some(cycle)),
            Err(err) if err.to_string().contains("already in flight") => {
                tracing::warn!("skipping overlapping scheduler tick");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// One full cycle: inspect, plan, then generate/guard/approve/apply up
    /// to the configured limit. Writes one ScheduleCycle evidence record.
    pub fn run_cycle(&self, limit: Option<usize>) -> Result<Value> {
        if self.running.swap(true, Ordering::SeqCst) {
            bail!("scheduler cycle already in flight");
        }
        let result = self.run_cycle_inner(limit);
        self.running.store(false, Ordering::SeqCst);
        result
    }

    fn run_cycle_inner(&self, limit: Option<usize>) -> Result<Value> {
        let limit = limit.unwrap_or(self.settings.generate_limit).max(1);
        let inspection = self.service.run_inspection()?;
        let plan = self.service.build_plan(Some(&inspection))?;

        let mut proposals: Vec<Value> = Vec::new();
        let generated = limit.min(plan.items.len());
        for idx in 0..generated {
            let proposal = self.service.generate_proposal(Some(&plan), idx)?;
            let mut entry = json!({
                "proposal_id": proposal.proposal_id,
                "title": proposal.title,
                "risk_level": proposal.risk.risk_level,
                "approval_required": proposal.approval_required,
                "status": proposal.status,
                "guard": Value::Null,
            });

            let low_risk_candidate =
                !proposal.approval_required && proposal.risk.auto_apply_allowed;
            debug_assert!(
                !low_risk_candidate || proposal.risk.risk_level == RiskLevel::Low
            );

            let mut guard_passed = false;
            if self.settings.auto_guard_low_risk && low_risk_candidate {
                let run = self
                    .service
                    .run_guard(Some(&proposal.proposal_id), self.settings.guard_mode)
                    .map_err(anyhow::Error::from)?;
                guard_passed = run.status == CheckStatus::Passed;
                entry["guard"] = json!({
                    "guard_id": run.guard_id,
                    "status": run.status,
                    "mode": run.mode,
                });
            }

            let mut refreshed = self
                .service
                .load_proposal(&proposal.proposal_id)?
                .unwrap_or(proposal);

            if self.settings.auto_approve_low_risk
                && !refreshed.approval_required
                && refreshed.risk.auto_apply_allowed
                && matches!(
                    refreshed.status,
                    ProposalStatus::Generated | ProposalStatus::GuardPassed
                )
                && (guard_passed || !self.settings.approve_requires_guard_pass)
            {
                let (approved, action) = self
                    .service
                    .approve(
                        &refreshed.proposal_id,
                        &self.settings.approve_actor,
                        Some("auto-approved low-risk proposal by scheduler"),
                    )
                    .map_err(anyhow::Error::from)?;
                entry["auto_approval"] = json!({
                    "action_id": action.action_id,
                    "actor": action.actor,
                    "from_status": action.from_status,
                    "to_status": action.to_status,
                });
                refreshed = approved;
            }

            if self.settings.auto_apply_low_risk
                && refreshed.risk.auto_apply_allowed
                && !refreshed.approval_required
                && refreshed.status == ProposalStatus::Approved
                && (guard_passed || !self.settings.apply_requires_guard_pass)
            {
                let baseline = self
                    .service
                    .run_baseline(Some(&refreshed.proposal_id))
                    .map_err(anyhow::Error::from)?;
                entry["baseline"] = json!({
                    "baseline_id": baseline.baseline_id,
                    "regression_detected": baseline.regression_detected,
                });
                if !baseline.regression_detected || !self.settings.apply_requires_baseline_clear {
                    let (applied, action) = self
                        .service
                        .apply(
                            &refreshed.proposal_id,
                            &self.settings.apply_actor,
                            Some("auto-applied low-risk proposal by scheduler after guard/baseline checks"),
                        )
                        .map_err(anyhow::Error::from)?;
                    entry["auto_apply"] = json!({
                        "action_id": action.action_id,
                        "actor": action.actor,
                        "from_status": action.from_status,
                        "to_status": action.to_status,
                    });
                    refreshed = applied;
                }
            }

            entry["status"] = serde_json::to_value(refreshed.status)?;
            proposals.push(entry);
        }

        let cycle_id = archillx_evidence::object_id("cycle");
        let mut payload = json!({
            "cycle_id": cycle_id,
            "created_at": archillx_evidence::now_iso(),
            "inspection_id": inspection.inspection_id,
            "plan_id": plan.plan_id,
            "proposal_count": proposals.len(),
            "generated_limit": limit,
            "auto_guard_low_risk": self.settings.auto_guard_low_risk,
            "auto_approve_low_risk": self.settings.auto_approve_low_risk,
            "auto_approve_requires_guard_pass": self.settings.approve_requires_guard_pass,
            "auto_apply_low_risk": self.settings.auto_apply_low_risk,
            "auto_apply_requires_guard_pass": self.settings.apply_requires_guard_pass,
            "auto_apply_requires_baseline_clear": self.settings.apply_requires_baseline_clear,
            "guard_mode": self.settings.guard_mode,
            "auto_approve_actor": self.settings.approve_actor,
            "auto_apply_actor": self.settings.apply_actor,
            "proposals": proposals,
        });
        let path = self
            .service
            .evidence()
            .write_json("schedules", &cycle_id, &payload)?;
        payload["evidence_path"] = json!(path.display().to_string());

        if let Err(err) = self.kernel.mark_schedule_run(SCHEDULE_NAME) {
            tracing::warn!(%err, "failed to record schedule run");
        }
        *self.last_cycle.lock().expect("last cycle") = Some(payload.clone());
        Ok(payload)
    }
}
