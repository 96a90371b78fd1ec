//! Evidence record shapes for the self-evolution pipeline.
//!
//! Records cross-reference each other by id only; callers resolve through
//! the evidence store, which keeps every JSON document acyclic.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InspectionStatus {
    Ok,
    Attention,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub category: String,
    pub severity: Severity,
    pub subject: String,
    pub signal: String,
    pub summary: String,
    pub value: Value,
    pub confidence: f64,
    pub evidence: Vec<String>,
    #[serde(default)]
    pub requires_human_review: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSnapshot {
    pub created_at: String,
    pub readiness: Value,
    pub migration: Value,
    pub telemetry: Value,
    pub audit_summary: Value,
    pub gate_summary: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionReport {
    pub inspection_id: String,
    pub created_at: String,
    pub status: InspectionStatus,
    pub findings: Vec<Finding>,
    pub signal_snapshot: SignalSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    P2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanItem {
    pub priority: Priority,
    pub category: String,
    pub title: String,
    pub subject: String,
    pub expected_benefit: String,
    pub suggested_scope: Vec<String>,
    #[serde(default)]
    pub requires_human_review: bool,
    pub source_inspection_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub created_at: String,
    pub inspection_id: String,
    pub items: Vec<PlanItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_score: i64,
    pub risk_level: RiskLevel,
    pub factors: Vec<String>,
    pub auto_apply_allowed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalChange {
    pub file: String,
    pub action: String, // add | modify | review
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Generated,
    GuardPassed,
    GuardFailed,
    Approved,
    Rejected,
    Applied,
    RolledBack,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Generated => "generated",
            ProposalStatus::GuardPassed => "guard_passed",
            ProposalStatus::GuardFailed => "guard_failed",
            ProposalStatus::Approved => "approved",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Applied => "applied",
            ProposalStatus::RolledBack => "rolled_back",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub proposal_id: String,
    pub created_at: String,
    pub plan_id: String,
    pub inspection_id: String,
    pub source_subject: String,
    pub title: String,
    pub summary: String,
    pub suggested_changes: Vec<ProposalChange>,
    pub tests_to_add: Vec<String>,
    pub rollout_notes: Vec<String>,
    pub requires_human_review: bool,
    pub risk: RiskAssessment,
    pub status: ProposalStatus,
    pub approval_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rolled_back_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rolled_back_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_guard_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_baseline_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_paths: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardMode {
    Quick,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Passed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardCheck {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
    pub command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardRun {
    pub guard_id: String,
    pub created_at: String,
    pub proposal_id: String,
    pub mode: GuardMode,
    pub status: CheckStatus,
    pub checks: Vec<GuardCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_path: Option<String>,
}

/// Counters compared before/after a proposal application.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BaselinePoint {
    pub readiness_ok: bool,
    pub migration_head: bool,
    pub http_5xx: i64,
    pub skill_failure_total: i64,
    pub sandbox_blocked_total: i64,
    pub governor_blocked_total: i64,
    pub release_failed: i64,
    pub rollback_failed: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineCompare {
    pub baseline_id: String,
    pub created_at: String,
    pub proposal_id: String,
    pub inspection_id: String,
    pub before: BaselinePoint,
    pub after: BaselinePoint,
    pub diff: Value,
    pub regression_detected: bool,
    pub summary: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalAction {
    pub action_id: String,
    pub created_at: String,
    pub proposal_id: String,
    pub action: String, // approve | reject | apply | rollback
    pub actor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub from_status: String,
    pub to_status: String,
}
