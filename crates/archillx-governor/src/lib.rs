//! Synchronous rule-based risk gate for actions.
//!
//! The governor never fails: `evaluate` always returns a decision, persists
//! one audit record (JSONL + best-effort DB mirror), and bumps telemetry
//! counters. Enforcement depends on the configured mode; scoring is fixed
//! keyword/path/source rules with skill-specific deltas, clamped at 100.

use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};

use archillx_audit::AuditStore;
use archillx_kernel::Kernel;
use archillx_telemetry::Telemetry;

const HIGH_RISK_KEYWORDS: &[&str] = &[
    "delete",
    "rm ",
    "rmdir",
    "drop table",
    "truncate",
    "format",
    "shutdown",
    "reboot",
    "kill",
    "terminate",
    "exec(",
    "eval(",
    "__import__",
];

const MEDIUM_RISK_KEYWORDS: &[&str] = &[
    "write",
    "modify",
    "update",
    "patch",
    "post",
    "send",
    "deploy",
    "push",
    "publish",
    "code_exec",
    "subprocess",
];

const SENSITIVE_PATHS: &[&str] = &[
    "/etc/", "/usr/", "/bin/", "/sbin/", "~/.ssh", "~/.config", "/root/",
];

pub const DEFAULT_WARN_THRESHOLD: i64 = 60;
pub const DEFAULT_BLOCK_THRESHOLD: i64 = 85;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GovernorMode {
    Off,
    AuditOnly,
    SoftBlock,
    HardBlock,
}

impl GovernorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GovernorMode::Off => "off",
            GovernorMode::AuditOnly => "audit_only",
            GovernorMode::SoftBlock => "soft_block",
            GovernorMode::HardBlock => "hard_block",
        }
    }
}

impl FromStr for GovernorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(GovernorMode::Off),
            "audit_only" => Ok(GovernorMode::AuditOnly),
            "soft_block" => Ok(GovernorMode::SoftBlock),
            "hard_block" => Ok(GovernorMode::HardBlock),
            other => Err(format!("unknown governor mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DecisionKind {
    #[serde(rename = "APPROVED")]
    Approved,
    #[serde(rename = "WARNED")]
    Warned,
    #[serde(rename = "BLOCKED")]
    Blocked,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::Approved => "APPROVED",
            DecisionKind::Warned => "WARNED",
            DecisionKind::Blocked => "BLOCKED",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub decision: DecisionKind,
    pub risk_score: i64,
    pub reason: String,
    pub action: String,
    pub context: Value,
}

pub struct Governor {
    mode: GovernorMode,
    warn_threshold: i64,
    block_threshold: i64,
    audit: Arc<AuditStore>,
    kernel: Option<Kernel>,
    telemetry: Arc<Telemetry>,
}

impl Governor {
    pub fn new(
        mode: GovernorMode,
        warn_threshold: i64,
        block_threshold: i64,
        audit: Arc<AuditStore>,
        kernel: Option<Kernel>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            mode,
            warn_threshold,
            block_threshold,
            audit,
            kernel,
            telemetry,
        }
    }

    pub fn mode(&self) -> GovernorMode {
        self.mode
    }

    /// Score an action and gate it by mode. Infallible: audit persistence
    /// problems are logged and the decision is still returned.
    pub fn evaluate(&self, action: &str, context: &Value) -> Decision {
        let (score, factors) = score_action(action, context);
        let (decision, effective_score) = self.gate(score);
        let reason = if factors.is_empty() {
            "no risk factors matched".to_string()
        } else {
            factors.join("; ")
        };

        self.telemetry.incr("governor_evaluations_total");
        match decision {
            DecisionKind::Approved => self.telemetry.incr("governor_decision_approved_total"),
            DecisionKind::Warned => self.telemetry.incr("governor_decision_warned_total"),
            DecisionKind::Blocked => self.telemetry.incr("governor_decision_blocked_total"),
        }
        self.telemetry
            .gauge("governor_last_risk_score", effective_score as f64);

        if let Err(err) = self.audit.persist_audit(
            self.kernel.as_ref(),
            action,
            decision.as_str(),
            effective_score,
            Some(&reason),
            Some(json!({"governor": {"mode": self.mode.as_str()}, "input": context})),
        ) {
            tracing::warn!(%err, action, "failed to persist governor audit record");
        }
        if let Some(kernel) = &self.kernel {
            if let Err(err) = kernel.upsert_risk_profile(action, effective_score as f64) {
                tracing::warn!(%err, action, "failed to update risk profile");
            }
        }

        Decision {
            decision,
            risk_score: effective_score,
            reason,
            action: action.to_string(),
            context: context.clone(),
        }
    }

    fn gate(&self, score: i64) -> (DecisionKind, i64) {
        match self.mode {
            GovernorMode::Off => (DecisionKind::Approved, 0),
            GovernorMode::AuditOnly => (DecisionKind::Approved, score),
            GovernorMode::SoftBlock | GovernorMode::HardBlock => {
                if score >= self.block_threshold {
                    (DecisionKind::Blocked, score)
                } else if score >= self.warn_threshold {
                    let decision = if self.mode == GovernorMode::HardBlock {
                        DecisionKind::Blocked
                    } else {
                        DecisionKind::Warned
                    };
                    (decision, score)
                } else {
                    (DecisionKind::Approved, score)
                }
            }
        }
    }
}

/// Pure scoring: one hit per keyword set against the action plus the
/// JSON-stringified context, source and skill deltas, clamped to 0..100.
pub fn score_action(action: &str, context: &Value) -> (i64, Vec<String>) {
    let haystack = format!("{} {}", action, context).to_ascii_lowercase();
    let mut score = 0i64;
    let mut factors = Vec::new();

    if let Some(hit) = HIGH_RISK_KEYWORDS.iter().find(|k| haystack.contains(**k)) {
        score += 35;
        factors.push(format!("high-risk keyword: {}", hit.trim()));
    }
    if let Some(hit) = MEDIUM_RISK_KEYWORDS.iter().find(|k| haystack.contains(**k)) {
        score += 20;
        factors.push(format!("medium-risk keyword: {}", hit));
    }
    if let Some(hit) = SENSITIVE_PATHS.iter().find(|k| haystack.contains(**k)) {
        score += 30;
        factors.push(format!("sensitive path: {}", hit));
    }
    if context.get("source").and_then(Value::as_str) == Some("cron") {
        score += 10;
        factors.push("unattended cron source".to_string());
    }
    match context.get("skill").and_then(Value::as_str) {
        Some("code_exec") => {
            score += 25;
            factors.push("skill: code_exec".to_string());
        }
        Some("file_ops") => {
            let operation = context.get("operation").and_then(Value::as_str);
            if matches!(operation, Some("delete") | Some("write")) {
                score += 20;
                factors.push("skill: file_ops destructive operation".to_string());
            }
        }
        _ => {}
    }

    (score.clamp(0, 100), factors)
}
