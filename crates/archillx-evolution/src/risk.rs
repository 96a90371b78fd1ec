//! Per-plan-item risk scoring for proposal generation.

use crate::schemas::{PlanItem, Priority, RiskAssessment, RiskLevel};

const HIGH_RISK_HINTS: &[&str] = &[
    "sandbox",
    "migration",
    "auth",
    "acl",
    "code_exec",
    "file_ops",
    "release_gate",
];

/// A scope path counts as test scope when it starts with `tests/` or
/// carries a `/tests/` segment.
pub fn is_test_scope(path: &str) -> bool {
    path.starts_with("tests/") || path.contains("/tests/")
}

pub fn score_plan_item(item: &PlanItem) -> RiskAssessment {
    let mut score: i64 = 20;
    let mut factors = vec!["base complexity".to_string()];

    let priority_add = match item.priority {
        Priority::P0 => 35,
        Priority::P1 => 20,
        Priority::P2 => 8,
    };
    score += priority_add;
    factors.push(format!("priority {:?} (+{})", item.priority, priority_add));

    if item.requires_human_review {
        score += 15;
        factors.push("human review requested (+15)".to_string());
    }

    let text = format!(
        "{} {} {}",
        item.title,
        item.subject,
        item.suggested_scope.join(" ")
    )
    .to_ascii_lowercase();
    for hint in HIGH_RISK_HINTS {
        if text.contains(hint) {
            score += 18;
            factors.push(format!("high-risk area: {hint} (+18)"));
        }
    }

    if item.suggested_scope.iter().any(|p| is_test_scope(p)) {
        score -= 5;
        factors.push("test-scoped change (-5)".to_string());
    }

    let score = score.clamp(0, 100);
    let risk_level = if score >= 70 {
        RiskLevel::High
    } else if score >= 40 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    RiskAssessment {
        risk_score: score,
        risk_level,
        factors,
        auto_apply_allowed: risk_level == RiskLevel::Low && !item.requires_human_review,
    }
}
