//! Maps inspection findings onto prioritized plan items with suggested
//! change scopes.

use crate::schemas::{Finding, InspectionReport, Plan, PlanItem, Priority, Severity};

/// Fixed subject → suggested-scope table. Unknown subjects fall back to a
/// documentation-first investigation.
fn scope_for(subject: &str) -> Vec<String> {
    let paths: &[&str] = match subject {
        "readiness" => &[
            "crates/archillx-evolution/src/signals.rs",
            "apps/archillx-server/src/api_system.rs",
        ],
        "migration" => &[
            "crates/archillx-kernel/src/migration.rs",
            "apps/archillx-cli/src/main.rs",
        ],
        "http" => &[
            "apps/archillx-server/src/telemetry_mw.rs",
            "crates/archillx-telemetry/src/lib.rs",
            "crates/archillx-evolution/tests/pipeline.rs",
        ],
        "skills" => &[
            "crates/archillx-telemetry/src/lib.rs",
            "crates/archillx-evolution/tests/pipeline.rs",
        ],
        "sandbox" => &[
            "crates/archillx-governor/src/lib.rs",
            "crates/archillx-evolution/tests/pipeline.rs",
        ],
        "audit" => &[
            "crates/archillx-audit/src/lib.rs",
            "crates/archillx-audit/src/context.rs",
        ],
        "release_gate" => &["scripts/release_check.sh", "scripts/rollback_check.sh"],
        _ => &["docs/OPERATIONS_RUNBOOK.md"],
    };
    paths.iter().map(|p| p.to_string()).collect()
}

fn priority_for(finding: &Finding) -> Priority {
    match finding.severity {
        Severity::Critical => Priority::P0,
        Severity::High => Priority::P1,
        _ => Priority::P2,
    }
}

fn benefit_for(category: &str) -> &'static str {
    match category {
        "security" => "reduce security exposure and false-negative risk",
        "stability" => "improve runtime stability and reduce incident frequency",
        "reliability" => "reduce repeated failures and improve success rate",
        "operability" => "restore operator confidence and deployment readiness",
        "deployment_gap" => "improve upgrade confidence and reduce rollout risk",
        "migration_gap" => "prevent schema drift and failed deployments",
        _ => "improve system maintainability",
    }
}

pub fn build_plan(report: &InspectionReport) -> Plan {
    let items = report
        .findings
        .iter()
        .map(|finding| PlanItem {
            priority: priority_for(finding),
            category: finding.category.clone(),
            title: format!("Investigate {}: {}", finding.subject, finding.summary),
            subject: finding.subject.clone(),
            expected_benefit: benefit_for(&finding.category).to_string(),
            suggested_scope: scope_for(&finding.subject),
            requires_human_review: finding.requires_human_review,
            source_inspection_id: report.inspection_id.clone(),
        })
        .collect();
    Plan {
        plan_id: archillx_evidence::object_id("plan"),
        created_at: archillx_evidence::now_iso(),
        inspection_id: report.inspection_id.clone(),
        items,
        evidence_path: None,
    }
}
