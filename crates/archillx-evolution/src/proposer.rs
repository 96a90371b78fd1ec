//! Turns one plan item into a reviewable patch proposal.

use anyhow::{bail, Result};

use crate::risk::{is_test_scope, score_plan_item};
use crate::schemas::{Plan, Priority, Proposal, ProposalChange, ProposalStatus, RiskLevel};

pub fn build_proposal(plan: &Plan, item_index: usize) -> Result<Proposal> {
    if plan.items.is_empty() {
        bail!("no evolution plan items available for proposal generation");
    }
    let Some(item) = plan.items.get(item_index) else {
        bail!(
            "proposal item index {} out of range (plan has {} items)",
            item_index,
            plan.items.len()
        );
    };

    let risk = score_plan_item(item);

    let mut changes: Vec<ProposalChange> = item
        .suggested_scope
        .iter()
        .map(|scope| ProposalChange {
            file: scope.clone(),
            action: if is_test_scope(scope) { "add" } else { "modify" }.to_string(),
            rationale: Some(format!(
                "Suggested by evolution planner for subject {}.",
                item.subject
            )),
        })
        .collect();
    if changes.is_empty() {
        changes.push(ProposalChange {
            file: "docs/EVOLUTION_DESIGN.md".into(),
            action: "review".into(),
            rationale: Some("No code scope identified; document investigation first.".into()),
        });
    }

    let tests_to_add: Vec<String> = item
        .suggested_scope
        .iter()
        .filter(|scope| is_test_scope(scope))
        .cloned()
        .collect();

    let mut rollout_notes = vec![
        "Run the compile and targeted test guard checks before merge.".to_string(),
        "Attach proposal evidence to release/rollback gate review.".to_string(),
    ];
    if matches!(risk.risk_level, RiskLevel::Medium | RiskLevel::High) {
        rollout_notes.push("Require human approval before patch application.".to_string());
    }
    if item.priority == Priority::P0 {
        rollout_notes
            .push("Validate rollback path and restore drill confidence before rollout.".to_string());
    }

    let requires_human_review = item.requires_human_review || risk.risk_level != RiskLevel::Low;
    let approval_required = requires_human_review || !risk.auto_apply_allowed;

    Ok(Proposal {
        proposal_id: archillx_evidence::object_id("prop"),
        created_at: archillx_evidence::now_iso(),
        plan_id: plan.plan_id.clone(),
        inspection_id: plan.inspection_id.clone(),
        source_subject: item.subject.clone(),
        title: format!("Patch proposal: {}", item.title),
        summary: format!(
            "Candidate patch proposal for {}: {}. Expected benefit: {}.",
            item.subject, item.title, item.expected_benefit
        ),
        suggested_changes: changes,
        tests_to_add,
        rollout_notes,
        requires_human_review,
        risk,
        status: ProposalStatus::Generated,
        approval_required,
        approved_by: None,
        approved_at: None,
        rejected_by: None,
        rejected_at: None,
        applied_by: None,
        applied_at: None,
        rolled_back_by: None,
        rolled_back_at: None,
        last_guard_id: None,
        last_baseline_id: None,
        artifact_paths: None,
        evidence_path: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::PlanItem;

    fn plan(items: Vec<PlanItem>) -> Plan {
        Plan {
            plan_id: "plan_x".into(),
            created_at: archillx_evidence::now_iso(),
            inspection_id: "insp_x".into(),
            items,
            evidence_path: None,
        }
    }

    fn item(priority: Priority, review: bool, scope: &[&str]) -> PlanItem {
        PlanItem {
            priority,
            category: "stability".into(),
            title: "Investigate http: 5xx burst".into(),
            subject: "http".into(),
            expected_benefit: "fewer incidents".into(),
            suggested_scope: scope.iter().map(|s| s.to_string()).collect(),
            requires_human_review: review,
            source_inspection_id: "insp_x".into(),
        }
    }

    #[test]
    fn medium_risk_proposal_requires_approval() {
        let plan = plan(vec![item(
            Priority::P1,
            true,
            &["tests/foo.py", "app/x.py"],
        )]);
        let proposal = build_proposal(&plan, 0).unwrap();

        assert_eq!(proposal.risk.risk_score, 50);
        assert_eq!(proposal.risk.risk_level, RiskLevel::Medium);
        assert!(proposal.approval_required);
        assert!(proposal.requires_human_review);
        assert_eq!(proposal.status, ProposalStatus::Generated);
        assert_eq!(proposal.tests_to_add, vec!["tests/foo.py".to_string()]);
        assert_eq!(proposal.suggested_changes[0].action, "add");
        assert_eq!(proposal.suggested_changes[1].action, "modify");
        assert!(proposal
            .rollout_notes
            .iter()
            .any(|n| n.contains("human approval")));
    }

    #[test]
    fn low_risk_proposal_skips_approval() {
        let plan = plan(vec![item(Priority::P2, false, &["app/x.py"])]);
        let proposal = build_proposal(&plan, 0).unwrap();
        assert_eq!(proposal.risk.risk_level, RiskLevel::Low);
        assert!(!proposal.approval_required);
        assert!(proposal.risk.auto_apply_allowed);
    }

    #[test]
    fn empty_scope_falls_back_to_review_only_change() {
        let plan = plan(vec![item(Priority::P2, false, &[])]);
        let proposal = build_proposal(&plan, 0).unwrap();
        assert_eq!(proposal.suggested_changes.len(), 1);
        assert_eq!(proposal.suggested_changes[0].action, "review");
        assert_eq!(proposal.suggested_changes[0].file, "docs/EVOLUTION_DESIGN.md");
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let plan = plan(vec![item(Priority::P2, false, &["app/x.py"])]);
        assert!(build_proposal(&plan, 3).is_err());
        assert!(build_proposal(&plan(vec![]), 0).is_err());
    }

    #[test]
    fn p0_items_get_rollback_validation_notes() {
        let plan = plan(vec![item(Priority::P0, false, &["app/x.py"])]);
        let proposal = build_proposal(&plan, 0).unwrap();
        assert!(proposal
            .rollout_notes
            .iter()
            .any(|n| n.contains("rollback path")));
    }
}
