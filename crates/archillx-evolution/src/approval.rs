//! Approval state machine for proposals.
//!
//! Invalid transitions are values, not panics: callers branch on
//! [`TransitionError`] and only the HTTP boundary turns it into a 4xx.

use thiserror::Error;

use crate::schemas::{ApprovalAction, Proposal, ProposalStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalVerb {
    Approve,
    Reject,
    Apply,
    Rollback,
}

impl ApprovalVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalVerb::Approve => "approve",
            ApprovalVerb::Reject => "reject",
            ApprovalVerb::Apply => "apply",
            ApprovalVerb::Rollback => "rollback",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid transition {action}: {from} -> {to}")]
    InvalidTransition {
        action: String,
        from: String,
        to: String,
    },
}

fn invalid(verb: ApprovalVerb, from: ProposalStatus, to: ProposalStatus) -> TransitionError {
    TransitionError::InvalidTransition {
        action: verb.as_str().to_string(),
        from: from.as_str().to_string(),
        to: to.as_str().to_string(),
    }
}

/// Advance `proposal` through one transition, stamping actor/timestamp
/// fields and emitting the immutable action record.
pub fn apply_transition(
    proposal: &mut Proposal,
    verb: ApprovalVerb,
    actor: &str,
    reason: Option<&str>,
) -> Result<ApprovalAction, TransitionError> {
    let from = proposal.status;
    let now = archillx_evidence::now_iso();

    let to = match verb {
        ApprovalVerb::Approve => {
            if !matches!(
                from,
                ProposalStatus::Generated | ProposalStatus::GuardPassed
            ) {
                return Err(invalid(verb, from, ProposalStatus::Approved));
            }
            proposal.approved_by = Some(actor.to_string());
            proposal.approved_at = Some(now.clone());
            ProposalStatus::Approved
        }
        ApprovalVerb::Reject => {
            if matches!(from, ProposalStatus::Applied | ProposalStatus::RolledBack) {
                return Err(invalid(verb, from, ProposalStatus::Rejected));
            }
            proposal.rejected_by = Some(actor.to_string());
            proposal.rejected_at = Some(now.clone());
            ProposalStatus::Rejected
        }
        ApprovalVerb::Apply => {
            let allowed = if proposal.approval_required {
                from == ProposalStatus::Approved
            } else {
                matches!(
                    from,
                    ProposalStatus::Generated
                        | ProposalStatus::GuardPassed
                        | ProposalStatus::Approved
                )
            };
            if !allowed {
                return Err(invalid(verb, from, ProposalStatus::Applied));
            }
            proposal.applied_by = Some(actor.to_string());
            proposal.applied_at = Some(now.clone());
            ProposalStatus::Applied
        }
        ApprovalVerb::Rollback => {
            if from != ProposalStatus::Applied {
                return Err(invalid(verb, from, ProposalStatus::RolledBack));
            }
            proposal.rolled_back_by = Some(actor.to_string());
            proposal.rolled_back_at = Some(now.clone());
            ProposalStatus::RolledBack
        }
    };

    proposal.status = to;
    Ok(ApprovalAction {
        action_id: archillx_evidence::object_id("act"),
        created_at: now,
        proposal_id: proposal.proposal_id.clone(),
        action: verb.as_str().to_string(),
        actor: actor.to_string(),
        reason: reason.map(|r| r.to_string()),
        from_status: from.as_str().to_string(),
        to_status: to.as_str().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{RiskAssessment, RiskLevel};

    fn proposal(approval_required: bool) -> Proposal {
        Proposal {
            proposal_id: "prop_1".into(),
            created_at: archillx_evidence::now_iso(),
            plan_id: "plan_1".into(),
            inspection_id: "insp_1".into(),
            source_subject: "http".into(),
            title: "t".into(),
            summary: "s".into(),
            suggested_changes: vec![],
            tests_to_add: vec![],
            rollout_notes: vec![],
            requires_human_review: approval_required,
            risk: RiskAssessment {
                risk_score: 30,
                risk_level: RiskLevel::Low,
                factors: vec![],
                auto_apply_allowed: !approval_required,
            },
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
        }
    }

    #[test]
    fn happy_path_approve_apply_rollback() {
        let mut prop = proposal(true);
        prop.status = ProposalStatus::GuardPassed;

        let action = apply_transition(&mut prop, ApprovalVerb::Approve, "alice", Some("reviewed"))
            .unwrap();
        assert_eq!(prop.status, ProposalStatus::Approved);
        assert_eq!(prop.approved_by.as_deref(), Some("alice"));
        assert_eq!(action.from_status, "guard_passed");
        assert_eq!(action.to_status, "approved");

        let action = apply_transition(&mut prop, ApprovalVerb::Apply, "bob", None).unwrap();
        assert_eq!(prop.status, ProposalStatus::Applied);
        assert_eq!(prop.applied_by.as_deref(), Some("bob"));
        assert_eq!(action.action, "apply");

        let action = apply_transition(&mut prop, ApprovalVerb::Rollback, "ops", None).unwrap();
        assert_eq!(prop.status, ProposalStatus::RolledBack);
        assert_eq!(action.to_status, "rolled_back");
    }

    #[test]
    fn apply_before_approval_is_invalid_when_required() {
        let mut prop = proposal(true);
        let err = apply_transition(&mut prop, ApprovalVerb::Apply, "alice", None).unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidTransition {
                action: "apply".into(),
                from: "generated".into(),
                to: "applied".into(),
            }
        );
        assert_eq!(prop.status, ProposalStatus::Generated, "proposal untouched");
    }

    #[test]
    fn apply_without_approval_requirement_is_direct() {
        let mut prop = proposal(false);
        apply_transition(&mut prop, ApprovalVerb::Apply, "auto", None).unwrap();
        assert_eq!(prop.status, ProposalStatus::Applied);
    }

    #[test]
    fn applying_an_applied_proposal_is_invalid() {
        let mut prop = proposal(false);
        apply_transition(&mut prop, ApprovalVerb::Apply, "auto", None).unwrap();
        let err = apply_transition(&mut prop, ApprovalVerb::Apply, "auto", None).unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn reject_is_blocked_after_apply_or_rollback() {
        let mut prop = proposal(false);
        apply_transition(&mut prop, ApprovalVerb::Apply, "auto", None).unwrap();
        assert!(apply_transition(&mut prop, ApprovalVerb::Reject, "x", None).is_err());
        apply_transition(&mut prop, ApprovalVerb::Rollback, "ops", None).unwrap();
        assert!(apply_transition(&mut prop, ApprovalVerb::Reject, "x", None).is_err());
    }

    #[test]
    fn rollback_requires_applied() {
        let mut prop = proposal(false);
        assert!(apply_transition(&mut prop, ApprovalVerb::Rollback, "ops", None).is_err());
    }

    #[test]
    fn reject_from_guard_failed_is_allowed() {
        let mut prop = proposal(true);
        prop.status = ProposalStatus::GuardFailed;
        let action = apply_transition(&mut prop, ApprovalVerb::Reject, "alice", None).unwrap();
        assert_eq!(action.from_status, "guard_failed");
        assert_eq!(prop.status, ProposalStatus::Rejected);
    }
}
