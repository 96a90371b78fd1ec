//! Self-inspection: fixed classification rules over one signal snapshot.

use serde_json::{json, Value};

use crate::schemas::{Finding, InspectionReport, InspectionStatus, Severity, SignalSnapshot};

/// Apply the documented rule set to a frozen snapshot.
pub fn classify_findings(snapshot: &SignalSnapshot) -> Vec<Finding> {
    let mut findings = Vec::new();

    let readiness_status = snapshot.readiness.get("status").and_then(Value::as_str);
    if readiness_status != Some("ready") {
        findings.push(Finding {
            category: "operability".into(),
            severity: Severity::Critical,
            subject: "readiness".into(),
            signal: "ready.status".into(),
            summary: "System readiness is degraded and requires operator attention.".into(),
            value: snapshot
                .readiness
                .get("status")
                .cloned()
                .unwrap_or(Value::Null),
            confidence: 0.98,
            evidence: vec!["/v1/ready".into()],
            requires_human_review: false,
        });
    }

    let migration_status = snapshot.migration.get("status").and_then(Value::as_str);
    if !matches!(migration_status, Some("head") | Some("disabled")) {
        findings.push(Finding {
            category: "migration_gap".into(),
            severity: Severity::High,
            subject: "migration".into(),
            signal: "migration.status".into(),
            summary: "Database migration state is behind or unknown.".into(),
            value: snapshot
                .migration
                .get("status")
                .cloned()
                .unwrap_or(Value::Null),
            confidence: 0.95,
            evidence: vec!["/v1/migration/state".into()],
            requires_human_review: false,
        });
    }

    let last_300 = &snapshot.telemetry["history"]["windows"]["last_300s"];
    let http_5xx = last_300["http"]["status"]["5xx"].as_i64().unwrap_or(0);
    if http_5xx > 0 {
        findings.push(Finding {
            category: "stability".into(),
            severity: if http_5xx >= 5 { Severity::High } else { Severity::Medium },
            subject: "http".into(),
            signal: "history.last_300s.http.status.5xx".into(),
            summary: "Recent HTTP 5xx responses detected in the last 5 minutes.".into(),
            value: json!(http_5xx),
            confidence: 0.88,
            evidence: vec!["/v1/telemetry".into()],
            requires_human_review: false,
        });
    }

    let skill_failures = snapshot.telemetry["aggregate"]["skills"]["totals"]["failure_total"]
        .as_i64()
        .unwrap_or(0);
    if skill_failures > 0 {
        findings.push(Finding {
            category: "reliability".into(),
            severity: Severity::Medium,
            subject: "skills".into(),
            signal: "skills.failure_total".into(),
            summary: "Skill failures have been observed and should be triaged.".into(),
            value: json!(skill_failures),
            confidence: 0.82,
            evidence: vec!["/v1/telemetry".into()],
            requires_human_review: false,
        });
    }

    let sandbox_blocked = last_300["sandbox"]["blocked_total"].as_i64().unwrap_or(0);
    if sandbox_blocked > 0 {
        findings.push(Finding {
            category: "security".into(),
            severity: Severity::Medium,
            subject: "sandbox".into(),
            signal: "history.last_300s.sandbox.blocked_total".into(),
            summary: "Sandbox blocked executions were observed recently; review policy or callers."
                .into(),
            value: json!(sandbox_blocked),
            confidence: 0.80,
            evidence: vec!["/v1/telemetry".into(), "/v1/audit/summary".into()],
            requires_human_review: false,
        });
    }

    let blocked_decisions = snapshot.audit_summary["by_decision"]["BLOCKED"]
        .as_i64()
        .unwrap_or(0);
    if blocked_decisions > 0 {
        findings.push(Finding {
            category: "security".into(),
            severity: Severity::Medium,
            subject: "audit".into(),
            signal: "audit.by_decision.BLOCKED".into(),
            summary: "Security audit shows blocked decisions that may merit pattern review.".into(),
            value: json!(blocked_decisions),
            confidence: 0.74,
            evidence: vec!["/v1/audit/summary".into()],
            requires_human_review: false,
        });
    }

    let release_failed = snapshot.gate_summary["release"]["failed"].as_i64().unwrap_or(0);
    let rollback_failed = snapshot.gate_summary["rollback"]["failed"].as_i64().unwrap_or(0);
    if release_failed > 0 || rollback_failed > 0 {
        findings.push(Finding {
            category: "deployment_gap".into(),
            severity: Severity::High,
            subject: "release_gate".into(),
            signal: "gate_summary.failures".into(),
            summary: "Release or rollback gate failures exist in recent evidence and should be investigated before upgrades.".into(),
            value: json!({
                "release_failed": release_failed,
                "rollback_failed": rollback_failed,
            }),
            confidence: 0.90,
            evidence: vec!["evidence/releases".into(), "evidence/dashboards".into()],
            requires_human_review: false,
        });
    }

    findings
}

/// Report status is driven by the worst finding severity.
pub fn status_for(findings: &[Finding]) -> InspectionStatus {
    match findings.iter().map(|f| f.severity).max() {
        Some(Severity::Critical) => InspectionStatus::Critical,
        Some(_) => InspectionStatus::Attention,
        None => InspectionStatus::Ok,
    }
}

pub fn build_report(snapshot: SignalSnapshot) -> InspectionReport {
    let findings = classify_findings(&snapshot);
    InspectionReport {
        inspection_id: archillx_evidence::object_id("insp"),
        created_at: archillx_evidence::now_iso(),
        status: status_for(&findings),
        findings,
        signal_snapshot: snapshot,
        evidence_path: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(readiness: &str, migration: &str, http_5xx: i64) -> SignalSnapshot {
        SignalSnapshot {
            created_at: archillx_evidence::now_iso(),
            readiness: json!({"status": readiness}),
            migration: json!({"status": migration}),
            telemetry: json!({
                "aggregate": {"skills": {"totals": {"failure_total": 0}}},
                "history": {"windows": {"last_300s": {
                    "http": {"status": {"5xx": http_5xx}},
                    "sandbox": {"blocked_total": 0},
                }}},
            }),
            audit_summary: json!({"by_decision": {}}),
            gate_summary: json!({"release": {}, "rollback": {}}),
        }
    }

    #[test]
    fn clean_snapshot_produces_ok_report() {
        let report = build_report(snapshot("ready", "head", 0));
        assert!(report.findings.is_empty());
        assert_eq!(report.status, InspectionStatus::Ok);
        assert!(report.inspection_id.starts_with("insp_"));
    }

    #[test]
    fn degraded_readiness_is_critical() {
        let report = build_report(snapshot("degraded", "head", 0));
        assert_eq!(report.status, InspectionStatus::Critical);
        assert_eq!(report.findings[0].subject, "readiness");
        assert_eq!(report.findings[0].severity, Severity::Critical);
    }

    #[test]
    fn http_5xx_severity_scales_with_count() {
        let few = build_report(snapshot("ready", "head", 2));
        assert_eq!(few.findings[0].severity, Severity::Medium);
        assert_eq!(few.status, InspectionStatus::Attention);

        let many = build_report(snapshot("ready", "head", 5));
        assert_eq!(many.findings[0].severity, Severity::High);
    }

    #[test]
    fn migration_behind_and_gate_failures_raise_high_findings() {
        let mut snap = snapshot("ready", "behind", 0);
        snap.gate_summary = json!({"release": {"failed": 1}, "rollback": {"failed": 0}});
        let report = build_report(snap);
        let subjects: Vec<_> = report.findings.iter().map(|f| f.subject.as_str()).collect();
        assert_eq!(subjects, vec!["migration", "release_gate"]);
        assert!(report
            .findings
            .iter()
            .all(|f| f.severity == Severity::High));
    }
}
