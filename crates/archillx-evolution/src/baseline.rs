//! Baseline compare: before/after signal points scoped to one proposal.

use serde_json::{json, Value};

use crate::schemas::{BaselineCompare, BaselinePoint, SignalSnapshot};

/// Project one frozen snapshot onto the tracked counter set.
pub fn point_from_snapshot(snapshot: &SignalSnapshot) -> BaselinePoint {
    let last_300 = &snapshot.telemetry["history"]["windows"]["last_300s"];
    BaselinePoint {
        readiness_ok: snapshot.readiness.get("status").and_then(Value::as_str) == Some("ready"),
        migration_head: matches!(
            snapshot.migration.get("status").and_then(Value::as_str),
            Some("head") | Some("disabled")
        ),
        http_5xx: last_300["http"]["status"]["5xx"].as_i64().unwrap_or(0),
        skill_failure_total: snapshot.telemetry["aggregate"]["skills"]["totals"]["failure_total"]
            .as_i64()
            .unwrap_or(0),
        sandbox_blocked_total: last_300["sandbox"]["blocked_total"].as_i64().unwrap_or(0),
        governor_blocked_total: snapshot.audit_summary["by_decision"]["BLOCKED"]
            .as_i64()
            .unwrap_or(0),
        release_failed: snapshot.gate_summary["release"]["failed"].as_i64().unwrap_or(0),
        rollback_failed: snapshot.gate_summary["rollback"]["failed"].as_i64().unwrap_or(0),
    }
}

pub fn compare_points(
    proposal_id: &str,
    inspection_id: &str,
    before: BaselinePoint,
    after: BaselinePoint,
) -> BaselineCompare {
    let mut reasons: Vec<String> = Vec::new();

    if before.readiness_ok && !after.readiness_ok {
        reasons.push("readiness regressed from ready to degraded".into());
    }
    if before.migration_head && !after.migration_head {
        reasons.push("migration state left head".into());
    }

    let counters = [
        ("http_5xx", before.http_5xx, after.http_5xx),
        (
            "skill_failure_total",
            before.skill_failure_total,
            after.skill_failure_total,
        ),
        (
            "sandbox_blocked_total",
            before.sandbox_blocked_total,
            after.sandbox_blocked_total,
        ),
        (
            "governor_blocked_total",
            before.governor_blocked_total,
            after.governor_blocked_total,
        ),
        ("release_failed", before.release_failed, after.release_failed),
        ("rollback_failed", before.rollback_failed, after.rollback_failed),
    ];
    let mut diff = serde_json::Map::new();
    for (name, before_v, after_v) in counters {
        let delta = after_v - before_v;
        diff.insert(name.to_string(), json!(delta));
        if delta > 0 {
            reasons.push(format!("{name} increased by {delta}"));
        }
    }

    let regression_detected = !reasons.is_empty();
    let summary = if regression_detected {
        reasons
    } else {
        vec!["no regression detected".to_string()]
    };

    BaselineCompare {
        baseline_id: archillx_evidence::object_id("base"),
        created_at: archillx_evidence::now_iso(),
        proposal_id: proposal_id.to_string(),
        inspection_id: inspection_id.to_string(),
        before,
        after,
        diff: Value::Object(diff),
        regression_detected,
        summary,
        evidence_path: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> BaselinePoint {
        BaselinePoint {
            readiness_ok: true,
            migration_head: true,
            http_5xx: 0,
            skill_failure_total: 0,
            sandbox_blocked_total: 0,
            governor_blocked_total: 0,
            release_failed: 0,
            rollback_failed: 0,
        }
    }

    #[test]
    fn identical_points_are_clean() {
        let compare = compare_points("prop_1", "insp_1", point(), point());
        assert!(!compare.regression_detected);
        assert_eq!(compare.summary, vec!["no regression detected".to_string()]);
        assert_eq!(compare.diff["http_5xx"], json!(0));
    }

    #[test]
    fn counter_growth_is_a_regression() {
        let mut after = point();
        after.http_5xx = 3;
        after.governor_blocked_total = 1;
        let compare = compare_points("prop_1", "insp_1", point(), after);
        assert!(compare.regression_detected);
        assert!(compare
            .summary
            .iter()
            .any(|s| s.contains("http_5xx increased by 3")));
        assert!(compare
            .summary
            .iter()
            .any(|s| s.contains("governor_blocked_total increased by 1")));
    }

    #[test]
    fn readiness_and_migration_flips_are_regressions() {
        let mut after = point();
        after.readiness_ok = false;
        after.migration_head = false;
        let compare = compare_points("prop_1", "insp_1", point(), after);
        assert!(compare.regression_detected);
        assert_eq!(compare.summary.len(), 2);
    }

    #[test]
    fn counter_decrease_is_not_a_regression() {
        let mut before = point();
        before.http_5xx = 5;
        let compare = compare_points("prop_1", "insp_1", before, point());
        assert!(!compare.regression_detected);
        assert_eq!(compare.diff["http_5xx"], json!(-5));
    }

    #[test]
    fn point_projection_reads_snapshot_sections() {
        let snapshot = SignalSnapshot {
            created_at: archillx_evidence::now_iso(),
            readiness: json!({"status": "ready"}),
            migration: json!({"status": "disabled"}),
            telemetry: json!({
                "aggregate": {"skills": {"totals": {"failure_total": 2}}},
                "history": {"windows": {"last_300s": {
                    "http": {"status": {"5xx": 1}},
                    "sandbox": {"blocked_total": 4},
                }}},
            }),
            audit_summary: json!({"by_decision": {"BLOCKED": 7}}),
            gate_summary: json!({"release": {"failed": 1}, "rollback": {"failed": 0}}),
        };
        let point = point_from_snapshot(&snapshot);
        assert!(point.readiness_ok);
        assert!(point.migration_head, "disabled migration checks count as head");
        assert_eq!(point.http_5xx, 1);
        assert_eq!(point.skill_failure_total, 2);
        assert_eq!(point.sandbox_blocked_total, 4);
        assert_eq!(point.governor_blocked_total, 7);
        assert_eq!(point.release_failed, 1);
    }
}
