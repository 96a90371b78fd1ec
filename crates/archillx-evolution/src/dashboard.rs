//! Dashboard export: one JSON document summarizing the latest evidence of
//! every kind, written under the `dashboards` partition.

use anyhow::Result;
use serde_json::{json, Value};

use archillx_evidence::EvidenceStore;

const KINDS: [&str; 7] = [
    "inspections",
    "plans",
    "proposals",
    "guards",
    "baselines",
    "actions",
    "schedules",
];

fn brief(kind: &str, value: &Value) -> Value {
    let pick = |keys: &[&str]| -> Value {
        let mut out = serde_json::Map::new();
        for key in keys {
            if let Some(v) = value.get(*key) {
                out.insert(key.to_string(), v.clone());
            }
        }
        Value::Object(out)
    };
    match kind {
        "inspections" => pick(&["inspection_id", "created_at", "status"]),
        "plans" => {
            let mut out = pick(&["plan_id", "created_at", "inspection_id"]);
            out["item_count"] = json!(value["items"].as_array().map(|a| a.len()).unwrap_or(0));
            out
        }
        "proposals" => pick(&[
            "proposal_id",
            "created_at",
            "title",
            "status",
            "approval_required",
        ]),
        "guards" => pick(&["guard_id", "created_at", "proposal_id", "mode", "status"]),
        "baselines" => pick(&[
            "baseline_id",
            "created_at",
            "proposal_id",
            "regression_detected",
        ]),
        "actions" => pick(&[
            "action_id",
            "created_at",
            "proposal_id",
            "action",
            "actor",
            "to_status",
        ]),
        _ => pick(&["cycle_id", "created_at", "proposal_count"]),
    }
}

/// Build and persist a dashboard document; returns it with its path.
pub fn export_dashboard(evidence: &EvidenceStore) -> Result<Value> {
    let mut latest = serde_json::Map::new();
    let mut counts = serde_json::Map::new();
    for kind in KINDS {
        counts.insert(kind.to_string(), json!(evidence.count_json(kind)?));
        let entry = evidence
            .latest_json(kind)?
            .map(|value| brief(kind, &value))
            .unwrap_or(Value::Null);
        latest.insert(kind.to_string(), entry);
    }
    let dashboard_id = archillx_evidence::object_id("dash");
    let mut payload = json!({
        "dashboard_id": dashboard_id,
        "generated_at": archillx_evidence::now_iso(),
        "counts": Value::Object(counts),
        "latest": Value::Object(latest),
    });
    let path = evidence.write_json("dashboards", &dashboard_id, &payload)?;
    payload["evidence_path"] = json!(path.display().to_string());
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tree_exports_null_latest_entries() {
        let dir = tempfile::tempdir().unwrap();
        let evidence = EvidenceStore::new(dir.path());
        let dashboard = export_dashboard(&evidence).unwrap();
        assert_eq!(dashboard["counts"]["proposals"], json!(0));
        assert_eq!(dashboard["latest"]["proposals"], Value::Null);
        assert!(dashboard["dashboard_id"].as_str().unwrap().starts_with("dash_"));
    }

    #[test]
    fn dashboard_references_latest_evidence_of_each_kind() {
        let dir = tempfile::tempdir().unwrap();
        let evidence = EvidenceStore::new(dir.path());
        evidence
            .write_json(
                "proposals",
                "prop_1",
                &json!({"proposal_id": "prop_1", "status": "generated", "title": "t", "approval_required": true, "created_at": "now"}),
            )
            .unwrap();
        evidence
            .write_json(
                "actions",
                "act_1",
                &json!({"action_id": "act_1", "action": "approve", "actor": "alice", "to_status": "approved", "proposal_id": "prop_1", "created_at": "now"}),
            )
            .unwrap();

        let dashboard = export_dashboard(&evidence).unwrap();
        assert_eq!(dashboard["latest"]["proposals"]["proposal_id"], json!("prop_1"));
        assert_eq!(dashboard["latest"]["actions"]["actor"], json!("alice"));
        assert!(
            dashboard["counts"].get("dashboards").is_none(),
            "dashboards themselves are not summarized"
        );

        // The export itself is evidence.
        let stored = evidence.latest_json("dashboards").unwrap().unwrap();
        assert_eq!(stored["dashboard_id"], dashboard["dashboard_id"]);
    }
}
