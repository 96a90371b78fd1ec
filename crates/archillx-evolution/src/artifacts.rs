//! Patch-artifact rendering: one directory per proposal holding the diff,
//! PR draft, commit message, test/rollout notes, risk assessment, and a
//! manifest indexing them. Re-rendering overwrites every file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{json, Value};

use archillx_evidence::EvidenceStore;

use crate::schemas::{Proposal, ProposalChange};

/// Comment syntax keyed by target-file suffix.
fn comment_style(path: &Path) -> (&'static str, &'static str) {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if name == "Dockerfile" {
        return ("#", "");
    }
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "rs" | "js" | "ts" | "tsx" | "jsx" | "java" | "c" | "cpp" | "h" | "hpp" | "go"
        | "swift" | "kt" | "php" => ("//", ""),
        "sql" | "lua" => ("--", ""),
        "html" | "md" => ("<!--", " -->"),
        "css" => ("/*", " */"),
        _ => ("#", ""),
    }
}

fn note_lines(target: &str, proposal: &Proposal, change: &ProposalChange) -> Vec<String> {
    let (prefix, close) = comment_style(Path::new(target));
    let mut lines = vec![
        format!("{prefix} proposal-id: {}{close}", proposal.proposal_id),
        format!("{prefix} subject: {}{close}", proposal.source_subject),
        format!("{prefix} action: {}{close}", change.action),
    ];
    if let Some(rationale) = &change.rationale {
        lines.push(format!("{prefix} rationale: {rationale}{close}"));
    }
    lines.push(String::new());
    lines
}

/// Unified diff for one change: a proposal-tagged comment block inserted
/// near the top of the target, or a scaffold when the target is absent.
fn change_diff(project_root: &Path, proposal: &Proposal, change: &ProposalChange) -> Vec<String> {
    let target = project_root.join(&change.file);
    let before: Vec<String> = fs::read_to_string(&target)
        .map(|text| text.lines().map(|l| l.to_string()).collect())
        .unwrap_or_default();
    let notes = note_lines(&change.file, proposal, change);

    let mut out = vec![
        format!("--- a/{}", change.file),
        format!("+++ b/{}", change.file),
    ];

    if before.is_empty() {
        let trailer = if change.action == "add" {
            format!("Generated artifact scaffold for {}.", proposal.title)
        } else {
            format!("Review required for {}.", proposal.title)
        };
        let body: Vec<&String> = notes.iter().collect();
        out.push(format!("@@ -0,0 +1,{} @@", body.len() + 1));
        for line in body {
            out.push(format!("+{line}"));
        }
        out.push(format!("+{trailer}"));
        return out;
    }

    // Insert after the first few lines, keeping three lines of context on
    // either side of the insertion point.
    let insert_at = before.len().min(5);
    let ctx_start = insert_at.saturating_sub(3);
    let ctx_end = (insert_at + 3).min(before.len());
    let old_count = ctx_end - ctx_start;
    let new_count = old_count + notes.len();
    out.push(format!(
        "@@ -{},{} +{},{} @@",
        ctx_start + 1,
        old_count,
        ctx_start + 1,
        new_count
    ));
    for line in &before[ctx_start..insert_at] {
        out.push(format!(" {line}"));
    }
    for line in &notes {
        out.push(format!("+{line}"));
    }
    for line in &before[insert_at..ctx_end] {
        out.push(format!(" {line}"));
    }
    out
}

fn build_patch(project_root: &Path, proposal: &Proposal) -> String {
    let mut chunks = Vec::new();
    for change in &proposal.suggested_changes {
        chunks.extend(change_diff(project_root, proposal, change));
        chunks.push(String::new());
    }
    let mut body = chunks.join("\n");
    while body.ends_with('\n') {
        body.pop();
    }
    body.push('\n');
    body
}

fn pr_title(proposal: &Proposal) -> String {
    format!(
        "[{}] {}",
        serde_json::to_value(proposal.risk.risk_level)
            .ok()
            .and_then(|v| v.as_str().map(|s| s.to_uppercase()))
            .unwrap_or_else(|| "LOW".into()),
        proposal.title
    )
}

fn pr_draft(proposal: &Proposal) -> String {
    let mut lines = vec![
        format!("# PR Draft — {}", proposal.title),
        String::new(),
        format!("PR Title: `{}`", pr_title(proposal)),
        format!("Proposal ID: `{}`", proposal.proposal_id),
        format!("Created at: `{}`", archillx_evidence::now_iso()),
        String::new(),
        "## Summary".into(),
        proposal.summary.clone(),
        String::new(),
        "## Suggested changes".into(),
    ];
    for change in &proposal.suggested_changes {
        lines.push(format!(
            "- `{}` ({}) — {}",
            change.file,
            change.action,
            change.rationale.as_deref().unwrap_or("n/a")
        ));
    }
    lines.push(String::new());
    lines.push("## Validation plan".into());
    if proposal.tests_to_add.is_empty() {
        lines.push("- Add targeted regression coverage before merge.".into());
    } else {
        for test in &proposal.tests_to_add {
            lines.push(format!("- {test}"));
        }
    }
    lines.push(String::new());
    lines.push("## Risk".into());
    lines.push(format!("- Level: **{:?}**", proposal.risk.risk_level));
    lines.push(format!("- Score: **{}**", proposal.risk.risk_score));
    for factor in &proposal.risk.factors {
        lines.push(format!("- Factor: {factor}"));
    }
    lines.push(String::new());
    lines.push("## Rollout notes".into());
    for note in &proposal.rollout_notes {
        lines.push(format!("- {note}"));
    }
    lines.push(String::new());
    lines.push("## Reviewer checklist".into());
    lines.push("- [ ] Proposed scope matches the finding / plan item".into());
    lines.push("- [ ] Added or updated targeted tests".into());
    lines.push("- [ ] Guard / baseline outputs reviewed".into());
    lines.push("- [ ] Rollback path is clear".into());
    finish(lines)
}

fn commit_message(proposal: &Proposal) -> String {
    let mut lines = vec![
        format!("evolution: {} remediation", proposal.source_subject),
        String::new(),
        format!("proposal-id: {}", proposal.proposal_id),
        format!(
            "risk-level: {}",
            serde_json::to_value(proposal.risk.risk_level)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default()
        ),
        String::new(),
        proposal.summary.clone(),
        String::new(),
        "Suggested scope:".into(),
    ];
    for change in &proposal.suggested_changes {
        lines.push(format!("- {} ({})", change.file, change.action));
    }
    finish(lines)
}

fn listing(title: &str, entries: &[String], fallback: &str) -> String {
    let mut lines = vec![format!("# {title}"), String::new()];
    if entries.is_empty() {
        lines.push(format!("- {fallback}"));
    } else {
        for entry in entries {
            lines.push(format!("- {entry}"));
        }
    }
    finish(lines)
}

fn finish(lines: Vec<String>) -> String {
    let mut body = lines.join("\n");
    while body.ends_with('\n') || body.ends_with(' ') {
        body.pop();
    }
    body.push('\n');
    body
}

/// Render (or re-render) the full artifact set for a proposal and return the
/// path map recorded on the proposal.
pub fn render_patch_artifacts(
    evidence: &EvidenceStore,
    project_root: &Path,
    proposal: &Proposal,
) -> Result<Value> {
    let dir = evidence.artifact_dir(&proposal.proposal_id);
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;

    let paths: [(&str, PathBuf); 7] = [
        ("patch", dir.join("patch.diff")),
        ("pr_draft", dir.join("pr_draft.md")),
        ("pr_title", dir.join("pr_title.txt")),
        ("commit_message", dir.join("commit_message.txt")),
        ("tests", dir.join("tests_to_add.md")),
        ("rollout", dir.join("rollout_notes.md")),
        ("risk", dir.join("risk_assessment.json")),
    ];

    fs::write(&paths[0].1, build_patch(project_root, proposal))?;
    fs::write(&paths[1].1, pr_draft(proposal))?;
    fs::write(&paths[2].1, format!("{}\n", pr_title(proposal)))?;
    fs::write(&paths[3].1, commit_message(proposal))?;
    fs::write(
        &paths[4].1,
        listing("Tests to add", &proposal.tests_to_add, "No targeted test suggestions."),
    )?;
    fs::write(
        &paths[5].1,
        listing("Rollout notes", &proposal.rollout_notes, "No rollout notes."),
    )?;
    let risk_payload = json!({
        "proposal_id": proposal.proposal_id,
        "risk_score": proposal.risk.risk_score,
        "risk_level": proposal.risk.risk_level,
        "factors": proposal.risk.factors,
        "auto_apply_allowed": proposal.risk.auto_apply_allowed,
        "approval_required": proposal.approval_required,
    });
    fs::write(
        &paths[6].1,
        format!("{}\n", serde_json::to_string_pretty(&risk_payload)?),
    )?;

    let mut path_map = serde_json::Map::new();
    for (key, path) in &paths {
        path_map.insert(key.to_string(), json!(path.display().to_string()));
    }
    let manifest = json!({
        "proposal_id": proposal.proposal_id,
        "generated_at": archillx_evidence::now_iso(),
        "paths": Value::Object(path_map.clone()),
    });
    let manifest_path = dir.join("manifest.json");
    fs::write(
        &manifest_path,
        format!("{}\n", serde_json::to_string_pretty(&manifest)?),
    )?;

    let mut out = serde_json::Map::new();
    out.insert("dir".into(), json!(dir.display().to_string()));
    out.extend(path_map);
    out.insert("manifest".into(), json!(manifest_path.display().to_string()));
    Ok(Value::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner;
    use crate::proposer::build_proposal;
    use crate::schemas::{Plan, PlanItem, Priority};

    fn proposal_for(scope: &[&str]) -> Proposal {
        let plan = Plan {
            plan_id: "plan_x".into(),
            created_at: archillx_evidence::now_iso(),
            inspection_id: "insp_x".into(),
            items: vec![PlanItem {
                priority: Priority::P2,
                category: "stability".into(),
                title: "Investigate http: 5xx burst".into(),
                subject: "http".into(),
                expected_benefit: "fewer incidents".into(),
                suggested_scope: scope.iter().map(|s| s.to_string()).collect(),
                requires_human_review: false,
                source_inspection_id: "insp_x".into(),
            }],
            evidence_path: None,
        };
        build_proposal(&plan, 0).unwrap()
    }

    #[test]
    fn renders_all_artifacts_with_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let evidence = EvidenceStore::new(dir.path());
        let proposal = proposal_for(&["src/server.rs"]);

        let paths = render_patch_artifacts(&evidence, dir.path(), &proposal).unwrap();
        for key in [
            "patch",
            "pr_draft",
            "pr_title",
            "commit_message",
            "tests",
            "rollout",
            "risk",
            "manifest",
        ] {
            let path = paths[key].as_str().unwrap();
            assert!(Path::new(path).exists(), "missing artifact {key}");
        }
        let manifest: Value =
            serde_json::from_str(&fs::read_to_string(paths["manifest"].as_str().unwrap()).unwrap())
                .unwrap();
        assert_eq!(manifest["paths"].as_object().unwrap().len(), 7);
    }

    #[test]
    fn missing_target_yields_scaffold_diff_with_rust_comments() {
        let dir = tempfile::tempdir().unwrap();
        let evidence = EvidenceStore::new(dir.path());
        let proposal = proposal_for(&["src/server.rs"]);

        let paths = render_patch_artifacts(&evidence, dir.path(), &proposal).unwrap();
        let patch = fs::read_to_string(paths["patch"].as_str().unwrap()).unwrap();
        assert!(patch.contains("--- a/src/server.rs"));
        assert!(patch.contains("@@ -0,0 +1,"));
        assert!(patch.contains(&format!("+// proposal-id: {}", proposal.proposal_id)));
    }

    #[test]
    fn existing_target_gets_insertion_hunk_with_context() {
        let dir = tempfile::tempdir().unwrap();
        let evidence = EvidenceStore::new(dir.path());
        let target_dir = dir.path().join("src");
        fs::create_dir_all(&target_dir).unwrap();
        fs::write(
            target_dir.join("server.rs"),
            "line1\nline2\nline3\nline4\nline5\nline6\nline7\n",
        )
        .unwrap();
        let proposal = proposal_for(&["src/server.rs"]);

        let paths = render_patch_artifacts(&evidence, dir.path(), &proposal).unwrap();
        let patch = fs::read_to_string(paths["patch"].as_str().unwrap()).unwrap();
        assert!(patch.contains("@@ -3,5 +3,10 @@"));
        assert!(patch.contains(" line3"));
        assert!(patch.contains(" line6"));
    }

    #[test]
    fn rerendering_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let evidence = EvidenceStore::new(dir.path());
        let proposal = proposal_for(&["src/server.rs"]);

        let first = render_patch_artifacts(&evidence, dir.path(), &proposal).unwrap();
        let patch_before = fs::read_to_string(first["patch"].as_str().unwrap()).unwrap();
        let second = render_patch_artifacts(&evidence, dir.path(), &proposal).unwrap();
        let patch_after = fs::read_to_string(second["patch"].as_str().unwrap()).unwrap();

        assert_eq!(first["patch"], second["patch"]);
        assert_eq!(patch_before, patch_after);
    }

    #[test]
    fn planner_scope_paths_render_with_matching_comment_syntax() {
        let dir = tempfile::tempdir().unwrap();
        let evidence = EvidenceStore::new(dir.path());
        let report = crate::inspector::build_report(crate::schemas::SignalSnapshot {
            created_at: archillx_evidence::now_iso(),
            readiness: serde_json::json!({"status": "degraded"}),
            migration: serde_json::json!({"status": "head"}),
            telemetry: serde_json::json!({}),
            audit_summary: serde_json::json!({}),
            gate_summary: serde_json::json!({}),
        });
        let plan = planner::build_plan(&report);
        let proposal = build_proposal(&plan, 0).unwrap();

        let paths = render_patch_artifacts(&evidence, dir.path(), &proposal).unwrap();
        let patch = fs::read_to_string(paths["patch"].as_str().unwrap()).unwrap();
        // Rust targets get `//` comments.
        assert!(patch.contains("+// proposal-id:"));
    }
}
