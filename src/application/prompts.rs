//! Prompt and intention text builders.

use std::fmt::Write as _;

use crate::domain::models::{ConflictAnalysis, DiffSummary, FeatureSpec, Task};
use crate::services::DependencySummary;

/// Longest excerpt of a conflicted file included in a prompt.
pub const MAX_FILE_EXCERPT: usize = 4000;

pub const DEV_SYSTEM_PROMPT: &str = "You are a developer agent working inside an isolated git worktree. \
Implement exactly the task you are given, keep changes focused, and leave them uncommitted; \
a reviewer commits them once the work passes review. Finish with a short summary of what you changed.";

pub const QA_SYSTEM_PROMPT: &str = "You are a QA reviewer. You inspect work but never modify files. \
Judge the work only against the task specification you are given.";

pub const MERGE_SYSTEM_PROMPT: &str = "You are a merge specialist. You analyse and resolve git merge \
conflicts while preserving the intent of both sides.";

/// Inputs to the developer prompt.
#[derive(Debug, Clone, Copy)]
pub struct DevPromptInput<'a> {
    pub task: &'a Task,
    pub project_docs: Option<&'a str>,
    pub feature_title: Option<&'a str>,
    pub feature_spec: Option<&'a FeatureSpec>,
    pub dependencies: &'a [DependencySummary],
    pub approval_notes: Option<&'a str>,
}

pub fn dev_prompt(input: &DevPromptInput<'_>) -> String {
    let mut out = String::new();

    if let Some(docs) = input.project_docs.filter(|d| !d.trim().is_empty()) {
        let _ = writeln!(out, "## Project Guidelines\n{}\n", docs.trim());
    }

    if let Some(title) = input.feature_title {
        let _ = writeln!(out, "## Feature: {title}");
    }
    if let Some(spec) = input.feature_spec.filter(|s| !s.is_empty()) {
        let _ = writeln!(out, "{}", spec.excerpt());
    }

    let task = input.task;
    let _ = writeln!(out, "## Your Task: {}\n{}\n", task.title, task.description.trim());

    if !input.dependencies.is_empty() {
        let _ = writeln!(out, "## Completed Dependencies");
        for dep in input.dependencies {
            let _ = writeln!(out, "### {} ({})\n{}", dep.title, dep.task_id, dep.summary.trim());
        }
        let _ = writeln!(out);
    }

    if let Some(feedback) = task.qa_feedback.as_deref().filter(|f| !f.trim().is_empty()) {
        let _ = writeln!(
            out,
            "## QA Feedback From Previous Attempt\nYour last attempt failed review. Address every point:\n{}\n",
            feedback.trim()
        );
    }

    if let Some(notes) = input.approval_notes.filter(|n| !n.trim().is_empty()) {
        let _ = writeln!(out, "## Reviewer Notes\n{}\n", notes.trim());
    }

    let _ = write!(
        out,
        "## Instructions\n\
         - Work only inside the current directory.\n\
         - Do not commit; leave your changes in the working tree.\n\
         - Only implement this task. Other tasks in the feature are handled separately."
    );
    out
}

pub fn qa_prompt(task_title: &str, task_spec: &str, feature_spec: Option<&FeatureSpec>, changed_files: &[String]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "## Task Under Review: {task_title}\n{}\n", task_spec.trim());

    if let Some(spec) = feature_spec.filter(|s| !s.is_empty()) {
        let _ = writeln!(
            out,
            "## Feature Context (for orientation only)\n{}",
            spec.excerpt()
        );
    }

    if changed_files.is_empty() {
        let _ = writeln!(out, "## Changed Files\nNo uncommitted changes were detected.\n");
    } else {
        let _ = writeln!(out, "## Changed Files");
        for file in changed_files {
            let _ = writeln!(out, "- {file}");
        }
        let _ = writeln!(out);
    }

    let _ = write!(
        out,
        "## Review Rules\n\
         - The task specification above is the sole pass/fail criterion.\n\
         - Do not fail the work for gaps that belong to other tasks in the same feature.\n\
         - Inspect the uncommitted diff with `git diff` and `git status` before deciding.\n\n\
         ## Response Format\n\
         QA_RESULT: PASSED or FAILED\n\
         FILES_REVIEWED: comma-separated list of files you inspected\n\
         FEEDBACK: what must change (only when FAILED)"
    );
    out
}

pub fn dev_intention(task: &Task, dependencies: &[DependencySummary], worktree_branch: Option<&str>) -> String {
    let mut out = format!("I will implement \"{}\"", task.title);
    if let Some(first) = task.description.lines().map(str::trim).find(|l| !l.is_empty()) {
        let _ = write!(out, ": {first}");
    }
    if let Some(branch) = worktree_branch {
        let _ = write!(out, " Working on branch {branch}.");
    }
    if !dependencies.is_empty() {
        let titles: Vec<&str> = dependencies.iter().map(|d| d.title.as_str()).collect();
        let _ = write!(out, " Building on: {}.", titles.join(", "));
    }
    if task.is_rework() {
        out.push_str(" This is a rework addressing QA feedback.");
    }
    out
}

pub fn merge_intention(source: &str, target: &str, diff: Option<&DiffSummary>, predicted_conflicts: &[String]) -> String {
    let mut out = format!("Merge {source} into {target}.");
    if let Some(diff) = diff {
        let _ = write!(out, " {diff}.");
    }
    if predicted_conflicts.is_empty() {
        out.push_str(" No conflicts expected.");
    } else {
        let _ = write!(
            out,
            " Expect conflicts in {} file(s): {}. They will be analysed before resolution.",
            predicted_conflicts.len(),
            predicted_conflicts.join(", ")
        );
    }
    out
}

pub fn conflict_analysis_prompt(source: &str, target: &str, excerpts: &[(String, String)]) -> String {
    let mut out = format!(
        "Merging {source} into {target} stopped on conflicts in {} file(s).\n\n",
        excerpts.len()
    );
    for (file, content) in excerpts {
        let _ = writeln!(out, "### {file}\n```\n{content}\n```\n");
    }
    let _ = write!(
        out,
        "For each file explain what each side changed and suggest a resolution: \
         \"ours\" (keep {target}), \"theirs\" (keep {source}), \"both\" (combine), or \"manual\".\n\
         Respond with JSON only:\n\
         {{\"conflicts\": [{{\"file\": \"...\", \"analysis\": \"...\", \"suggested_resolution\": \"ours|theirs|both|manual\"}}], \
         \"recommendation\": \"...\", \"auto_resolvable\": true}}"
    );
    out
}

pub fn conflict_resolution_prompt(source: &str, target: &str, analysis: &ConflictAnalysis) -> String {
    let mut out = format!(
        "Resolve the merge conflicts left by merging {source} into {target} in the current directory.\n\n"
    );
    for c in &analysis.conflicts {
        let _ = writeln!(
            out,
            "- {} (suggested: {}): {}",
            c.file, c.suggested_resolution, c.analysis
        );
    }
    let _ = write!(
        out,
        "\nOverall recommendation: {}\n\n\
         Edit each file so that no conflict markers (<<<<<<<, =======, >>>>>>>) remain and the result \
         compiles. Do not run git commands; staging and committing happen afterwards.",
        analysis.recommendation
    );
    out
}

/// Truncate file content for a prompt.
pub fn excerpt(content: &str) -> String {
    if content.chars().count() <= MAX_FILE_EXCERPT {
        return content.to_string();
    }
    let mut out: String = content.chars().take(MAX_FILE_EXCERPT).collect();
    out.push_str("\n... (truncated)");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_prompt_sections() {
        let mut task = Task::new("t2", "Add login", "Implement the login form.");
        task.qa_feedback = Some("Missing validation".into());
        let deps = vec![DependencySummary {
            task_id: "t1".into(),
            title: "Add session store".into(),
            summary: "Created SessionStore".into(),
        }];
        let prompt = dev_prompt(&DevPromptInput {
            task: &task,
            project_docs: Some("Use tabs."),
            feature_title: Some("Auth"),
            feature_spec: None,
            dependencies: &deps,
            approval_notes: None,
        });

        assert!(prompt.contains("## Project Guidelines\nUse tabs."));
        assert!(prompt.contains("## Feature: Auth"));
        assert!(prompt.contains("## Your Task: Add login"));
        assert!(prompt.contains("Created SessionStore"));
        assert!(prompt.contains("Missing validation"));
        let guidelines = prompt.find("Project Guidelines").unwrap();
        let task_pos = prompt.find("Your Task").unwrap();
        assert!(guidelines < task_pos);
    }

    #[test]
    fn test_qa_prompt_states_sole_criterion() {
        let prompt = qa_prompt("Add login", "Form submits", None, &["src/login.rs".to_string()]);
        assert!(prompt.contains("sole pass/fail criterion"));
        assert!(prompt.contains("other tasks in the same feature"));
        assert!(prompt.contains("QA_RESULT: PASSED or FAILED"));
        assert!(prompt.contains("- src/login.rs"));
    }

    #[test]
    fn test_merge_intention_mentions_conflicts() {
        let text = merge_intention("task/f1/t1", "feature/f1", None, &["a.rs".to_string()]);
        assert!(text.contains("Expect conflicts in 1 file(s): a.rs"));
        let text = merge_intention("feature/f1", "main", Some(&DiffSummary::default()), &[]);
        assert!(text.contains("No conflicts expected"));
        assert!(text.contains("0 file(s) changed"));
    }

    #[test]
    fn test_excerpt_truncates() {
        let long = "x".repeat(MAX_FILE_EXCERPT + 10);
        assert!(excerpt(&long).ends_with("(truncated)"));
        assert_eq!(excerpt("short"), "short");
    }
}
