//! Feature specification, referenced read-only by the agents.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a feature (a DAG of tasks merged into one branch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureStatus {
    #[default]
    Planning,
    InProgress,
    /// Every task merged into the feature branch
    Completed,
    /// Feature branch merged into main
    Merged,
}

impl FeatureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Merged => "merged",
        }
    }
}

impl fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptanceCriterion {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub passed: bool,
}

/// Structured feature description consumed by prompt builders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSpec {
    pub goals: Vec<String>,
    pub requirements: Vec<Requirement>,
    pub constraints: Vec<String>,
    pub acceptance_criteria: Vec<AcceptanceCriterion>,
    pub history: Vec<String>,
}

impl FeatureSpec {
    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
            && self.requirements.is_empty()
            && self.constraints.is_empty()
            && self.acceptance_criteria.is_empty()
    }

    /// Markdown excerpt used in agent prompts. History is omitted.
    pub fn excerpt(&self) -> String {
        let mut out = String::new();
        if !self.goals.is_empty() {
            out.push_str("### Goals\n");
            for goal in &self.goals {
                out.push_str(&format!("- {goal}\n"));
            }
        }
        if !self.requirements.is_empty() {
            out.push_str("### Requirements\n");
            for req in &self.requirements {
                let mark = if req.completed { "x" } else { " " };
                out.push_str(&format!("- [{mark}] {}: {}\n", req.id, req.description));
            }
        }
        if !self.constraints.is_empty() {
            out.push_str("### Constraints\n");
            for c in &self.constraints {
                out.push_str(&format!("- {c}\n"));
            }
        }
        if !self.acceptance_criteria.is_empty() {
            out.push_str("### Acceptance Criteria\n");
            for ac in &self.acceptance_criteria {
                let mark = if ac.passed { "x" } else { " " };
                out.push_str(&format!("- [{mark}] {}: {}\n", ac.id, ac.description));
            }
        }
        out
    }
}
