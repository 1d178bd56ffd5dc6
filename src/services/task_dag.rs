//! Task DAG store.
//!
//! Holds one dependency graph per feature. Every mutation runs under a
//! single write lock, so the cycle check and the edge insert of
//! [`TaskDagStore::add_connection`] can never interleave with another writer.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, instrument};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{DagGraph, FeatureSpec, FeatureStatus, Task, TaskStatus};

const SUMMARY_LIMIT: usize = 600;

/// A feature and its task graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub id: String,
    pub title: String,
    pub spec: FeatureSpec,
    pub status: FeatureStatus,
    pub graph: DagGraph,
}

/// Summary of a completed dependency, injected into dev prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySummary {
    pub task_id: String,
    pub title: String,
    pub summary: String,
}

/// Shared store of feature graphs.
#[derive(Default)]
pub struct TaskDagStore {
    features: RwLock<HashMap<String, FeatureRecord>>,
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let cut: String = text.chars().take(limit).collect();
    format!("{cut}...")
}

impl TaskDagStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_feature<T>(&self, feature_id: &str, f: impl FnOnce(&FeatureRecord) -> T) -> DomainResult<T> {
        let features = self.features.read();
        let record = features
            .get(feature_id)
            .ok_or_else(|| DomainError::FeatureNotFound(feature_id.to_string()))?;
        Ok(f(record))
    }

    fn with_feature_mut<T>(
        &self,
        feature_id: &str,
        f: impl FnOnce(&mut FeatureRecord) -> DomainResult<T>,
    ) -> DomainResult<T> {
        let mut features = self.features.write();
        let record = features
            .get_mut(feature_id)
            .ok_or_else(|| DomainError::FeatureNotFound(feature_id.to_string()))?;
        f(record)
    }

    /// Register a feature with an empty graph.
    #[instrument(skip(self, spec))]
    pub fn create_feature(&self, feature_id: &str, title: &str, spec: FeatureSpec) -> DomainResult<()> {
        let mut features = self.features.write();
        if features.contains_key(feature_id) {
            return Err(DomainError::ValidationFailed(format!(
                "feature {feature_id} already exists"
            )));
        }
        features.insert(
            feature_id.to_string(),
            FeatureRecord {
                id: feature_id.to_string(),
                title: title.to_string(),
                spec,
                status: FeatureStatus::Planning,
                graph: DagGraph::new(),
            },
        );
        info!(feature_id, "Feature created");
        Ok(())
    }

    pub fn feature(&self, feature_id: &str) -> DomainResult<FeatureRecord> {
        self.with_feature(feature_id, Clone::clone)
    }

    pub fn feature_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.features.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Snapshot of a feature's graph.
    pub fn graph(&self, feature_id: &str) -> DomainResult<DagGraph> {
        self.with_feature(feature_id, |r| r.graph.clone())
    }

    pub fn feature_spec(&self, feature_id: &str) -> DomainResult<FeatureSpec> {
        self.with_feature(feature_id, |r| r.spec.clone())
    }

    pub fn feature_status(&self, feature_id: &str) -> DomainResult<FeatureStatus> {
        self.with_feature(feature_id, |r| r.status)
    }

    pub fn set_feature_status(&self, feature_id: &str, status: FeatureStatus) -> DomainResult<()> {
        self.with_feature_mut(feature_id, |r| {
            if r.status != status {
                info!(feature_id, from = %r.status, to = %status, "Feature status changed");
                r.status = status;
            }
            Ok(())
        })
    }

    pub fn add_task(&self, feature_id: &str, task: Task) -> DomainResult<()> {
        self.with_feature_mut(feature_id, |r| r.graph.add_task(task))
    }

    /// Remove a task and its incident edges.
    pub fn remove_task(&self, feature_id: &str, task_id: &str) -> DomainResult<Task> {
        self.with_feature_mut(feature_id, |r| r.graph.remove_task(task_id))
    }

    pub fn get_task(&self, feature_id: &str, task_id: &str) -> DomainResult<Task> {
        self.with_feature(feature_id, |r| r.graph.get_task(task_id).cloned())?
            .ok_or_else(|| DomainError::TaskNotFound(task_id.to_string()))
    }

    /// Add a dependency edge `from -> to`.
    ///
    /// Rejected with [`DomainError::DependencyCycle`] when the edge would
    /// close a cycle; the graph is unchanged in that case. A `ready` target
    /// whose new parent is incomplete goes back to `blocked`. Returns
    /// `false` if the edge already existed.
    #[instrument(skip(self))]
    pub fn add_connection(&self, feature_id: &str, from: &str, to: &str) -> DomainResult<bool> {
        self.with_feature_mut(feature_id, |r| {
            let added = r.graph.add_connection(from, to)?;
            if added {
                let parent_done = r.graph.get_task(from).is_some_and(|t| t.status.is_completed());
                if let Some(target) = r.graph.get_task_mut(to) {
                    if !parent_done && target.status == TaskStatus::Ready {
                        target
                            .transition_to(TaskStatus::Blocked)
                            .map_err(|reason| DomainError::invalid_transition(TaskStatus::Ready, TaskStatus::Blocked, reason))?;
                        debug!(task_id = to, "Task re-blocked by new dependency");
                    }
                }
            }
            Ok(added)
        })
    }

    pub fn remove_connection(&self, feature_id: &str, from: &str, to: &str) -> DomainResult<bool> {
        self.with_feature_mut(feature_id, |r| Ok(r.graph.remove_connection(from, to)))
    }

    /// Transition a task. Returns the previous status.
    #[instrument(skip(self))]
    pub fn update_task_status(&self, feature_id: &str, task_id: &str, status: TaskStatus) -> DomainResult<TaskStatus> {
        self.with_feature_mut(feature_id, |r| {
            let task = r
                .graph
                .get_task_mut(task_id)
                .ok_or_else(|| DomainError::TaskNotFound(task_id.to_string()))?;
            let previous = task.status;
            task.transition_to(status)
                .map_err(|reason| DomainError::invalid_transition(previous, status, reason))?;

            if status == TaskStatus::InProgress && r.status == FeatureStatus::Planning {
                r.status = FeatureStatus::InProgress;
            }
            if previous != status {
                debug!(feature_id, task_id, from = %previous, to = %status, "Task status changed");
            }
            Ok(previous)
        })
    }

    fn update_task(&self, feature_id: &str, task_id: &str, f: impl FnOnce(&mut Task)) -> DomainResult<()> {
        self.with_feature_mut(feature_id, |r| {
            let task = r
                .graph
                .get_task_mut(task_id)
                .ok_or_else(|| DomainError::TaskNotFound(task_id.to_string()))?;
            f(task);
            task.updated_at = chrono::Utc::now();
            Ok(())
        })
    }

    pub fn set_qa_feedback(&self, feature_id: &str, task_id: &str, feedback: impl Into<String>) -> DomainResult<()> {
        let feedback = feedback.into();
        self.update_task(feature_id, task_id, |t| t.qa_feedback = Some(feedback))
    }

    pub fn clear_qa_feedback(&self, feature_id: &str, task_id: &str) -> DomainResult<()> {
        self.update_task(feature_id, task_id, |t| t.qa_feedback = None)
    }

    pub fn set_execution_summary(&self, feature_id: &str, task_id: &str, summary: impl Into<String>) -> DomainResult<()> {
        let summary = summary.into();
        self.update_task(feature_id, task_id, |t| t.execution_summary = Some(summary))
    }

    /// Summaries of the completed parents of a task.
    pub fn dependency_context(&self, feature_id: &str, task_id: &str) -> DomainResult<Vec<DependencySummary>> {
        self.with_feature(feature_id, |r| dependency_context(&r.graph, task_id))
    }

    pub fn ready_tasks(&self, feature_id: &str) -> DomainResult<Vec<Task>> {
        self.with_feature(feature_id, |r| r.graph.ready_tasks().into_iter().cloned().collect())
    }

    pub fn is_ready(&self, feature_id: &str, task_id: &str) -> DomainResult<bool> {
        self.with_feature(feature_id, |r| r.graph.is_ready(task_id))
    }

    /// Move every blocked dependent of `task_id` whose parents are now all
    /// completed to `ready`. Returns the promoted ids.
    #[instrument(skip(self))]
    pub fn promote_ready_dependents(&self, feature_id: &str, task_id: &str) -> DomainResult<Vec<String>> {
        self.with_feature_mut(feature_id, |r| {
            let candidates: Vec<String> = r
                .graph
                .dependents_of(task_id)
                .into_iter()
                .filter(|t| t.status == TaskStatus::Blocked)
                .map(|t| t.id.clone())
                .collect();

            let mut promoted = Vec::new();
            for id in candidates {
                if !r.graph.is_ready(&id) {
                    continue;
                }
                if let Some(task) = r.graph.get_task_mut(&id) {
                    if task.transition_to(TaskStatus::Ready).is_ok() {
                        promoted.push(id);
                    }
                }
            }
            if !promoted.is_empty() {
                info!(feature_id, ?promoted, "Dependents promoted to ready");
            }
            Ok(promoted)
        })
    }

    pub fn all_tasks_completed(&self, feature_id: &str) -> DomainResult<bool> {
        self.with_feature(feature_id, |r| r.graph.all_completed())
    }

    /// Promote the feature to `completed` once every task is completed.
    /// Returns whether the feature is now completed.
    pub fn complete_feature_if_done(&self, feature_id: &str) -> DomainResult<bool> {
        self.with_feature_mut(feature_id, |r| {
            if !r.graph.all_completed() {
                return Ok(false);
            }
            if matches!(r.status, FeatureStatus::Planning | FeatureStatus::InProgress) {
                info!(feature_id, "All tasks completed; feature completed");
                r.status = FeatureStatus::Completed;
            }
            Ok(true)
        })
    }
}

/// Summaries of the completed parents of `task_id` in `graph`.
pub fn dependency_context(graph: &DagGraph, task_id: &str) -> Vec<DependencySummary> {
    graph
        .completed_dependencies(task_id)
        .into_iter()
        .map(|t| DependencySummary {
            task_id: t.id.clone(),
            title: t.title.clone(),
            summary: truncate(
                t.execution_summary.as_deref().unwrap_or(&t.description),
                SUMMARY_LIMIT,
            ),
        })
        .collect()
}
