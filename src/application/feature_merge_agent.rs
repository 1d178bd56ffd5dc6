//! Feature branch into main.

use std::ops::Deref;

use super::merge_agent::{MergeAgent, MergeScope};
use super::session::OrchestrationSession;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::FeatureStatus;

/// Merge agent at feature scope. Conflicts are resolved automatically by
/// default, and a successful merge moves the feature to `merged`.
#[derive(Clone, Debug)]
pub struct FeatureMergeAgent(MergeAgent);

impl FeatureMergeAgent {
    pub fn new(session: OrchestrationSession, feature_id: &str) -> Self {
        Self(MergeAgent::for_feature(session, feature_id))
    }

    /// Refuse to merge a feature whose tasks are not all completed.
    pub fn ensure_feature_complete(&self, session: &OrchestrationSession) -> DomainResult<()> {
        let feature_id = self.0.feature_id();
        let status = session.dag().feature_status(feature_id)?;
        if matches!(status, FeatureStatus::Completed | FeatureStatus::Merged)
            || session.dag().all_tasks_completed(feature_id)?
        {
            return Ok(());
        }
        Err(DomainError::ValidationFailed(format!(
            "feature {feature_id} still has unfinished tasks"
        )))
    }

    pub fn into_inner(self) -> MergeAgent {
        self.0
    }
}

impl Deref for FeatureMergeAgent {
    type Target = MergeAgent;

    fn deref(&self) -> &MergeAgent {
        &self.0
    }
}

impl From<FeatureMergeAgent> for MergeAgent {
    fn from(agent: FeatureMergeAgent) -> Self {
        agent.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ScriptedBackend;
    use crate::domain::models::{Config, FeatureSpec, Task, TaskStatus};
    use crate::domain::ports::VersionControl;
    use std::sync::Arc;

    fn session() -> OrchestrationSession {
        let config = Config::default();
        let vcs: Arc<dyn VersionControl> =
            Arc::new(crate::adapters::GitVersionControl::new(&config.git).unwrap());
        OrchestrationSession::new(config, vcs, Arc::new(ScriptedBackend::new()))
    }

    #[test]
    fn test_feature_scope_defaults() {
        let s = session();
        let agent = s.feature_merge_agent("f1");
        assert_eq!(agent.scope(), &MergeScope::Feature);
        assert!(agent.auto_resolve());
        assert_eq!(agent.subject_id(), "f1");
    }

    #[test]
    fn test_refuses_incomplete_feature() {
        let s = session();
        s.dag().create_feature("f1", "Auth", FeatureSpec::default()).unwrap();
        s.dag()
            .add_task("f1", Task::new("t1", "Login", "").with_status(TaskStatus::Ready))
            .unwrap();

        let agent = s.feature_merge_agent("f1");
        assert!(agent.ensure_feature_complete(&s).is_err());

        s.dag().update_task_status("f1", "t1", TaskStatus::InProgress).unwrap();
        s.dag().update_task_status("f1", "t1", TaskStatus::ReadyForMerge).unwrap();
        s.dag().update_task_status("f1", "t1", TaskStatus::Completed).unwrap();
        assert!(agent.ensure_feature_complete(&s).is_ok());
    }
}
