//! Orchestration session: one set of shared services passed to every agent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::adapters::substrates::build_backend;
use crate::adapters::GitVersionControl;
use crate::domain::errors::DomainResult;
use crate::domain::models::Config;
use crate::domain::ports::{LlmBackend, VersionControl};
use crate::services::{
    AgentPool, AgentRequestQueue, DependencyCascade, FixedBackoff, MessageBus, PoolPolicy,
    TaskDagStore,
};

use super::dev_agent::{DevAgent, DevAgentOptions};
use super::events::{AgentEvent, Observers};
use super::feature_merge_agent::FeatureMergeAgent;
use super::merge_agent::MergeAgent;
use super::qa_agent::{QaAgent, QaOptions};

/// What `shutdown` cleaned up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub aborted_requests: usize,
    pub terminated_agents: usize,
}

struct SessionInner {
    config: Config,
    queue: AgentRequestQueue,
    pool: AgentPool,
    bus: MessageBus,
    dag: Arc<TaskDagStore>,
    vcs: Arc<dyn VersionControl>,
    backend: Arc<dyn LlmBackend>,
    observers: Observers,
    staging_retry: FixedBackoff,
    cascade: DependencyCascade,
    shut_down: AtomicBool,
}

/// Shared services of one orchestration run. Cheap to clone.
#[derive(Clone)]
pub struct OrchestrationSession {
    inner: Arc<SessionInner>,
}

impl OrchestrationSession {
    pub fn new(config: Config, vcs: Arc<dyn VersionControl>, backend: Arc<dyn LlmBackend>) -> Self {
        let bus = MessageBus::new();
        let dag = Arc::new(TaskDagStore::new());
        let cascade = DependencyCascade::attach(&bus, Arc::clone(&dag));

        info!(
            max_concurrent = config.queue.max_concurrent,
            pool_policy = ?config.pool.policy,
            backend = backend.name(),
            "Orchestration session created"
        );

        Self {
            inner: Arc::new(SessionInner {
                queue: AgentRequestQueue::new(config.queue.max_concurrent),
                pool: AgentPool::with_event_capacity(
                    PoolPolicy::from_config(&config.pool),
                    config.pool.event_capacity,
                ),
                staging_retry: FixedBackoff::from_millis(&config.staging_retry.delays_ms),
                config,
                bus,
                dag,
                vcs,
                backend,
                observers: Observers::new(),
                cascade,
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Build the git adapter and backend named by the configuration.
    pub fn from_config(config: Config) -> DomainResult<Self> {
        let vcs = Arc::new(GitVersionControl::new(&config.git)?);
        let backend = build_backend(&config.backend, &config.agents);
        Ok(Self::new(config, vcs, backend))
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn queue(&self) -> &AgentRequestQueue {
        &self.inner.queue
    }

    pub fn pool(&self) -> &AgentPool {
        &self.inner.pool
    }

    pub fn bus(&self) -> &MessageBus {
        &self.inner.bus
    }

    pub fn dag(&self) -> &Arc<TaskDagStore> {
        &self.inner.dag
    }

    pub fn vcs(&self) -> &Arc<dyn VersionControl> {
        &self.inner.vcs
    }

    pub fn backend(&self) -> &Arc<dyn LlmBackend> {
        &self.inner.backend
    }

    pub fn cascade(&self) -> &DependencyCascade {
        &self.inner.cascade
    }

    pub fn staging_retry(&self) -> &FixedBackoff {
        &self.inner.staging_retry
    }

    pub(crate) fn observers(&self) -> &Observers {
        &self.inner.observers
    }

    /// Observe events from every agent of this session.
    pub fn on_event<F>(&self, observer: F)
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.inner.observers.add(observer);
    }

    pub fn dev_agent(&self, feature_id: &str, task_id: &str, options: DevAgentOptions) -> DevAgent {
        DevAgent::new(self.clone(), feature_id, task_id, options)
    }

    pub fn qa_agent(&self, options: QaOptions) -> QaAgent {
        QaAgent::new(self.clone(), options)
    }

    pub fn merge_agent(&self, feature_id: &str, task_id: &str) -> MergeAgent {
        MergeAgent::for_task(self.clone(), feature_id, task_id)
    }

    pub fn feature_merge_agent(&self, feature_id: &str) -> FeatureMergeAgent {
        FeatureMergeAgent::new(self.clone(), feature_id)
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Cancel all queued and in-flight requests, terminate every live agent
    /// and stop the dependency cascade. Idempotent.
    #[instrument(skip(self))]
    pub fn shutdown(&self) -> ShutdownReport {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return ShutdownReport::default();
        }
        let report = ShutdownReport {
            aborted_requests: self.inner.queue.abort_all(),
            terminated_agents: self.inner.pool.terminate_all(),
        };
        self.inner.cascade.detach();
        info!(
            aborted_requests = report.aborted_requests,
            terminated_agents = report.terminated_agents,
            "Orchestration session shut down"
        );
        report
    }
}

impl std::fmt::Debug for OrchestrationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationSession")
            .field("backend", &self.inner.backend.name())
            .field("queue", &self.inner.queue.status())
            .field("pool", &self.inner.pool.get_status())
            .finish()
    }
}
