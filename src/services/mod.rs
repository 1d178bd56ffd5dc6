//! Services: the shared coordination primitives of an orchestration session.

pub mod agent_pool;
pub mod dependency_cascade;
pub mod message_bus;
pub mod request_queue;
pub mod retry;
pub mod task_dag;

pub use agent_pool::{AgentPool, PoolEvent, PoolPolicy, ResourceHandle};
pub use dependency_cascade::{CascadeEvent, DependencyCascade};
pub use message_bus::{Channel, MessageBus, MessageHandler, Subscription};
pub use request_queue::{
    stream_factory, AgentRequestQueue, QueueStatus, QueuedRequest, StreamFactory,
    DEFAULT_MAX_CONCURRENT,
};
pub use retry::FixedBackoff;
pub use task_dag::{DependencySummary, FeatureRecord, TaskDagStore};
