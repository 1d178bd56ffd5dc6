//! Priority dispatcher in front of the LLM backend.
//!
//! Every LLM call goes through [`AgentRequestQueue`]. At most
//! `max_concurrent` streams are in flight; waiting requests are served by
//! ascending [`RequestPriority`] and FIFO within a band. A slot stays
//! occupied for the lifetime of the returned stream and is released when the
//! stream ends, yields an error, is cancelled or is dropped.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{Stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{PromptOptions, RequestPriority, StreamEvent};
use crate::domain::ports::{EventStream, LlmBackend};

/// Lazily produces the response stream once a slot has been granted.
pub type StreamFactory = Box<dyn FnOnce() -> BoxFuture<'static, DomainResult<EventStream>> + Send>;

/// Wrap an async closure as a [`StreamFactory`].
pub fn stream_factory<F, Fut>(f: F) -> StreamFactory
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = DomainResult<EventStream>> + Send + 'static,
{
    Box::new(move || f().boxed())
}

/// Default number of simultaneous in-flight requests.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Observability snapshot of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub active_count: usize,
    pub queue_length: usize,
    pub max_concurrent: usize,
}

/// Metadata of a registered request. The factory itself stays with the
/// caller's future and is only invoked after dispatch.
#[derive(Debug, Clone)]
pub struct QueuedRequest {
    pub id: u64,
    pub priority: RequestPriority,
    pub agent_id: String,
    pub task_id: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

struct Waiting {
    request: QueuedRequest,
    token: CancellationToken,
    grant: oneshot::Sender<DomainResult<SlotGuard>>,
}

impl PartialEq for Waiting {
    fn eq(&self, other: &Self) -> bool {
        self.request.id == other.request.id
    }
}

impl Eq for Waiting {}

impl PartialOrd for Waiting {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiting {
    // BinaryHeap is a max-heap: the lowest priority number and then the
    // earliest id must compare greatest.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .request
            .priority
            .cmp(&self.request.priority)
            .then_with(|| other.request.id.cmp(&self.request.id))
    }
}

struct InFlight {
    agent_id: String,
    token: CancellationToken,
}

#[derive(Default)]
struct QueueState {
    active: usize,
    waiting: BinaryHeap<Waiting>,
    in_flight: HashMap<u64, InFlight>,
    dispatched_total: u64,
}

struct QueueInner {
    max_concurrent: usize,
    state: Mutex<QueueState>,
    next_id: AtomicU64,
}

impl QueueInner {
    /// Hand free slots to waiting requests in priority order.
    fn dispatch_next(self: &Arc<Self>) {
        loop {
            let next = {
                let mut state = self.state.lock();
                if state.active >= self.max_concurrent {
                    return;
                }
                let Some(next) = state.waiting.pop() else {
                    return;
                };
                state.active += 1;
                state.dispatched_total += 1;
                state.in_flight.insert(
                    next.request.id,
                    InFlight {
                        agent_id: next.request.agent_id.clone(),
                        token: next.token.clone(),
                    },
                );
                next
            };

            debug!(
                request_id = next.request.id,
                priority = %next.request.priority,
                agent_id = %next.request.agent_id,
                "Dispatching queued request"
            );

            let guard = SlotGuard {
                inner: Arc::clone(self),
                request_id: next.request.id,
                released: false,
            };
            if let Err(Ok(mut guard)) = next.grant.send(Ok(guard)) {
                // Caller went away before dispatch: reclaim without recursing.
                guard.released = true;
                let mut state = self.state.lock();
                state.active = state.active.saturating_sub(1);
                state.in_flight.remove(&next.request.id);
            }
        }
    }

    fn release(self: &Arc<Self>, request_id: u64) {
        {
            let mut state = self.state.lock();
            if state.in_flight.remove(&request_id).is_none() {
                return;
            }
            state.active = state.active.saturating_sub(1);
        }
        debug!(request_id, "Released concurrency slot");
        self.dispatch_next();
    }
}

/// Occupied concurrency slot. Dropping it frees the slot and dispatches the
/// next waiting request.
pub struct SlotGuard {
    inner: Arc<QueueInner>,
    request_id: u64,
    released: bool,
}

impl SlotGuard {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.inner.release(self.request_id);
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Response stream handed back to the caller. Holds the slot until the
/// underlying stream finishes.
pub struct QueuedStream {
    inner: Option<EventStream>,
    cancelled: BoxFuture<'static, ()>,
    guard: Option<SlotGuard>,
}

impl QueuedStream {
    fn new(inner: EventStream, token: CancellationToken, guard: SlotGuard) -> Self {
        Self {
            inner: Some(inner),
            cancelled: async move { token.cancelled().await }.boxed(),
            guard: Some(guard),
        }
    }

    fn finish(&mut self) {
        self.inner = None;
        if let Some(mut guard) = self.guard.take() {
            guard.release();
        }
    }
}

impl Stream for QueuedStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        if this.cancelled.poll_unpin(cx).is_ready() {
            this.finish();
            return Poll::Ready(Some(StreamEvent::error("request cancelled")));
        }

        match inner.poll_next_unpin(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_error() {
                    this.finish();
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Priority-ordered, concurrency-bounded dispatcher for LLM requests.
#[derive(Clone)]
pub struct AgentRequestQueue {
    inner: Arc<QueueInner>,
}

impl Default for AgentRequestQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}

impl AgentRequestQueue {
    /// Create a queue with the given concurrency window (minimum 1).
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                max_concurrent: max_concurrent.max(1),
                state: Mutex::new(QueueState::default()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Register a request.
    ///
    /// Registration (and slot reservation, when one is free) happens before
    /// this returns; the returned future resolves once the request has been
    /// dispatched and its factory produced a stream. Requests aborted while
    /// waiting resolve to [`DomainError::RequestCancelled`] without the
    /// factory ever being called. A factory error frees the slot at once.
    pub fn enqueue(
        &self,
        priority: RequestPriority,
        agent_id: impl Into<String>,
        task_id: Option<String>,
        factory: StreamFactory,
    ) -> BoxFuture<'static, DomainResult<EventStream>> {
        let request = QueuedRequest {
            id: self.inner.next_id.fetch_add(1, Ordering::SeqCst),
            priority,
            agent_id: agent_id.into(),
            task_id,
            enqueued_at: Utc::now(),
        };
        let request_id = request.id;
        let token = CancellationToken::new();
        let (grant, granted) = oneshot::channel();

        debug!(
            request_id,
            priority = %request.priority,
            agent_id = %request.agent_id,
            task_id = ?request.task_id,
            "Request enqueued"
        );

        self.inner.state.lock().waiting.push(Waiting {
            request,
            token: token.clone(),
            grant,
        });
        self.inner.dispatch_next();

        Box::pin(async move {
            let guard = match granted.await {
                Ok(Ok(guard)) => guard,
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(DomainError::RequestCancelled(format!(
                        "request {request_id} dropped by queue"
                    )))
                }
            };

            if token.is_cancelled() {
                return Err(DomainError::RequestCancelled(format!(
                    "request {request_id} aborted before start"
                )));
            }

            let stream = factory().await?;
            Ok(QueuedStream::new(stream, token, guard).boxed())
        })
    }

    /// Convenience wrapper that queues a backend invocation.
    pub fn enqueue_query(
        &self,
        priority: RequestPriority,
        agent_id: impl Into<String>,
        task_id: Option<String>,
        backend: Arc<dyn LlmBackend>,
        options: PromptOptions,
    ) -> BoxFuture<'static, DomainResult<EventStream>> {
        self.enqueue(
            priority,
            agent_id,
            task_id,
            stream_factory(move || async move { backend.stream_query(options).await }),
        )
    }

    /// Cancel every request of an agent. Waiting requests are removed and
    /// rejected; in-flight streams are cancelled. Returns how many requests
    /// were affected.
    #[instrument(skip(self))]
    pub fn abort(&self, agent_id: &str) -> usize {
        self.abort_matching(|id| id == agent_id)
    }

    /// Cancel every waiting and in-flight request.
    #[instrument(skip(self))]
    pub fn abort_all(&self) -> usize {
        self.abort_matching(|_| true)
    }

    fn abort_matching(&self, matches: impl Fn(&str) -> bool) -> usize {
        let (removed, tokens) = {
            let mut state = self.inner.state.lock();
            let (removed, kept): (Vec<Waiting>, Vec<Waiting>) = std::mem::take(&mut state.waiting)
                .into_vec()
                .into_iter()
                .partition(|w| matches(&w.request.agent_id));
            state.waiting = kept.into();
            let tokens: Vec<CancellationToken> = state
                .in_flight
                .values()
                .filter(|f| matches(&f.agent_id))
                .map(|f| f.token.clone())
                .collect();
            (removed, tokens)
        };

        let affected = removed.len() + tokens.len();
        for waiting in removed {
            waiting.token.cancel();
            let _ = waiting.grant.send(Err(DomainError::RequestCancelled(format!(
                "request {} for agent {} aborted while queued",
                waiting.request.id, waiting.request.agent_id
            ))));
        }
        for token in tokens {
            token.cancel();
        }

        if affected > 0 {
            info!(affected, "Aborted requests");
        }
        affected
    }

    pub fn status(&self) -> QueueStatus {
        let state = self.inner.state.lock();
        QueueStatus {
            active_count: state.active,
            queue_length: state.waiting.len(),
            max_concurrent: self.inner.max_concurrent,
        }
    }

    /// Waiting requests in dispatch order.
    pub fn pending(&self) -> Vec<QueuedRequest> {
        let state = self.inner.state.lock();
        let mut waiting: Vec<&Waiting> = state.waiting.iter().collect();
        waiting.sort_by(|a, b| b.cmp(a));
        waiting.into_iter().map(|w| w.request.clone()).collect()
    }

    /// Total number of requests dispatched since creation.
    pub fn dispatched_total(&self) -> u64 {
        self.inner.state.lock().dispatched_total
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }
}
