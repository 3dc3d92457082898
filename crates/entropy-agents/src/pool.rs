use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use entropy_models::{Fingerprint, SpecialistResult, Task};

use crate::error::AgentError;

/// Cap on cached specialist results beyond the TTL bound.
const RESULT_CACHE_CAPACITY: u64 = 1024;

/// Executes one specialist task end-to-end (agent loop, tools, LLM calls).
#[async_trait]
pub trait SpecialistRunner: Send + Sync {
    async fn run(&self, task: &Task) -> Result<SpecialistResult, AgentError>;
}

/// Submission priority. Immediates sit ahead of pre-fetches in the queue
/// and are never shed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Immediate,
    Prefetch,
}

/// Observable state of one coalesced submission.
#[derive(Debug, Clone)]
pub enum SubmissionState {
    Pending,
    Done(SpecialistResult),
    Failed(String),
    Cancelled,
}

/// Non-blocking cache/in-flight probe result.
#[derive(Debug, Clone)]
pub enum SpecialistStatus {
    Ready(SpecialistResult),
    Pending,
    Absent,
}

/// Handle onto a submission. Cloneable via the pool's coalescing: every
/// submit of the same fingerprint observes the same underlying state.
#[derive(Debug, Clone)]
pub struct SpecialistFuture {
    fingerprint: Fingerprint,
    rx: watch::Receiver<SubmissionState>,
}

impl SpecialistFuture {
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Current state without waiting.
    pub fn peek(&self) -> SubmissionState {
        self.rx.borrow().clone()
    }

    /// Wait up to `timeout` for a result. Failure, cancellation, and
    /// timeout all come back as None; the caller falls back to its anchor.
    pub async fn wait(&mut self, timeout: Duration) -> Option<SpecialistResult> {
        let settled = self
            .rx
            .wait_for(|state| !matches!(state, SubmissionState::Pending));
        match tokio::time::timeout(timeout, settled).await {
            Ok(Ok(state)) => match &*state {
                SubmissionState::Done(result) => Some(result.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    fn resolved(fingerprint: Fingerprint, state: SubmissionState) -> Self {
        let (_tx, rx) = watch::channel(state);
        Self { fingerprint, rx }
    }
}

struct Queued {
    task: Task,
    fingerprint: Fingerprint,
    priority: Priority,
    tx: watch::Sender<SubmissionState>,
}

#[derive(Default)]
struct PoolState {
    inflight: HashMap<Fingerprint, watch::Receiver<SubmissionState>>,
    queue: VecDeque<Queued>,
    running: usize,
    accepting: bool,
}

struct PoolInner {
    runner: Arc<dyn SpecialistRunner>,
    results: Cache<Fingerprint, SpecialistResult>,
    state: Mutex<PoolState>,
    capacity: usize,
    queue_depth: usize,
    cancel: CancellationToken,
    worker_done: Notify,
}

/// Parallel executor for specialist tasks with a TTL'd result cache.
///
/// Workers are bounded tokio tasks; execution never blocks the caller.
/// Submissions coalesce on their fingerprint: at most one in-flight task
/// exists per fingerprint and later submits observe the same future.
pub struct SpecialistPool {
    inner: Arc<PoolInner>,
}

impl SpecialistPool {
    pub fn new(
        workers: usize,
        result_ttl: Duration,
        queue_depth: usize,
        runner: Arc<dyn SpecialistRunner>,
    ) -> Self {
        info!(workers, ttl_secs = result_ttl.as_secs(), "Initialized specialist pool");
        Self {
            inner: Arc::new(PoolInner {
                runner,
                results: Cache::builder()
                    .max_capacity(RESULT_CACHE_CAPACITY)
                    .time_to_live(result_ttl)
                    .build(),
                state: Mutex::new(PoolState {
                    accepting: true,
                    ..PoolState::default()
                }),
                capacity: workers.max(1),
                queue_depth,
                cancel: CancellationToken::new(),
                worker_done: Notify::new(),
            }),
        }
    }

    /// Submit a task. Returns the (possibly pre-existing) future for its
    /// fingerprint; a cached unexpired result resolves immediately.
    pub async fn submit(&self, task: Task, priority: Priority) -> SpecialistFuture {
        let fingerprint = task.fingerprint();

        if let Some(result) = self.inner.results.get(&fingerprint).await {
            debug!(%fingerprint, "Submission served from result cache");
            return SpecialistFuture::resolved(fingerprint, SubmissionState::Done(result));
        }

        let dispatch;
        let future;
        {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());

            if !state.accepting {
                return SpecialistFuture::resolved(fingerprint, SubmissionState::Cancelled);
            }

            if let Some(rx) = state.inflight.get(&fingerprint) {
                debug!(%fingerprint, "Coalescing onto in-flight submission");
                return SpecialistFuture {
                    fingerprint,
                    rx: rx.clone(),
                };
            }

            let (tx, rx) = watch::channel(SubmissionState::Pending);
            state.inflight.insert(fingerprint, rx.clone());
            future = SpecialistFuture { fingerprint, rx };
            let queued = Queued {
                task,
                fingerprint,
                priority,
                tx,
            };

            if state.running < self.inner.capacity {
                state.running += 1;
                dispatch = Some(queued);
            } else {
                if state.queue.len() >= self.inner.queue_depth {
                    // Shed the oldest unconsumed pre-fetch to make room.
                    if let Some(pos) = state
                        .queue
                        .iter()
                        .position(|q| q.priority == Priority::Prefetch)
                    {
                        let shed = state.queue.remove(pos).expect("position just found");
                        state.inflight.remove(&shed.fingerprint);
                        let _ = shed.tx.send(SubmissionState::Cancelled);
                        warn!(fingerprint = %shed.fingerprint, "Queue saturated, shed oldest pre-fetch");
                    } else if priority == Priority::Prefetch {
                        // Only immediates queued: a new pre-fetch is the
                        // one that gives way.
                        state.inflight.remove(&fingerprint);
                        let _ = queued.tx.send(SubmissionState::Cancelled);
                        warn!(%fingerprint, "Queue saturated with immediates, rejecting pre-fetch");
                        return future;
                    }
                }
                match priority {
                    Priority::Immediate => {
                        let pos = state
                            .queue
                            .iter()
                            .position(|q| q.priority == Priority::Prefetch)
                            .unwrap_or(state.queue.len());
                        state.queue.insert(pos, queued);
                    }
                    Priority::Prefetch => state.queue.push_back(queued),
                }
                dispatch = None;
            }
        }

        if let Some(queued) = dispatch {
            self.inner.clone().dispatch(queued);
        }
        future
    }

    /// Non-blocking probe: cached result, in-flight, or nothing. Expired
    /// cache entries are indistinguishable from never-submitted ones.
    pub async fn try_get(&self, fingerprint: Fingerprint) -> SpecialistStatus {
        if let Some(result) = self.inner.results.get(&fingerprint).await {
            return SpecialistStatus::Ready(result);
        }
        let state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.inflight.get(&fingerprint) {
            Some(rx) => match &*rx.borrow() {
                SubmissionState::Done(result) => SpecialistStatus::Ready(result.clone()),
                SubmissionState::Pending => SpecialistStatus::Pending,
                _ => SpecialistStatus::Absent,
            },
            None => SpecialistStatus::Absent,
        }
    }

    /// Number of tasks currently executing.
    pub fn running(&self) -> usize {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .running
    }

    pub fn is_accepting(&self) -> bool {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .accepting
    }

    /// Cooperative shutdown: stop intake, cancel queued work, wait for
    /// running tasks up to `grace`, then cancel them.
    pub async fn shutdown(&self, grace: Duration) {
        let drained: Vec<Queued> = {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            state.accepting = false;
            let drained: Vec<Queued> = state.queue.drain(..).collect();
            for queued in &drained {
                state.inflight.remove(&queued.fingerprint);
            }
            drained
        };
        for queued in drained {
            let _ = queued.tx.send(SubmissionState::Cancelled);
        }

        let deadline = Instant::now() + grace;
        loop {
            if self.running() == 0 {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!("Shutdown grace expired, cancelling running specialists");
                self.inner.cancel.cancel();
                break;
            }
            let _ = tokio::time::timeout(remaining, self.inner.worker_done.notified()).await;
        }
        info!("Specialist pool shut down");
    }
}

impl PoolInner {
    fn dispatch(self: Arc<Self>, queued: Queued) {
        tokio::spawn(async move {
            let Queued {
                task,
                fingerprint,
                tx,
                ..
            } = queued;

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => None,
                result = self.runner.run(&task) => Some(result),
            };

            match outcome {
                Some(Ok(result)) => {
                    self.results.insert(fingerprint, result.clone()).await;
                    debug!(%fingerprint, "Specialist task complete");
                    let _ = tx.send(SubmissionState::Done(result));
                }
                Some(Err(e)) => {
                    warn!(%fingerprint, error = %e, "Specialist task failed");
                    let _ = tx.send(SubmissionState::Failed(e.to_string()));
                }
                None => {
                    let _ = tx.send(SubmissionState::Cancelled);
                }
            }

            self.finish(fingerprint);
        });
    }

    fn finish(self: &Arc<Self>, fingerprint: Fingerprint) {
        let next = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.inflight.remove(&fingerprint);
            match state.queue.pop_front() {
                Some(next) => Some(next),
                None => {
                    state.running -= 1;
                    None
                }
            }
        };
        if let Some(next) = next {
            self.clone().dispatch(next);
        }
        self.worker_done.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use entropy_models::SpecialistKind;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Runner that waits a configurable delay and counts its runs.
    struct SlowRunner {
        delay: Duration,
        runs: AtomicUsize,
    }

    impl SlowRunner {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                runs: AtomicUsize::new(0),
            })
        }

        fn run_count(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SpecialistRunner for SlowRunner {
        async fn run(&self, task: &Task) -> Result<SpecialistResult, AgentError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(SpecialistResult {
                kind: task.kind,
                content: format!("analysis for {}", task.focused_brief),
                cost_usd: dec!(0.02),
                tokens_in: 900,
                tokens_out: 250,
                created_at: Utc::now(),
                fingerprint: task.fingerprint(),
            })
        }
    }

    fn task(brief: &str) -> Task {
        Task {
            kind: SpecialistKind::News,
            focused_brief: brief.to_string(),
            context_window: vec![],
            session_id: "s1".to_string(),
        }
    }

    fn pool(runner: Arc<SlowRunner>, workers: usize) -> SpecialistPool {
        SpecialistPool::new(workers, Duration::from_secs(300), 4, runner)
    }

    #[tokio::test]
    async fn submit_and_wait_returns_result() {
        let runner = SlowRunner::new(Duration::from_millis(10));
        let pool = pool(runner, 2);

        let mut future = pool.submit(task("brief-a"), Priority::Immediate).await;
        let result = future.wait(Duration::from_secs(1)).await.unwrap();
        assert!(result.content.contains("brief-a"));
    }

    #[tokio::test]
    async fn duplicate_submits_coalesce() {
        let runner = SlowRunner::new(Duration::from_millis(50));
        let pool = pool(runner.clone(), 2);

        let mut first = pool.submit(task("same-brief"), Priority::Immediate).await;
        let mut second = pool.submit(task("same-brief"), Priority::Immediate).await;
        assert_eq!(first.fingerprint(), second.fingerprint());

        let a = first.wait(Duration::from_secs(1)).await.unwrap();
        let b = second.wait(Duration::from_secs(1)).await.unwrap();
        assert_eq!(a.content, b.content);
        // One execution despite two submits.
        assert_eq!(runner.run_count(), 1);
    }

    #[tokio::test]
    async fn completed_result_served_from_cache() {
        let runner = SlowRunner::new(Duration::from_millis(5));
        let pool = pool(runner.clone(), 2);

        let fingerprint = task("cached-brief").fingerprint();
        let mut future = pool.submit(task("cached-brief"), Priority::Prefetch).await;
        future.wait(Duration::from_secs(1)).await.unwrap();

        match pool.try_get(fingerprint).await {
            SpecialistStatus::Ready(result) => assert!(result.content.contains("cached-brief")),
            other => panic!("expected Ready, got {other:?}"),
        }

        // A fresh submit resolves instantly from cache without a new run.
        let mut resubmit = pool.submit(task("cached-brief"), Priority::Immediate).await;
        assert!(matches!(resubmit.peek(), SubmissionState::Done(_)));
        resubmit.wait(Duration::from_millis(1)).await.unwrap();
        assert_eq!(runner.run_count(), 1);
    }

    #[tokio::test]
    async fn cache_expires_after_ttl() {
        let runner = SlowRunner::new(Duration::from_millis(1));
        let pool = SpecialistPool::new(1, Duration::from_millis(40), 4, runner);

        let fingerprint = task("expiring").fingerprint();
        let mut future = pool.submit(task("expiring"), Priority::Prefetch).await;
        future.wait(Duration::from_secs(1)).await.unwrap();
        assert!(matches!(
            pool.try_get(fingerprint).await,
            SpecialistStatus::Ready(_)
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(
            pool.try_get(fingerprint).await,
            SpecialistStatus::Absent
        ));
    }

    #[tokio::test]
    async fn try_get_reports_pending_while_running() {
        let runner = SlowRunner::new(Duration::from_millis(100));
        let pool = pool(runner, 1);

        let fingerprint = task("pending").fingerprint();
        let _future = pool.submit(task("pending"), Priority::Immediate).await;
        assert!(matches!(
            pool.try_get(fingerprint).await,
            SpecialistStatus::Pending
        ));
    }

    #[tokio::test]
    async fn parallelism_is_bounded_by_workers() {
        let runner = SlowRunner::new(Duration::from_millis(80));
        let pool = pool(runner, 2);

        for i in 0..4 {
            pool.submit(task(&format!("brief-{i}")), Priority::Immediate)
                .await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.running(), 2);
    }

    #[tokio::test]
    async fn queued_work_drains_after_running_tasks_finish() {
        let runner = SlowRunner::new(Duration::from_millis(20));
        let pool = pool(runner.clone(), 1);

        let mut futures = Vec::new();
        for i in 0..3 {
            futures.push(pool.submit(task(&format!("brief-{i}")), Priority::Immediate).await);
        }
        for mut future in futures {
            assert!(future.wait(Duration::from_secs(2)).await.is_some());
        }
        assert_eq!(runner.run_count(), 3);
    }

    #[tokio::test]
    async fn saturated_queue_sheds_oldest_prefetch_not_immediates() {
        let runner = SlowRunner::new(Duration::from_millis(100));
        // 1 worker, queue depth 2.
        let pool = SpecialistPool::new(1, Duration::from_secs(300), 2, runner);

        // Occupy the worker, then fill the queue with a pre-fetch and an
        // immediate.
        let _running = pool.submit(task("running"), Priority::Immediate).await;
        let mut prefetch = pool.submit(task("queued-prefetch"), Priority::Prefetch).await;
        let _queued_immediate = pool.submit(task("queued-imm"), Priority::Immediate).await;

        // Queue is now full; a new immediate sheds the pre-fetch.
        let _new_immediate = pool.submit(task("new-imm"), Priority::Immediate).await;

        assert!(matches!(prefetch.peek(), SubmissionState::Cancelled));
        assert!(prefetch.wait(Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn immediates_jump_ahead_of_prefetches() {
        let runner = SlowRunner::new(Duration::from_millis(30));
        let pool = SpecialistPool::new(1, Duration::from_secs(300), 4, runner);

        let _running = pool.submit(task("running"), Priority::Immediate).await;
        let mut prefetch = pool.submit(task("later-prefetch"), Priority::Prefetch).await;
        let mut immediate = pool.submit(task("urgent"), Priority::Immediate).await;

        // The immediate queued later must complete no later than the
        // pre-fetch queued earlier.
        let immediate_result = immediate.wait(Duration::from_secs(2)).await.unwrap();
        assert!(immediate_result.content.contains("urgent"));
        // Pre-fetch still completes eventually.
        assert!(prefetch.wait(Duration::from_secs(2)).await.is_some());
    }

    #[tokio::test]
    async fn shutdown_cancels_queued_and_rejects_new_submits() {
        let runner = SlowRunner::new(Duration::from_millis(50));
        let pool = SpecialistPool::new(1, Duration::from_secs(300), 4, runner.clone());

        let mut running = pool.submit(task("running"), Priority::Immediate).await;
        let mut queued = pool.submit(task("queued"), Priority::Prefetch).await;

        pool.shutdown(Duration::from_secs(1)).await;

        // The running task finished inside the grace period; the queued
        // one was cancelled without executing.
        assert!(matches!(running.peek(), SubmissionState::Done(_)));
        assert!(matches!(queued.peek(), SubmissionState::Cancelled));
        assert_eq!(runner.run_count(), 1);

        let rejected = pool.submit(task("late"), Priority::Immediate).await;
        assert!(matches!(rejected.peek(), SubmissionState::Cancelled));
        let _ = running.wait(Duration::from_millis(1)).await;
    }

    #[tokio::test]
    async fn failed_task_reports_failure_and_frees_the_worker() {
        struct FailingRunner;

        #[async_trait]
        impl SpecialistRunner for FailingRunner {
            async fn run(&self, _task: &Task) -> Result<SpecialistResult, AgentError> {
                Err(AgentError::Provider("boom".to_string()))
            }
        }

        let pool = SpecialistPool::new(1, Duration::from_secs(300), 4, Arc::new(FailingRunner));
        let mut future = pool.submit(task("doomed"), Priority::Immediate).await;
        assert!(future.wait(Duration::from_secs(1)).await.is_none());
        assert!(matches!(future.peek(), SubmissionState::Failed(_)));

        // Worker slot was released.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.running(), 0);
    }
}
