//! Thread-keyed admission control and bounded concurrent execution.
//!
//! The scheduler admits at most one in-flight job per conversation thread,
//! runs at most `max_concurrent` jobs at a time, and parks overflow in a
//! bounded FIFO queue. Admission (`ThreadBusy` / `QueueFull` / `Accepted`)
//! is decided under a single lock acquisition before `submit` returns, so
//! the very next submission observes the registration.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;

use crate::error::{Error, JobError};

/// Default bound on concurrently executing jobs.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;
/// Default bound on jobs waiting for a free slot.
pub const DEFAULT_MAX_QUEUE: usize = 10;

/// Outcome of an admission attempt.
pub enum SubmitOutcome {
    /// The thread already has an admitted job; nothing was scheduled.
    ThreadBusy,
    /// All execution slots and all queue slots are taken.
    QueueFull,
    /// The job was admitted; the handle resolves with its outcome.
    Accepted(Completion),
}

/// Caller-observable handle for an admitted job.
///
/// Resolves exactly once with the work closure's outcome, unwrapped.
pub struct Completion {
    rx: oneshot::Receiver<Result<(), Error>>,
}

impl Completion {
    /// Wait for the job to finish, returning its exact outcome.
    pub async fn wait(self) -> Result<(), Error> {
        match self.rx.await {
            Ok(outcome) => outcome,
            // The executing task vanished without reporting (panicked).
            Err(_) => Err(Error::Job(JobError::Aborted)),
        }
    }
}

struct SchedulerState {
    /// Threads with an admitted (queued or running) job.
    active_threads: HashSet<String>,
    /// Currently executing jobs.
    running: usize,
    /// Parked jobs in arrival order. A completing job hands its slot to the
    /// head waiter (incrementing `running` on its behalf) before waking it.
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// Admission gate and execution pipeline for agent jobs.
#[derive(Clone)]
pub struct AgentScheduler {
    max_concurrent: usize,
    max_queue: usize,
    state: Arc<Mutex<SchedulerState>>,
}

impl Default for AgentScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_QUEUE)
    }
}

impl AgentScheduler {
    pub fn new(max_concurrent: usize, max_queue: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            max_queue,
            state: Arc::new(Mutex::new(SchedulerState {
                active_threads: HashSet::new(),
                running: 0,
                waiters: VecDeque::new(),
            })),
        }
    }

    /// Submit a job keyed by thread id.
    ///
    /// The thread-busy check takes precedence over queue-full rejection.
    /// On `Accepted`, the closure runs on a spawned task — immediately if a
    /// slot is free, otherwise after its FIFO turn comes up. The registry
    /// entry and the slot are released together when the closure resolves,
    /// success or error.
    pub fn submit<F, Fut>(&self, thread_id: &str, work: F) -> SubmitOutcome
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        // Check, register, and claim (or queue for) a slot in one critical
        // section so no interleaved submission sees a stale registry.
        let waiter = {
            let mut state = lock(&self.state);

            if state.active_threads.contains(thread_id) {
                return SubmitOutcome::ThreadBusy;
            }
            if state.running >= self.max_concurrent && state.waiters.len() >= self.max_queue {
                return SubmitOutcome::QueueFull;
            }

            state.active_threads.insert(thread_id.to_string());
            if state.running < self.max_concurrent {
                state.running += 1;
                None
            } else {
                let (wake_tx, wake_rx) = oneshot::channel();
                state.waiters.push_back(wake_tx);
                Some(wake_rx)
            }
        };

        let (done_tx, done_rx) = oneshot::channel();
        let state = Arc::clone(&self.state);
        let thread_id = thread_id.to_string();

        tokio::spawn(async move {
            if let Some(wake_rx) = waiter {
                // The completing job increments `running` on our behalf
                // before waking us. A recv error means no job holds our
                // sender anymore, so claim the slot ourselves.
                if wake_rx.await.is_err() {
                    lock(&state).running += 1;
                }
            }

            let outcome = work().await;

            // Release the slot, free the thread, and advance the queue in
            // one critical section (slot handoff keeps the running count
            // within bounds at every instant).
            {
                let mut s = lock(&state);
                s.running -= 1;
                s.active_threads.remove(&thread_id);
                if let Some(next) = s.waiters.pop_front() {
                    s.running += 1;
                    let _ = next.send(());
                }
            }

            let _ = done_tx.send(outcome);
        });

        SubmitOutcome::Accepted(Completion { rx: done_rx })
    }

    /// Number of currently executing jobs.
    pub fn running_count(&self) -> usize {
        lock(&self.state).running
    }

    /// Number of admitted jobs waiting for a slot.
    pub fn queue_depth(&self) -> usize {
        lock(&self.state).waiters.len()
    }
}

fn lock(state: &Mutex<SchedulerState>) -> MutexGuard<'_, SchedulerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
