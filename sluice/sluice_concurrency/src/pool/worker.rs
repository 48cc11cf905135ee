//! The bounded worker pool.
//!
//! Each admitted task runs on its own named worker thread; an admission
//! channel used as a counting semaphore caps how many run at once. The
//! workers write their outcomes into a concurrent map keyed by admission
//! index, and `wait` drains that map once the completion group settles.

use super::task::{TaskOutcome, TaskRecord};
use crate::map::ConcurrentMap;
use crate::sync::{AtomicCounter, AtomicFlag, AtomicSequence, CancelToken};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use crossbeam_utils::sync::WaitGroup;
use log::{debug, error, trace};
use sluice_core::error::{Error, PoolError};
use std::any::Any;
use std::backtrace::Backtrace;
use std::fmt::Display;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

/// The admission channel used as a counting semaphore.
///
/// Admitting a task sends a token into the bounded channel (blocking
/// while the pool is at its limit); the worker receives one token back
/// when it finishes.
struct Admission {
    slots: Sender<()>,
    release: Receiver<()>,
}

impl Admission {
    /// `None` (unbounded) when `limit` is zero.
    fn bounded(limit: usize) -> Option<Admission> {
        if limit == 0 {
            return None;
        }
        let (slots, release) = bounded(limit);
        Some(Admission { slots, release })
    }
}

/// A worker pool running tasks with bounded parallelism, cooperative
/// cancellation, and panic containment.
///
/// ```
/// use sluice_concurrency::pool::Pool;
///
/// let mut pool = Pool::<u64, String>::new().limit(2);
/// for i in 0..5 {
///     pool.go(move || Ok(i * i));
/// }
/// let records = pool.wait();
/// assert_eq!(records.len(), 5);
/// assert!(records.iter().all(|r| r.outcome.is_completed()));
/// ```
pub struct Pool<T, E> {
    cancel: CancelToken,
    cancel_on_error: bool,
    /// Configured worker cap; zero means unbounded.
    limit: usize,
    admission: Option<Admission>,
    results: Arc<ConcurrentMap<u64, TaskOutcome<T, E>>>,
    indices: Arc<AtomicSequence>,
    total: Arc<AtomicCounter>,
    active: Arc<AtomicCounter>,
    failed: Arc<AtomicCounter>,
    completions: WaitGroup,
    /// Ensures at most one synthetic `Skipped` record per cancellation.
    skip_recorded: Arc<AtomicFlag>,
}

impl<T, E> Pool<T, E>
where
    T: Send + Sync + 'static,
    E: Display + Send + Sync + 'static,
{
    /// Create an unbounded pool.
    pub fn new() -> Self {
        Self {
            cancel: CancelToken::new(),
            cancel_on_error: false,
            limit: 0,
            admission: None,
            results: Arc::new(ConcurrentMap::new()),
            indices: Arc::new(AtomicSequence::new()),
            total: Arc::new(AtomicCounter::new()),
            active: Arc::new(AtomicCounter::new()),
            failed: Arc::new(AtomicCounter::new()),
            completions: WaitGroup::new(),
            skip_recorded: Arc::new(AtomicFlag::new()),
        }
    }

    /// Cap the number of concurrently running workers; zero means
    /// unbounded.
    ///
    /// # Panics
    ///
    /// Panics if any task is active: changing the limit mid-flight is a
    /// programming error, not a recoverable condition.
    pub fn limit(mut self, max_workers: usize) -> Self {
        let active = self.active.get();
        if active != 0 {
            panic!("cannot change the worker limit with {active} tasks active");
        }
        debug!("pool: worker limit set to {max_workers}");
        self.limit = max_workers;
        self.admission = Admission::bounded(max_workers);
        self
    }

    /// Cancel the pool automatically when any task returns an error.
    ///
    /// Cancellation only suppresses future admission; tasks already
    /// running complete naturally.
    pub fn cancel_on_error(mut self) -> Self {
        self.cancel_on_error = true;
        self
    }

    /// Replace the pool's cancellation token, cancelling the old one.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel.cancel(None);
        self.cancel = token;
        self
    }

    /// Admit a task.
    ///
    /// Blocks while the pool is at its concurrency limit. If the pool
    /// has been cancelled (before or during the block), the task is
    /// refused: the first refusal per cancellation stores a synthetic
    /// [`TaskOutcome::Skipped`] record, later ones are dropped silently.
    pub fn go<F>(&self, task: F)
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            self.record_skip();
            return;
        }

        if let Some(admission) = &self.admission {
            select! {
                send(admission.slots, ()) -> sent => {
                    if sent.is_err() {
                        self.record_skip();
                        return;
                    }
                }
                recv(self.cancel.signal()) -> _ => {
                    self.record_skip();
                    return;
                }
            }
        }

        let index = self.indices.next();
        self.total.increment();
        self.active.increment();
        trace!("pool: task {index} admitted");

        let results = Arc::clone(&self.results);
        let active = Arc::clone(&self.active);
        let failed = Arc::clone(&self.failed);
        let cancel = self.cancel.clone();
        let cancel_on_error = self.cancel_on_error;
        let release = self.admission.as_ref().map(|a| a.release.clone());
        let completion = self.completions.clone();

        thread::Builder::new()
            .name(format!("sluice-worker-{index}"))
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(task));
                let outcome = match result {
                    Ok(Ok(value)) => TaskOutcome::Completed(value),
                    Ok(Err(task_error)) => {
                        failed.increment();
                        if cancel_on_error {
                            cancel.cancel(Some(Error::Pool(PoolError::Cancelled(
                                task_error.to_string(),
                            ))));
                        }
                        TaskOutcome::Failed(task_error)
                    }
                    Err(payload) => {
                        failed.increment();
                        let message = panic_message(payload.as_ref());
                        error!("worker {index}: task panicked: {message}");
                        TaskOutcome::Panicked {
                            message,
                            backtrace: Backtrace::force_capture().to_string(),
                        }
                    }
                };
                results.insert(index, outcome);
                active.decrement();
                if let Some(release) = release {
                    let _ = release.try_recv();
                }
                drop(completion);
            })
            .expect("Failed to spawn worker thread");
    }

    /// Block until every admitted task has finished, then return the
    /// accumulated records and recycle the pool for reuse.
    ///
    /// Record order is completion order, not submission order; correlate
    /// via [`TaskRecord::index`]. The previous cancellation token is
    /// cancelled (stopping any straggling admission against it) and a
    /// fresh one installed.
    pub fn wait(&mut self) -> Vec<TaskRecord<T, E>> {
        debug!("pool: waiting, {} tasks active", self.active.get());
        let completions = mem::replace(&mut self.completions, WaitGroup::new());
        completions.wait();

        self.cancel.cancel(None);
        let records = self
            .results
            .drain()
            .into_iter()
            .map(|(index, outcome)| TaskRecord {
                index,
                // Workers have finished and dropped their handles; the
                // drained Arc is the only one left.
                outcome: Arc::try_unwrap(outcome)
                    .unwrap_or_else(|_| panic!("result for task {index} still shared")),
            })
            .collect();

        self.cancel = CancelToken::new();
        self.skip_recorded = Arc::new(AtomicFlag::new());
        self.admission = Admission::bounded(self.limit);
        records
    }

    /// Cancel the pool with an optional cause.
    ///
    /// Idempotent; the first cause wins. Running tasks complete
    /// naturally, tasks admitted afterwards are refused.
    pub fn cancel(&self, cause: Option<Error>) {
        self.cancel.cancel(cause);
    }

    /// The cause recorded by the first cancellation, if any.
    pub fn cause(&self) -> Option<Arc<Error>> {
        self.cancel.cause()
    }

    /// Whether the pool has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Discard all state and make the pool as-new.
    ///
    /// Fails with [`PoolError::TasksActive`] if tasks are still running.
    pub fn reset(&mut self) -> Result<(), PoolError> {
        let active = self.active.get();
        if active != 0 {
            return Err(PoolError::TasksActive(active));
        }
        debug!("pool: reset");
        self.cancel.cancel(None);
        self.results.clear();
        self.total.reset();
        self.active.reset();
        self.failed.reset();
        self.indices.reset(0);
        self.cancel = CancelToken::new();
        self.skip_recorded = Arc::new(AtomicFlag::new());
        self.admission = Admission::bounded(self.limit);
        self.completions = WaitGroup::new();
        Ok(())
    }

    /// Tasks admitted so far (including the synthetic skipped record).
    pub fn total_tasks(&self) -> usize {
        self.total.get()
    }

    /// Tasks currently running.
    pub fn active_tasks(&self) -> usize {
        self.active.get()
    }

    /// Tasks that failed, panicked, or were skipped.
    pub fn failed_tasks(&self) -> usize {
        self.failed.get()
    }

    /// Store the one synthetic `Skipped` record for this cancellation.
    fn record_skip(&self) {
        if !self.skip_recorded.try_set() {
            return;
        }
        let cause = self
            .cancel
            .cause()
            .map(|cause| cause.to_string())
            .unwrap_or_else(|| "pool cancelled".to_string());
        let index = self.indices.next();
        self.total.increment();
        self.failed.increment();
        debug!("pool: task {index} skipped ({cause})");
        self.results.insert(index, TaskOutcome::Skipped { cause });
    }
}

impl<T, E> Default for Pool<T, E>
where
    T: Send + Sync + 'static,
    E: Display + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Render a panic payload as text, the worker-boundary downcast.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "<unknown panic>".to_string()
    }
}
