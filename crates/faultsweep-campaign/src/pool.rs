//! Bounded worker pool with unordered result draining.
//!
//! Each phase of the campaign submits independent work units to a fixed
//! number of worker threads and consumes results in completion order.  The
//! long tail is a real cost here: one hung external process must not stall
//! a campaign of thousands, so the drain loop supports abandoning the wait
//! once a stop policy is satisfied.  Abandoned workers finish their current
//! unit, find the channels closed, and exit; their late results are dropped.
//!
//! Workers never touch shared campaign state.  Every result travels back to
//! the single coordinator that owns the site registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{info, warn};

/// How the drain loop decides it has waited long enough.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StopPolicy {
    /// Wait for every submitted unit.
    All,
    /// Abandon the wait once `fraction` of the submitted units completed.
    Fraction(f64),
    /// Abandon the wait once fewer than `tail` units remain.
    Tail(usize),
}

impl StopPolicy {
    /// Whether `done` of `submitted` results satisfies the policy.
    pub fn reached(&self, done: usize, submitted: usize) -> bool {
        match *self {
            StopPolicy::All => done >= submitted,
            StopPolicy::Fraction(fraction) => done as f64 >= fraction * submitted as f64,
            StopPolicy::Tail(tail) => submitted - done < tail,
        }
    }
}

/// Why [`WorkerPool::drain`] stopped consuming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every submitted unit completed.
    Completed,
    /// The stop policy was satisfied before the last unit.
    EarlyStopped,
    /// The cancel flag was raised.
    Cancelled,
}

/// Fixed-width pool of detached worker threads.
pub struct WorkerPool<T, R> {
    task_tx: Option<Sender<T>>,
    result_rx: Receiver<R>,
    submitted: usize,
}

impl<T: Send + 'static, R: Send + 'static> WorkerPool<T, R> {
    /// Spawn `workers` threads running `worker_fn` over submitted tasks.
    pub fn new<F>(workers: usize, worker_fn: F) -> Self
    where
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        let (task_tx, task_rx) = unbounded::<T>();
        let (result_tx, result_rx) = unbounded::<R>();
        let worker_fn = Arc::new(worker_fn);

        for idx in 0..workers.max(1) {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            let worker_fn = Arc::clone(&worker_fn);
            let spawned = std::thread::Builder::new()
                .name(format!("faultsweep-worker-{idx}"))
                .spawn(move || {
                    while let Ok(task) = task_rx.recv() {
                        let result = worker_fn(task);
                        // Coordinator gone (early stop or cancel): discard
                        // the result and wind down.
                        if result_tx.send(result).is_err() {
                            break;
                        }
                    }
                });
            if let Err(err) = spawned {
                warn!("failed to spawn worker thread {idx}: {err}");
            }
        }

        Self {
            task_tx: Some(task_tx),
            result_rx,
            submitted: 0,
        }
    }

    /// Queue one task.
    pub fn submit(&mut self, task: T) {
        if let Some(tx) = &self.task_tx {
            if tx.send(task).is_ok() {
                self.submitted += 1;
            }
        }
    }

    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// Consume results in completion order until `policy` is satisfied, the
    /// queue is exhausted, or `cancel` is raised.
    ///
    /// Closes the task queue first: the submitted set is final once draining
    /// starts.  Returns the number of results consumed.
    pub fn drain(
        mut self,
        policy: StopPolicy,
        cancel: &AtomicBool,
        mut on_result: impl FnMut(R),
    ) -> (usize, DrainOutcome) {
        // Dropping the sender lets idle workers exit once the queue empties.
        self.task_tx = None;

        let submitted = self.submitted;
        let mut done = 0;

        while done < submitted {
            if cancel.load(Ordering::SeqCst) {
                info!("cancel requested, abandoning {} in-flight units", submitted - done);
                return (done, DrainOutcome::Cancelled);
            }

            match self.result_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(result) => {
                    on_result(result);
                    done += 1;
                    if done < submitted && policy.reached(done, submitted) {
                        info!("early stop after {done}/{submitted} units");
                        return (done, DrainOutcome::EarlyStopped);
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("worker pool disconnected after {done}/{submitted} units");
                    break;
                }
            }
        }

        (done, DrainOutcome::Completed)
    }
}
