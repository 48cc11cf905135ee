//! Pipeline execution: fan-out, fan-in, and the executors.
//!
//! [`ParallelSeq::range`] is the sole execution primitive. One producer
//! thread drains the source into a bounded intake channel, the workers
//! pull from intake, run the fused process, and forward survivors to a
//! bounded output channel, and the calling thread drains output into
//! the caller's callback. A `false` return from the callback raises a
//! shared stop flag; every channel wait is a timeout tick that re-checks
//! the flag, so producer and workers wind down without deadlocking on a
//! peer that has stopped draining.

use super::pipeline::ParallelSeq;
use crate::sync::AtomicFlag;
use crossbeam_channel::{bounded, RecvTimeoutError, SendTimeoutError};
use log::trace;
use sluice_core::Sequence;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How long a blocked channel operation waits before re-checking the
/// stop flag.
const STOP_CHECK_TICK: Duration = Duration::from_millis(10);

/// Bounded channel capacity per worker.
const QUEUE_DEPTH: usize = 2;

impl<S> ParallelSeq<S>
where
    S: Sequence + Send,
    S::Item: Send,
{
    /// Run the pipeline, feeding every surviving element to `f`.
    ///
    /// Elements arrive in completion order, not source order. Returning
    /// `false` from `f` stops the run: the producer stops pulling from
    /// the source and the workers stop processing (best-effort —
    /// elements already being processed are not interrupted).
    pub fn range(self, mut f: impl FnMut(S::Item) -> bool) {
        let workers = self.workers;
        let process = self.process;
        let source = self.source;
        let stop = Arc::new(AtomicFlag::new());

        let capacity = workers * QUEUE_DEPTH;
        let (intake_tx, intake_rx) = bounded::<S::Item>(capacity);
        let (output_tx, output_rx) = bounded::<S::Item>(capacity);

        thread::scope(|scope| {
            // Producer: drain the source until exhausted or stopped.
            {
                let stop = Arc::clone(&stop);
                scope.spawn(move || {
                    source.for_each_while(|item| {
                        if stop.is_set() {
                            return false;
                        }
                        let mut item = item;
                        loop {
                            match intake_tx.send_timeout(item, STOP_CHECK_TICK) {
                                Ok(()) => return true,
                                Err(SendTimeoutError::Timeout(back)) => {
                                    if stop.is_set() {
                                        return false;
                                    }
                                    item = back;
                                }
                                Err(SendTimeoutError::Disconnected(_)) => return false,
                            }
                        }
                    });
                    trace!("producer: source drained");
                });
            }

            // Workers: process elements and forward survivors.
            for id in 0..workers {
                let intake_rx = intake_rx.clone();
                let output_tx = output_tx.clone();
                let process = Arc::clone(&process);
                let stop = Arc::clone(&stop);
                scope.spawn(move || {
                    loop {
                        let item = match intake_rx.recv_timeout(STOP_CHECK_TICK) {
                            Ok(item) => item,
                            Err(RecvTimeoutError::Timeout) => {
                                if stop.is_set() {
                                    break;
                                }
                                continue;
                            }
                            Err(RecvTimeoutError::Disconnected) => break,
                        };
                        if stop.is_set() {
                            break;
                        }
                        let Some(survivor) = process(item) else {
                            continue;
                        };
                        let mut survivor = survivor;
                        loop {
                            match output_tx.send_timeout(survivor, STOP_CHECK_TICK) {
                                Ok(()) => break,
                                Err(SendTimeoutError::Timeout(back)) => {
                                    if stop.is_set() {
                                        return;
                                    }
                                    survivor = back;
                                }
                                Err(SendTimeoutError::Disconnected(_)) => return,
                            }
                        }
                    }
                    trace!("worker {id}: done");
                });
            }

            // The spawned threads hold the only remaining channel ends:
            // output closes when the last worker exits.
            drop(intake_rx);
            drop(output_tx);

            for item in output_rx.iter() {
                if !f(item) {
                    stop.set();
                    break;
                }
            }
            // Leaving the scope joins producer and workers; they exit
            // via the stop flag or channel closure.
        });
    }

    /// Collect every surviving element into a vector (unordered).
    pub fn collect(self) -> Vec<S::Item> {
        let mut out = Vec::new();
        self.range(|item| {
            out.push(item);
            true
        });
        out
    }

    /// Invoke `f` for every surviving element.
    pub fn for_each(self, mut f: impl FnMut(S::Item)) {
        self.range(|item| {
            f(item);
            true
        });
    }

    /// Count the surviving elements.
    pub fn count(self) -> usize {
        let mut n = 0;
        self.range(|_| {
            n += 1;
            true
        });
        n
    }

    /// Find an element matching the predicate, stopping the pipeline as
    /// soon as one is seen.
    ///
    /// With racing workers the winner is not necessarily the first
    /// match in source order.
    pub fn find(self, pred: impl Fn(&S::Item) -> bool) -> Option<S::Item> {
        let mut found = None;
        self.range(|item| {
            if pred(&item) {
                found = Some(item);
                false
            } else {
                true
            }
        });
        found
    }

    /// Whether any element matches; short-circuits on the first match.
    pub fn any(self, pred: impl Fn(&S::Item) -> bool) -> bool {
        self.find(pred).is_some()
    }

    /// Whether every element matches; short-circuits on the first
    /// violation.
    pub fn all(self, pred: impl Fn(&S::Item) -> bool) -> bool {
        self.find(|item| !pred(item)).is_none()
    }

    /// Fold the surviving elements on the calling thread.
    ///
    /// Elements arrive unordered, so `f` should be commutative (or
    /// order-insensitive) for a deterministic result.
    pub fn fold<A>(self, init: A, mut f: impl FnMut(A, S::Item) -> A) -> A {
        let mut acc = Some(init);
        self.range(|item| {
            let current = acc.take().unwrap();
            acc = Some(f(current, item));
            true
        });
        acc.unwrap()
    }

    /// Split the surviving elements by the predicate: matching elements
    /// left, the rest right.
    pub fn partition(self, pred: impl Fn(&S::Item) -> bool) -> (Vec<S::Item>, Vec<S::Item>) {
        let mut matching = Vec::new();
        let mut rest = Vec::new();
        self.range(|item| {
            if pred(&item) {
                matching.push(item);
            } else {
                rest.push(item);
            }
            true
        });
        (matching, rest)
    }
}
