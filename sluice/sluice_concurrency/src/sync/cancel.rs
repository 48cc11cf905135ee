//! Cooperative cancellation.
//!
//! A [`CancelToken`] is a clonable handle over a shared cancellation
//! state: an atomic flag for cheap polling, a first-wins cause slot, and
//! a broadcast channel for blocking waits. Cancellation never interrupts
//! running code; components poll the flag or select on the signal at
//! their natural suspension points.

use crate::sync::atomic::AtomicFlag;
use crossbeam_channel::{bounded, Receiver, Sender};
use log::debug;
use parking_lot::{Mutex, RwLock};
use sluice_core::error::{Error, PoolError};
use std::sync::Arc;

/// Default cause installed when `cancel` is called without one.
const DEFAULT_CAUSE: &str = "cancelled";

/// A clonable cooperative cancellation handle.
///
/// All clones observe the same cancellation: the first `cancel` call
/// wins, records its cause, and unblocks every thread selecting on
/// [`signal`](Self::signal). Later calls are no-ops.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

struct CancelInner {
    /// Fast-path flag polled at suspension points.
    cancelled: AtomicFlag,
    /// Cause recorded by the winning `cancel` call.
    cause: RwLock<Option<Arc<Error>>>,
    /// Held sender; dropping it closes the signal channel, which is how
    /// cancellation broadcasts to every receiver clone at once.
    gate: Mutex<Option<Sender<()>>>,
    /// Receiver side of the signal channel, for `select!` waits.
    signal: Receiver<()>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token.
    pub fn new() -> Self {
        let (gate, signal) = bounded(0);
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicFlag::new(),
                cause: RwLock::new(None),
                gate: Mutex::new(Some(gate)),
                signal,
            }),
        }
    }

    /// Cancel, recording `cause` (or a generic "cancelled" cause).
    ///
    /// Idempotent: only the first call records a cause and fires the
    /// signal; later calls return without effect.
    pub fn cancel(&self, cause: Option<Error>) {
        let mut gate = self.inner.gate.lock();
        if gate.is_none() {
            return;
        }
        let cause = cause.unwrap_or(Error::Pool(PoolError::Cancelled(DEFAULT_CAUSE.to_string())));
        debug!("cancellation fired: {cause}");
        *self.inner.cause.write() = Some(Arc::new(cause));
        self.inner.cancelled.set();
        // Dropping the sender closes the channel and wakes all waiters.
        gate.take();
    }

    /// Check whether cancellation has fired.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.is_set()
    }

    /// The cause recorded by the first `cancel` call, if any.
    pub fn cause(&self) -> Option<Arc<Error>> {
        self.inner.cause.read().clone()
    }

    /// The broadcast signal, for use in `crossbeam_channel::select!`.
    ///
    /// The channel never carries a message; a receive completing (with a
    /// disconnect error) means cancellation has fired.
    pub fn signal(&self) -> &Receiver<()> {
        &self.inner.signal
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
