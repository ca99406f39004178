//! Single-flight registry for coalescing concurrent work
//!
//! Maps a string key to the list of callers currently waiting on that key.
//! The first caller to register becomes the leader and is expected to run
//! the underlying operation; when it finishes it detaches the full list and
//! delivers the same result to every caller. The registry imposes no
//! ordering beyond insertion order.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::error::{CdnError, Result};

/// Registry of in-flight operations keyed by string
///
/// `C` is whatever the leader needs to deliver results to a caller; the
/// filesystem primitives use `oneshot::Sender<Result<T>>`, the request
/// channel uses a sender of the shared serve outcome.
#[derive(Debug)]
pub struct SingleFlight<C> {
    pending: Mutex<HashMap<String, Vec<C>>>,
}

impl<C> Default for SingleFlight<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> SingleFlight<C> {
    pub fn new() -> Self {
        SingleFlight {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Append a caller under `key`
    ///
    /// Returns `true` exactly for the first caller registered for that key
    /// (the leader), `false` for every follower that attaches while the
    /// leader's operation is still in flight.
    pub fn add(&self, key: &str, caller: C) -> bool {
        let mut pending = self.pending.lock().expect("single-flight lock poisoned");
        match pending.get_mut(key) {
            Some(callers) => {
                callers.push(caller);
                false
            }
            None => {
                pending.insert(key.to_string(), vec![caller]);
                true
            }
        }
    }

    /// Atomically detach and return the full caller list for `key`
    ///
    /// Callers come back in insertion order. A caller attaching after this
    /// returns starts a fresh flight and becomes its leader.
    pub fn remove(&self, key: &str) -> Vec<C> {
        let mut pending = self.pending.lock().expect("single-flight lock poisoned");
        pending.remove(key).unwrap_or_default()
    }

    /// Number of keys with an operation currently in flight
    pub fn in_flight(&self) -> usize {
        self.pending.lock().expect("single-flight lock poisoned").len()
    }
}

impl<T: Clone> SingleFlight<oneshot::Sender<T>> {
    /// Run `op` under `key`, coalescing with any concurrent callers
    ///
    /// The leader executes `op` once and fans the cloned result out to every
    /// attached caller, itself included; followers only await the fan-out.
    async fn join<F, Fut>(&self, key: &str, op: F, lost: impl FnOnce() -> T) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let (tx, rx) = oneshot::channel();
        if self.add(key, tx) {
            let result = op().await;
            for caller in self.remove(key) {
                // A caller may have hung up; the others still get the result.
                let _ = caller.send(result.clone());
            }
        }
        rx.await.unwrap_or_else(|_| lost())
    }
}

impl<T: Clone> SingleFlight<oneshot::Sender<Result<T>>> {
    /// Coalesced execution specialized to fallible operations
    ///
    /// A vanished leader (only possible if its task is aborted mid-flight)
    /// surfaces as an authority error rather than a hang.
    pub async fn run<F, Fut>(&self, key: &str, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.join(key, op, || {
            Err(CdnError::AuthorityError(format!(
                "single-flight leader for {key} vanished"
            )))
        })
        .await
    }
}
