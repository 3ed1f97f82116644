//! Delivery-side collaborators: listener chains and failover hooks.
//!
//! The emitter holds exactly one delivery callback, an `FnMut(Batch) -> bool`.
//! Because calls are serialized by the flush critical section, the callback may
//! mutate its own captured state without further locking.
//!
//! Fanning one batch out to several downstream handlers is done with a
//! [`ListenerChain`] captured by that single callback.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Boxed delivery callback as stored by the emitter.
pub type BoxedListener<B> = Box<dyn FnMut(B) -> bool + Send>;

/// Receives individual items the downstream could not accept.
///
/// The emitter never calls this itself. A delivery callback that returns
/// `false` is expected to hand the batch's items here first.
pub trait FailoverPolicy<T>: Send + Sync {
    /// Takes ownership of one undeliverable item.
    fn deliver(&self, item: T);
}

impl<T, P: FailoverPolicy<T> + ?Sized> FailoverPolicy<T> for Arc<P> {
    fn deliver(&self, item: T) {
        (**self).deliver(item);
    }
}

/// Failover that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFailoverPolicy;

impl<T> FailoverPolicy<T> for NoopFailoverPolicy {
    fn deliver(&self, _item: T) {}
}

/// Ordered list of named listeners, all invoked for every batch.
///
/// Each listener gets its own clone of the batch (the last one gets the
/// original). A listener that returns `false` or panics is logged and does not
/// prevent the rest from running. [`deliver`](ListenerChain::deliver) returns
/// `true` only if every listener succeeded.
pub struct ListenerChain<B> {
    listeners: Vec<(String, BoxedListener<B>)>,
}

impl<B: Clone> ListenerChain<B> {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Appends a listener.
    pub fn with<F>(mut self, name: impl Into<String>, listener: F) -> Self
    where
        F: FnMut(B) -> bool + Send + 'static,
    {
        self.listeners.push((name.into(), Box::new(listener)));
        self
    }

    /// Number of listeners in the chain.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Returns `true` if no listener was added.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Invokes every listener in order.
    ///
    /// An empty chain accepts nothing and returns `false`.
    pub fn deliver(&mut self, batch: B) -> bool {
        let Some(last) = self.listeners.len().checked_sub(1) else {
            warn!("listener chain is empty, batch dropped");
            return false;
        };

        let mut all_ok = true;
        let mut batch = Some(batch);
        for (idx, (name, listener)) in self.listeners.iter_mut().enumerate() {
            let input = if idx == last {
                match batch.take() {
                    Some(b) => b,
                    None => break,
                }
            } else {
                match batch.as_ref() {
                    Some(b) => b.clone(),
                    None => break,
                }
            };

            match panic::catch_unwind(AssertUnwindSafe(|| listener(input))) {
                Ok(true) => {}
                Ok(false) => {
                    warn!(listener = %name, "listener rejected batch");
                    all_ok = false;
                }
                Err(_) => {
                    warn!(listener = %name, "listener panicked");
                    all_ok = false;
                }
            }
        }
        all_ok
    }
}

impl<B: Clone> Default for ListenerChain<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> std::fmt::Debug for ListenerChain<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerChain")
            .field(
                "listeners",
                &self.listeners.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
