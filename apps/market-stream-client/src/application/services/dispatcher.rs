//! Event Dispatcher
//!
//! Delivers each decoded event to every registered handler, in registration
//! order. Handlers are kept in an observer set keyed by [`HandlerId`], so
//! removal is by identity and never shifts other handlers.
//!
//! A handler that returns an error or panics is logged and skipped; the
//! remaining handlers still run and the connection's read loop is never
//! affected.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::domain::event::StreamEvent;
use crate::domain::stream::Scope;

/// Callback invoked for every dispatched event.
pub type Handler = Arc<dyn Fn(&StreamEvent) -> anyhow::Result<()> + Send + Sync>;

/// Identity of a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

/// Outcome of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that returned `Ok`.
    pub delivered: usize,
    /// Handlers that returned `Err` or panicked.
    pub failed: usize,
}

/// Ordered observer set for one feed's events.
///
/// ```rust
/// use market_stream_client::application::services::Dispatcher;
/// use market_stream_client::domain::stream::Scope;
///
/// let dispatcher = Dispatcher::new(Scope::Market);
/// let id = dispatcher.add_handler(|event| {
///     println!("{:?}", event.stream_type);
///     Ok(())
/// });
///
/// assert!(dispatcher.remove_handler(id));
/// assert!(!dispatcher.remove_handler(id));
/// ```
pub struct Dispatcher {
    scope: Scope,
    handlers: RwLock<BTreeMap<HandlerId, Handler>>,
    next_id: AtomicU64,
}

impl Dispatcher {
    /// Create an empty dispatcher for a feed scope.
    #[must_use]
    pub const fn new(scope: Scope) -> Self {
        Self {
            scope,
            handlers: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a handler. Each call yields a distinct identity, even for
    /// the same closure.
    pub fn add_handler<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&StreamEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().insert(id, Arc::new(handler));
        tracing::trace!(scope = %self.scope, handler = id.0, "Handler added");
        id
    }

    /// Remove a handler by identity. Returns `false` if it was not wired.
    ///
    /// Takes effect from the next dispatch.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let removed = self.handlers.write().remove(&id).is_some();
        if removed {
            tracing::trace!(scope = %self.scope, handler = id.0, "Handler removed");
        }
        removed
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Deliver `event` to every handler in registration order.
    pub fn dispatch(&self, event: &StreamEvent) -> DispatchReport {
        // Handlers may add or remove handlers, so run them outside the lock.
        let handlers: Vec<(HandlerId, Handler)> = self
            .handlers
            .read()
            .iter()
            .map(|(id, handler)| (*id, Arc::clone(handler)))
            .collect();

        let mut report = DispatchReport::default();
        for (id, handler) in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    tracing::warn!(
                        scope = %self.scope,
                        handler = id.0,
                        stream_type = %event.stream_type,
                        error = %e,
                        "Handler failed"
                    );
                }
                Err(payload) => {
                    report.failed += 1;
                    tracing::warn!(
                        scope = %self.scope,
                        handler = id.0,
                        stream_type = %event.stream_type,
                        panic = panic_message(payload.as_ref()),
                        "Handler panicked"
                    );
                }
            }
        }
        report
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("scope", &self.scope)
            .field("handlers", &self.handler_count())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

// =============================================================================
// Tests
// =============================================================================
