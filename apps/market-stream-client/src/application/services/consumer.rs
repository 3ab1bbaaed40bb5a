//! Consumer Adapter
//!
//! Lifecycle object for callers that come and go (views, widgets, tasks)
//! and want the events of one stream key from a shared feed.
//!
//! Attaching connects the feed, takes a hold on the key in the feed's
//! [`ConsumerLedger`](crate::domain::subscription::ConsumerLedger), makes
//! sure the key is subscribed, and wires a filtering handler into the feed's
//! dispatcher. Detaching releases the hold; the feed is only told to
//! unsubscribe once no other consumer holds the key, so one consumer's
//! teardown never starves another.

use tokio::sync::mpsc;

use crate::application::ports::Feed;
use crate::application::services::dispatcher::HandlerId;
use crate::domain::event::StreamEvent;
use crate::domain::stream::{StreamKey, WrongScope};
use crate::domain::subscription::ConsumerId;

#[derive(Debug)]
struct Attachment {
    key: StreamKey,
    handler: HandlerId,
}

/// One consumer of one stream key on a feed.
///
/// Dropping the adapter detaches it.
///
/// ```rust,ignore
/// let mut consumer = ConsumerAdapter::new(registry.market_feed());
/// consumer.attach("ethusdc@trade".parse()?, |event| {
///     println!("{event:?}");
///     Ok(())
/// })?;
///
/// // Symbol changed: old key is detached before the new one attaches.
/// consumer.attach("btcusdc@trade".parse()?, |_| Ok(()))?;
/// ```
#[derive(Debug)]
pub struct ConsumerAdapter<F: Feed> {
    feed: F,
    id: ConsumerId,
    attachment: Option<Attachment>,
}

impl<F: Feed> ConsumerAdapter<F> {
    /// Create a detached consumer of `feed`.
    #[must_use]
    pub fn new(feed: F) -> Self {
        let id = feed.consumers().register();
        Self {
            feed,
            id,
            attachment: None,
        }
    }

    /// Forward events matching `key` to `on_event`.
    ///
    /// Any previous attachment is detached first, even when `key` is the
    /// same.
    ///
    /// # Errors
    ///
    /// Returns an error if `key` belongs to the other scope. The feed is
    /// left untouched and any previous attachment stays in place.
    pub fn attach<H>(&mut self, key: StreamKey, on_event: H) -> Result<(), WrongScope>
    where
        H: Fn(&StreamEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        key.ensure_scope(self.feed.scope())?;
        self.detach();

        self.feed.connect();
        // Always sent: the feed may have been disconnected (and its set
        // cleared) since another consumer took the key.
        self.feed.subscribe(key.clone())?;
        self.feed.consumers().add(self.id, &key);

        let filter = key.clone();
        let handler = self.feed.dispatcher().add_handler(move |event| {
            if event.matches(&filter) {
                on_event(event)
            } else {
                Ok(())
            }
        });

        tracing::debug!(
            scope = %self.feed.scope(),
            consumer = self.id,
            stream = %key,
            "Consumer attached"
        );
        self.attachment = Some(Attachment { key, handler });
        Ok(())
    }

    /// Attach and receive matching events through a channel instead of a
    /// callback.
    ///
    /// Events are dropped once the receiver is gone.
    ///
    /// # Errors
    ///
    /// Returns an error if `key` belongs to the other scope.
    pub fn attach_channel(
        &mut self,
        key: StreamKey,
    ) -> Result<mpsc::UnboundedReceiver<StreamEvent>, WrongScope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.attach(key, move |event| {
            // Receiver gone: nothing left to notify.
            let _ = tx.send(event.clone());
            Ok(())
        })?;
        Ok(rx)
    }

    /// Stop forwarding events. Safe to call any number of times.
    pub fn detach(&mut self) {
        let Some(Attachment { key, handler }) = self.attachment.take() else {
            return;
        };

        self.feed.dispatcher().remove_handler(handler);
        let last_holder = self.feed.consumers().remove(self.id, &key);
        if last_holder {
            if let Err(e) = self.feed.unsubscribe(key.clone()) {
                tracing::warn!(error = %e, "Unsubscribe rejected");
            }
        }

        tracing::debug!(
            scope = %self.feed.scope(),
            consumer = self.id,
            stream = %key,
            unsubscribed = last_holder,
            "Consumer detached"
        );
    }

    /// Key currently attached, if any.
    #[must_use]
    pub fn stream_key(&self) -> Option<&StreamKey> {
        self.attachment.as_ref().map(|a| &a.key)
    }

    /// Whether the consumer is attached.
    #[must_use]
    pub const fn is_attached(&self) -> bool {
        self.attachment.is_some()
    }

    /// Consumer identity within the feed's ledger.
    #[must_use]
    pub const fn id(&self) -> ConsumerId {
        self.id
    }

    /// Feed this consumer reads from.
    #[must_use]
    pub const fn feed(&self) -> &F {
        &self.feed
    }
}

impl<F: Feed> Drop for ConsumerAdapter<F> {
    fn drop(&mut self) {
        self.detach();
    }
}

// =============================================================================
// Tests
// =============================================================================
