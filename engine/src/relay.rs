//! Fan-out of tree notifications to subscribers
//!
//! Each subscriber owns the receiving half of its own unbounded channel and
//! consumes it as a `Stream`. A subscriber may register under a scope and
//! then only hears values sent to scopes it matches. Subscribers that
//! dropped their receiver are pruned on the next send.

use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};

/// Broadcasts values to every live subscriber.
///
/// # Examples
///
/// ```rust
/// use entity_tree::Relay;
/// use futures::StreamExt;
///
/// let mut node_expanded_relay: Relay<u64> = Relay::default();
/// let mut node_expanded_stream = node_expanded_relay.subscribe();
/// assert_eq!(node_expanded_relay.send(42), 1);
///
/// # futures::executor::block_on(async {
/// assert_eq!(node_expanded_stream.next().await, Some(42));
/// # });
/// ```
#[derive(Debug)]
pub struct Relay<T, S = ()> {
    subscribers: Vec<(S, UnboundedSender<T>)>,
}

impl<T, S> Default for Relay<T, S> {
    fn default() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }
}

impl<T: Clone, S> Relay<T, S> {
    pub fn subscribe_scoped(&mut self, scope: S) -> UnboundedReceiver<T> {
        let (sender, receiver) = unbounded();
        self.subscribers.push((scope, sender));
        receiver
    }

    /// Deliver `value` to every subscriber whose scope `matches`, and
    /// return how many received it.
    pub fn send_scoped(&mut self, value: &T, mut matches: impl FnMut(&S) -> bool) -> usize {
        let mut delivered = 0;
        self.subscribers.retain(|(scope, sender)| {
            if !matches(scope) {
                return !sender.is_closed();
            }
            let sent = sender.unbounded_send(value.clone()).is_ok();
            delivered += usize::from(sent);
            sent
        });
        delivered
    }

    /// Registered subscribers, including any not yet pruned.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl<T: Clone> Relay<T> {
    pub fn subscribe(&mut self) -> UnboundedReceiver<T> {
        self.subscribe_scoped(())
    }

    pub fn send(&mut self, value: T) -> usize {
        self.send_scoped(&value, |_| true)
    }
}
