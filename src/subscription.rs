use crate::broker::Message;
use crate::macros::*;

/// A live view over a [`Broker`]'s stream, starting at the index requested in
/// [`subscribe_from`].
///
/// Messages arrive strictly in index order: first the backlog which was still buffered when the
/// subscription was registered, then every message published afterwards. [`recv`] returns `None`
/// once the delivery channel is closed, which happens after [`unsubscribe`], when the broker
/// stops, or when a slow subscriber is cut off under [`SlowSubscriberPolicy::Disconnect`].
///
/// A subscription is also a [`Stream`] of [`Message`]s.
///
/// [`Broker`]: crate::Broker
/// [`subscribe_from`]: crate::Broker::subscribe_from
/// [`recv`]: Self::recv
/// [`unsubscribe`]: Self::unsubscribe
/// [`SlowSubscriberPolicy::Disconnect`]: crate::SlowSubscriberPolicy::Disconnect
/// [`Stream`]: futures::Stream
pub struct Subscription<T> {
    id: u64,
    delivery: tokio::sync::mpsc::Receiver<Message<T>>,
    unsubscribe: tokio::sync::mpsc::UnboundedSender<u64>,
    unsubscribed: bool,
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pending", &self.delivery.len())
            .field("unsubscribed", &self.unsubscribed)
            .finish()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl<T> Subscription<T> {
    pub(crate) fn new(
        id: u64,
        delivery: tokio::sync::mpsc::Receiver<Message<T>>,
        unsubscribe: tokio::sync::mpsc::UnboundedSender<u64>,
    ) -> Self {
        Self { id, delivery, unsubscribe, unsubscribed: false }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Receives the next message, waiting for one to be published if needed. Returns `None` once
    /// the subscription is closed and every message already delivered to it has been received.
    pub async fn recv(&mut self) -> Option<Message<T>> {
        self.delivery.recv().await
    }

    /// Asks the broker to stop delivering to this subscription.
    ///
    /// This does not take effect immediately: messages which were already on their way may still
    /// be received. Keep calling [`recv`](Self::recv) until it returns `None` to be sure nothing
    /// else will arrive. Calling this more than once has no further effect.
    #[cfg_attr(test, tracing::instrument(skip(self), fields(id = self.id)))]
    pub fn unsubscribe(&mut self) {
        if std::mem::replace(&mut self.unsubscribed, true) {
            return;
        }

        // A closed request channel means the broker has stopped and has already closed us.
        if self.unsubscribe.send(self.id).is_err() {
            debug!("Broker has stopped, nothing to unsubscribe from");
        }
    }
}

impl<T> futures::Stream for Subscription<T> {
    type Item = Message<T>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.delivery.poll_recv(cx)
    }
}
