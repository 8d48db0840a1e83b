use crate::config::{BrokerConfig, SlowSubscriberPolicy};
use crate::error::{BrokerError, PublishError};
use crate::macros::*;
use crate::ring::SequencedRingBuffer;
use crate::subscription::Subscription;

use tokio::sync::mpsc;

#[cfg(test)]
pub trait TBound: Send + Clone + std::fmt::Debug + 'static {}
#[cfg(test)]
impl<T: Send + Clone + std::fmt::Debug + 'static> TBound for T {}

#[cfg(not(test))]
pub trait TBound: Send + Clone + 'static {}
#[cfg(not(test))]
impl<T: Send + Clone + 'static> TBound for T {}

/// A payload along with the absolute index it was assigned when it was published. Replayed and
/// live messages look exactly the same.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message<T> {
    pub index: u64,
    pub payload: T,
}

/// The publishing end of a [`Broker`]. The broker stops once every publisher has been dropped.
pub struct Publisher<T: TBound> {
    ingress: mpsc::Sender<T>,
    published: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

/// A handle over a running broker loop, used to create [`Subscription`]s. Cloning the handle does
/// not create a new broker.
///
/// # Implementation details
///
/// The broker loop is a single task which exclusively owns a [`SequencedRingBuffer`] and the set of
/// live subscriptions. It waits on three sources of events:
///
/// - subscribe requests, which replay the buffered backlog to the new subscription and register it
///   for live delivery, both in the same iteration of the loop,
/// - unsubscribe requests, which remove a subscription and close its delivery channel,
/// - the ingress channel, where each payload is pushed into the ring and then fanned out to every
///   live subscription.
///
/// Every event is handled to completion before the next one is picked up. This is what makes the
/// hand-off from replay to live delivery gapless: a message is either in the ring when a
/// subscription registers, and gets replayed, or is published after, and gets delivered live.
///
/// Subscribe and unsubscribe requests are polled before the ingress channel. This does not change
/// what a subscriber receives, only whether messages published concurrently reach it as replay or
/// as live messages.
///
/// Once the ingress channel closes, every live subscription is closed and the loop exits for good.
pub struct Broker<T: TBound> {
    subscribe: mpsc::UnboundedSender<SubscribeRequest<T>>,
    unsubscribe: mpsc::UnboundedSender<u64>,
    ids: std::sync::Arc<std::sync::atomic::AtomicU64>,
    /// Payloads accepted by every [`Publisher`], when the ingress channel is owned by the broker.
    published: Option<std::sync::Arc<std::sync::atomic::AtomicU64>>,
    origin: u64,
    delivery_capacity: usize,
}

struct SubscribeRequest<T> {
    id: u64,
    start: Start,
    delivery: mpsc::Sender<Message<T>>,
}

#[derive(Clone, Copy, Debug)]
enum Start {
    Index(u64),
    /// Whatever index the next payload processed by the loop gets.
    Next,
}

/// State owned by the broker task.
struct BrokerLoop<T: TBound> {
    buffer: SequencedRingBuffer<T>,
    subscriptions: Vec<Live<T>>,
    policy: SlowSubscriberPolicy,
}

struct Live<T> {
    id: u64,
    from: u64,
    delivery: mpsc::Sender<Message<T>>,
}

/// Why a subscription is removed from the live set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Cutoff {
    Requested,
    Closed,
    Full,
}

impl<T: TBound> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self { ingress: self.ingress.clone(), published: std::sync::Arc::clone(&self.published) }
    }
}

impl<T: TBound> Clone for Broker<T> {
    fn clone(&self) -> Self {
        Self {
            subscribe: self.subscribe.clone(),
            unsubscribe: self.unsubscribe.clone(),
            ids: std::sync::Arc::clone(&self.ids),
            published: self.published.clone(),
            origin: self.origin,
            delivery_capacity: self.delivery_capacity,
        }
    }
}

impl<T: TBound> std::fmt::Debug for Publisher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher").field("closed", &self.ingress.is_closed()).finish()
    }
}

impl<T: TBound> std::fmt::Debug for Broker<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("stopped", &self.is_stopped())
            .field("delivery_capacity", &self.delivery_capacity)
            .finish()
    }
}

/// Starts a new [`Broker`] retaining up to `cap` messages, with every other setting left to its
/// [default](BrokerConfig::default).
///
/// # Panics
///
/// Panics if called outside of a tokio runtime.
pub fn broker<T: TBound>(cap: usize) -> Result<(Publisher<T>, Broker<T>), BrokerError> {
    Broker::new(BrokerConfig::with_capacity(cap))
}

impl<T: TBound> Broker<T> {
    /// Starts a new broker loop along with the [`Publisher`] feeding it.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    #[cfg_attr(test, tracing::instrument)]
    pub fn new(config: BrokerConfig) -> Result<(Publisher<T>, Self), BrokerError> {
        config.validate()?;

        let (sx, rx) = mpsc::channel(config.ingress_depth());
        let published = std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0));
        let broker = Self::spawn(config, rx, Some(std::sync::Arc::clone(&published)))?;

        Ok((Publisher { ingress: sx, published }, broker))
    }

    /// Starts a new broker loop which reads its publishes from `ingress`. The broker stops once
    /// every sender to `ingress` has been dropped. [`BrokerConfig::ingress_capacity`] is not used
    /// since the channel is provided by the caller.
    ///
    /// The broker cannot see what was sent to `ingress` before the loop picked it up, so
    /// [`subscribe`] starts with the next payload the loop processes rather than the next one sent.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    ///
    /// [`BrokerConfig::ingress_capacity`]: field@BrokerConfig::ingress_capacity
    /// [`subscribe`]: Self::subscribe
    #[cfg_attr(test, tracing::instrument(skip(ingress)))]
    pub fn with_ingress(config: BrokerConfig, ingress: mpsc::Receiver<T>) -> Result<Self, BrokerError> {
        Self::spawn(config, ingress, None)
    }

    fn spawn(
        config: BrokerConfig,
        ingress: mpsc::Receiver<T>,
        published: Option<std::sync::Arc<std::sync::atomic::AtomicU64>>,
    ) -> Result<Self, BrokerError> {
        let buffer = SequencedRingBuffer::with_origin(config.capacity, config.origin)?;

        let (subscribe_sx, subscribe_rx) = mpsc::unbounded_channel();
        let (unsubscribe_sx, unsubscribe_rx) = mpsc::unbounded_channel();

        let broker_loop = BrokerLoop { buffer, subscriptions: Vec::new(), policy: config.slow_subscriber };

        debug!("Spawning broker loop");
        tokio::spawn(broker_loop.run(ingress, subscribe_rx, unsubscribe_rx));

        Ok(Self {
            subscribe: subscribe_sx,
            unsubscribe: unsubscribe_sx,
            ids: std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0)),
            published,
            origin: config.origin,
            delivery_capacity: config.delivery_capacity(),
        })
    }

    /// Subscribes to every message with an index greater or equal to `from`.
    ///
    /// Messages which are still buffered are replayed first, followed by live messages. If `from`
    /// has already been evicted, delivery silently starts at the oldest buffered message instead:
    /// check [`Message::index`] rather than assuming the first message is at `from`.
    ///
    /// If the broker has stopped, the returned subscription is already closed.
    pub fn subscribe_from(&self, from: u64) -> Subscription<T> {
        self.request(Start::Index(from))
    }

    /// Subscribes to live messages only, starting with the next one to be published. Payloads
    /// which a [`Publisher`] finished publishing before this call are never delivered, even if the
    /// broker loop has not processed them yet.
    pub fn subscribe(&self) -> Subscription<T> {
        let start = match &self.published {
            Some(published) => {
                Start::Index(self.origin.saturating_add(published.load(std::sync::atomic::Ordering::Acquire)))
            }
            None => Start::Next,
        };
        self.request(start)
    }

    /// Whether the broker loop has stopped. A stopped broker never restarts.
    pub fn is_stopped(&self) -> bool {
        self.subscribe.is_closed()
    }

    /// Waits for the broker loop to stop.
    pub async fn stopped(&self) {
        self.subscribe.closed().await
    }

    #[cfg_attr(test, tracing::instrument(skip(self)))]
    fn request(&self, start: Start) -> Subscription<T> {
        let id = self.ids.fetch_add(1, std::sync::atomic::Ordering::AcqRel);
        let (sx, rx) = mpsc::channel(self.delivery_capacity);

        // On failure the request is dropped along with its sender, closing the subscription.
        if self.subscribe.send(SubscribeRequest { id, start, delivery: sx }).is_err() {
            debug!(id, "Broker has stopped, subscription is closed");
        }

        Subscription::new(id, rx, self.unsubscribe.clone())
    }
}

impl<T: TBound> Publisher<T> {
    /// Publishes `payload` to every live subscription, waiting for room in the ingress channel if
    /// needed. The payload is handed back if the broker loop is no longer running.
    #[cfg_attr(test, tracing::instrument(skip(self)))]
    pub async fn publish(&self, payload: T) -> Result<(), PublishError<T>> {
        self.ingress.send(payload).await.map_err(|mpsc::error::SendError(payload)| {
            error!("Failed to publish, broker loop is gone");
            PublishError(payload)
        })?;

        // Counted once queued, so that a later `subscribe` starts past this payload.
        self.published.fetch_add(1, std::sync::atomic::Ordering::AcqRel);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.ingress.is_closed()
    }
}

impl<T: TBound> BrokerLoop<T> {
    #[cfg_attr(test, tracing::instrument(skip_all))]
    async fn run(
        mut self,
        mut ingress: mpsc::Receiver<T>,
        mut subscribe: mpsc::UnboundedReceiver<SubscribeRequest<T>>,
        mut unsubscribe: mpsc::UnboundedReceiver<u64>,
    ) {
        debug!("Broker loop running");

        loop {
            tokio::select! {
                biased;

                Some(request) = subscribe.recv() => self.subscribe(request).await,
                Some(id) = unsubscribe.recv() => self.remove(id, Cutoff::Requested),
                payload = ingress.recv() => match payload {
                    Some(payload) => self.publish(payload).await,
                    None => break,
                },
            }
        }

        debug!(subscriptions = self.subscriptions.len(), "Ingress closed, stopping broker");

        // Live subscriptions are closed before the broker reports itself as stopped. Requests
        // still queued hold delivery senders: they are dropped here so that late subscriptions
        // observe closure too.
        self.subscriptions.clear();
        subscribe.close();
        while subscribe.try_recv().is_ok() {}
    }

    #[cfg_attr(test, tracing::instrument(skip(self, payload)))]
    async fn publish(&mut self, payload: T) {
        let index = self.buffer.push(payload.clone());
        debug!(index, subscriptions = self.subscriptions.len(), "Fanning out message");

        let mut cutoff = Vec::new();
        for live in self.subscriptions.iter().filter(|live| live.from <= index) {
            let message = Message { index, payload: payload.clone() };
            if let Err(reason) = deliver(self.policy, &live.delivery, message).await {
                cutoff.push((live.id, reason));
            }
        }

        for (id, reason) in cutoff {
            self.remove(id, reason);
        }
    }

    #[cfg_attr(test, tracing::instrument(skip(self, request), fields(id = request.id)))]
    async fn subscribe(&mut self, request: SubscribeRequest<T>) {
        let SubscribeRequest { id, start, delivery } = request;
        let from = match start {
            Start::Index(from) => from,
            Start::Next => self.buffer.end(),
        };

        // The backlog is copied out so that no borrow of the ring is held while waiting on the
        // subscriber.
        let backlog = self
            .buffer
            .iter_from(from)
            .map(|(index, payload)| Message { index, payload: payload.clone() })
            .collect::<Vec<_>>();

        debug!(from, first = self.buffer.first(), backlog = backlog.len(), "Replaying backlog");

        for message in backlog {
            if deliver(self.policy, &delivery, message).await.is_err() {
                debug!(id, "Subscription was cut off during replay");
                return;
            }
        }

        self.subscriptions.push(Live { id, from, delivery });
    }

    #[cfg_attr(test, tracing::instrument(skip(self)))]
    fn remove(&mut self, id: u64, reason: Cutoff) {
        let Some(position) = self.subscriptions.iter().position(|live| live.id == id) else {
            trace!("Subscription is already gone");
            return;
        };

        // Dropping the sender closes the delivery channel.
        let live = self.subscriptions.remove(position);
        match reason {
            Cutoff::Full => warn!(id, from = live.from, "Disconnecting slow subscriber"),
            Cutoff::Closed | Cutoff::Requested => {
                debug!(?reason, "Removing subscription");
            }
        }
    }
}

async fn deliver<T>(
    policy: SlowSubscriberPolicy,
    delivery: &mpsc::Sender<Message<T>>,
    message: Message<T>,
) -> Result<(), Cutoff> {
    match policy {
        SlowSubscriberPolicy::Block => delivery.send(message).await.map_err(|_| Cutoff::Closed),
        SlowSubscriberPolicy::Disconnect => delivery.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Cutoff::Full,
            mpsc::error::TrySendError::Closed(_) => Cutoff::Closed,
        }),
    }
}
