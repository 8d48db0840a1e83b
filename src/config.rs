use crate::error::{BrokerError, RingError};

pub const DEFAULT_CAPACITY: usize = 1024;
pub const DEFAULT_INGRESS_CAPACITY: usize = 1024;

/// What the broker loop does when a subscriber's delivery channel is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SlowSubscriberPolicy {
    /// Wait for the subscriber to make room. No message is ever dropped, but a single stalled
    /// subscriber stalls delivery to every other subscriber as well as the acceptance of new
    /// publishes.
    #[default]
    Block,
    /// Never wait: a subscriber which cannot accept a message immediately is removed from the
    /// broker and its delivery channel is closed. Other subscribers are unaffected.
    Disconnect,
}

/// Configuration for a [`Broker`](crate::Broker).
///
/// Each subscription gets a delivery channel able to hold `capacity + subscriber_lag` messages,
/// so replaying a full ring never waits on the subscriber. `subscriber_lag` is how far behind the
/// live stream a subscriber may fall before [`SlowSubscriberPolicy`] kicks in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerConfig {
    pub capacity: usize,
    pub origin: u64,
    pub ingress_capacity: usize,
    pub subscriber_lag: usize,
    pub slow_subscriber: SlowSubscriberPolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            origin: 0,
            ingress_capacity: DEFAULT_INGRESS_CAPACITY,
            subscriber_lag: 0,
            slow_subscriber: SlowSubscriberPolicy::default(),
        }
    }
}

impl BrokerConfig {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity, ..Default::default() }
    }

    pub fn origin(mut self, origin: u64) -> Self {
        self.origin = origin;
        self
    }

    pub fn ingress_capacity(mut self, ingress_capacity: usize) -> Self {
        self.ingress_capacity = ingress_capacity;
        self
    }

    pub fn subscriber_lag(mut self, subscriber_lag: usize) -> Self {
        self.subscriber_lag = subscriber_lag;
        self
    }

    pub fn slow_subscriber(mut self, policy: SlowSubscriberPolicy) -> Self {
        self.slow_subscriber = policy;
        self
    }

    pub fn validate(&self) -> Result<(), BrokerError> {
        if self.capacity == 0 {
            return Err(RingError::InvalidCapacity.into());
        }
        if self.ingress_capacity == 0 {
            return Err(BrokerError::InvalidIngressCapacity);
        }
        Ok(())
    }

    /// Depth of each subscription's delivery channel, clamped to what a tokio channel can hold.
    pub(crate) fn delivery_capacity(&self) -> usize {
        self.capacity.saturating_add(self.subscriber_lag).min(tokio::sync::Semaphore::MAX_PERMITS)
    }

    pub(crate) fn ingress_depth(&self) -> usize {
        self.ingress_capacity.min(tokio::sync::Semaphore::MAX_PERMITS)
    }
}
