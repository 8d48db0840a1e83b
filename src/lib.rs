//! `seqbus` is an in-process publish/subscribe bus backed by a bounded, indexed ring buffer.
//!
//! Every published message is assigned a strictly increasing absolute index. Subscribers can
//! attach at any index and receive every message from that index onward, spanning the history
//! which is still buffered and the live stream with no gap and no duplicate.
//!
//! # Usage
//!
//! You can start a new broker with [`broker`]. This returns a [`Publisher`] along with a
//! [`Broker`] handle used to subscribe:
//!
//! 1. The broker keeps the last `cap` published messages in a [`SequencedRingBuffer`]. Older
//!    messages are evicted, so the buffer is a window over the stream, not an archive.
//!
//! 2. [`subscribe_from`] replays the buffered messages starting at the requested index, then
//!    switches to live delivery. If the requested index has already been evicted, the replay
//!    starts at the oldest buffered message instead.
//!
//! 3. A message is delivered to each [`Subscription`] exactly once, in publish order, as a
//!    [`Message`] carrying its index.
//!
//! 4. Dropping every [`Publisher`] stops the broker, closing every subscription.
//!
//! ```rust
//! use seqbus::Message;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (publisher, broker) = seqbus::broker(2)?;
//!     let mut subscription = broker.subscribe_from(1);
//!
//!     publisher.publish("Hello").await?;
//!     publisher.publish("World").await?;
//!     assert_eq!(subscription.recv().await, Some(Message { index: 1, payload: "World" }));
//!
//!     // Closing the ingress stops the broker.
//!     drop(publisher);
//!     assert_eq!(subscription.recv().await, None);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Concurrency model
//!
//! Each broker runs a single task which is the only owner of its ring buffer and of its set of
//! subscriptions. Publish, subscribe and unsubscribe requests reach it over channels and are
//! processed one at a time, so they are totally ordered without any lock. In particular, a
//! subscription's replay and its registration for live delivery happen in the same step, which is
//! what guarantees delivery without gaps or duplicates.
//!
//! Delivery is synchronous from the point of view of that task. With the default
//! [`SlowSubscriberPolicy::Block`], a subscriber which stops reading eventually stalls delivery to
//! every other subscriber and the acceptance of new publishes. Each subscription can buffer a full
//! replay plus [`BrokerConfig::subscriber_lag`] messages before this happens. Use
//! [`SlowSubscriberPolicy::Disconnect`] to cut off slow subscribers instead.
//!
//! [`SharedRingBuffer`] exposes the ring buffer on its own for direct use across threads.
//!
//! # Testing
//!
//! The ring buffer is checked against a naive model with [`proptest`] under the `proptest`
//! feature, and [`SharedRingBuffer`] is model-checked with [`loom`] under the `loom` feature:
//!
//! ```bash
//! cargo test --release --features proptest
//! cargo test --release --features loom
//! ```
//!
//! [`subscribe_from`]: Broker::subscribe_from
//! [`BrokerConfig::subscriber_lag`]: field@BrokerConfig::subscriber_lag
//! [`proptest`]: https://docs.rs/proptest
//! [`loom`]: https://docs.rs/loom

mod broker;
#[cfg(test)]
mod common;
mod config;
mod error;
mod macros;
mod ring;
mod subscription;
mod sync;

pub use broker::*;
pub use config::*;
pub use error::*;
pub use ring::*;
pub use subscription::*;
