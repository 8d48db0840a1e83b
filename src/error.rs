/// Errors raised by [`SequencedRingBuffer`] and [`SharedRingBuffer`].
///
/// [`SequencedRingBuffer`]: crate::SequencedRingBuffer
/// [`SharedRingBuffer`]: crate::SharedRingBuffer
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum RingError {
    #[error("Tried to create a ring buffer with a capacity < 1")]
    InvalidCapacity,
    /// The index has either been evicted or not been published yet. Resident indices are
    /// `first..end`, which is empty if the ring holds nothing.
    #[error("Index {index} is not resident, resident indices are {first}..{end}")]
    IndexOutOfRange { index: u64, first: u64, end: u64 },
}

/// Errors raised while constructing a [`Broker`](crate::Broker).
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum BrokerError {
    #[error(transparent)]
    Ring(#[from] RingError),
    #[error("Tried to create a broker with an ingress capacity < 1")]
    InvalidIngressCapacity,
}

/// Returned by [`Publisher::publish`](crate::Publisher::publish) once the broker loop is gone,
/// handing the payload back to the caller.
#[derive(thiserror::Error, Clone, PartialEq, Eq)]
#[error("Failed to publish, the broker has stopped")]
pub struct PublishError<T>(pub T);

impl<T> std::fmt::Debug for PublishError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PublishError").finish_non_exhaustive()
    }
}
