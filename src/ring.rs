use crate::error::RingError;
use crate::macros::*;
use crate::sync::*;

/// A fixed-capacity ring buffer where every element is addressed by an absolute, monotonically
/// increasing index.
///
/// # Implementation details
///
/// Elements are appended with [`push`] until the ring reaches its capacity. From then on, each push
/// overwrites the oldest element and advances [`first`] by one. Resident indices are therefore
/// always the dense interval `first..first + size`:
///
/// ```text
///                 head
///                  │
///    ┌───┬───┬───┬─▼─┬───┐
/// B: │ 5 │ 6 │ 7 │ 3 │ 4 │      first = 3, last = 7
///    └───┴───┴───┴───┴───┘
///      0   1   2   3   4
///
///    ┌───────────────────────────────────┐
///    │ .B: buffer                        │
///    │ .n: absolute index of the element │
///    │     stored in each slot           │
///    └───────────────────────────────────┘
/// ```
///
/// `head` is the slot holding the element at [`first`], so absolute index `i` lives in slot
/// `(head + i - first) mod cap`. Eviction happens in perfect FIFO order, which means no tombstones
/// or compaction are ever needed.
///
/// This type has no interior synchronization and is meant to be owned by a single writer, such as
/// the [`Broker`] loop. Use [`SharedRingBuffer`] to share a ring across threads.
///
/// [`push`]: Self::push
/// [`first`]: Self::first
/// [`Broker`]: crate::Broker
pub struct SequencedRingBuffer<T> {
    ring: Vec<T>,
    head: usize,
    first: u64,
    cap: usize,
}

/// A thread-safe [`SequencedRingBuffer`]. Cloning the handle shares the same ring: reads happen
/// concurrently while pushes take exclusive access.
pub struct SharedRingBuffer<T> {
    inner: sync::Arc<sync::RwLock<SequencedRingBuffer<T>>>,
}

impl<T: std::fmt::Debug> std::fmt::Debug for SequencedRingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequencedRingBuffer")
            .field("first", &self.first)
            .field("size", &self.ring.len())
            .field("cap", &self.cap)
            .field("elements", &self.iter().map(|(_, elem)| elem).collect::<Vec<_>>())
            .finish()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for SharedRingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SharedRingBuffer").field(&*read(&self.inner)).finish()
    }
}

impl<T> Clone for SharedRingBuffer<T> {
    fn clone(&self) -> Self {
        Self { inner: sync::Arc::clone(&self.inner) }
    }
}

impl<T> SequencedRingBuffer<T> {
    /// Creates an empty ring which can hold up to `cap` elements, the first of which will be
    /// assigned index 0.
    pub fn new(cap: usize) -> Result<Self, RingError> {
        Self::with_origin(cap, 0)
    }

    /// Like [`new`](Self::new), but the first element pushed will be assigned index `origin`.
    #[cfg_attr(test, tracing::instrument)]
    pub fn with_origin(cap: usize, origin: u64) -> Result<Self, RingError> {
        if cap == 0 {
            error!("Tried to create a ring buffer with a capacity < 1");
            return Err(RingError::InvalidCapacity);
        }

        debug!("Creating new ring buffer");
        Ok(Self { ring: Vec::with_capacity(cap), head: 0, first: origin, cap })
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Number of resident elements, between 0 and [`capacity`](Self::capacity).
    pub fn size(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ring.len() == self.cap
    }

    /// Index of the oldest resident element, or the origin index if the ring is empty.
    pub fn first(&self) -> u64 {
        self.first
    }

    /// Index of the newest resident element.
    ///
    /// An empty ring returns [`first`](Self::first), exactly as a ring holding a single element
    /// would: check [`is_empty`](Self::is_empty) before relying on this.
    pub fn last(&self) -> u64 {
        self.end().saturating_sub(1).max(self.first)
    }

    /// One past the newest resident index. This is also the index the next [`push`] will be
    /// assigned.
    ///
    /// [`push`]: Self::push
    pub fn end(&self) -> u64 {
        self.first + self.ring.len() as u64
    }

    /// Appends `elem` as the newest element, evicting the oldest one if the ring is full. Returns
    /// the absolute index assigned to `elem`.
    #[cfg_attr(test, tracing::instrument(skip_all))]
    pub fn push(&mut self, elem: T) -> u64 {
        if self.ring.len() < self.cap {
            self.ring.push(elem);
            trace!(size = self.ring.len(), "Ring grew");
        } else {
            // Index bookkeeping is settled before the evicted element is dropped, so a panicking
            // destructor cannot leave the ring half updated.
            let evicted = std::mem::replace(&mut self.ring[self.head], elem);
            self.head = self.wrap(self.head + 1);
            self.first += 1;
            trace!(first = self.first, head = self.head, "Evicted oldest element");
            drop(evicted);
        }

        self.last()
    }

    /// Retrieves the element at absolute `index`.
    pub fn get(&self, index: u64) -> Result<&T, RingError> {
        if index < self.first || index >= self.end() {
            debug!(index, first = self.first, end = self.end(), "Index is not resident");
            return Err(RingError::IndexOutOfRange { index, first: self.first, end: self.end() });
        }

        Ok(&self.ring[self.slot(index)])
    }

    /// Iterates over every resident element, oldest to newest, along with its absolute index.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (u64, &T)> + ExactSizeIterator {
        self.iter_range(self.first, self.end())
    }

    /// Iterates over the resident elements in `[from, to)`, in index order.
    pub fn iter_range(&self, from: u64, to: u64) -> impl DoubleEndedIterator<Item = (u64, &T)> + ExactSizeIterator {
        let start = from.max(self.first);
        let stop = to.min(self.end()).max(start);

        (0..(stop - start) as usize).map(move |offset| {
            let index = start + offset as u64;
            (index, &self.ring[self.slot(index)])
        })
    }

    /// Iterates over every resident element at or after `from`, in index order. If `from` has
    /// already been evicted, iteration starts at [`first`](Self::first).
    pub fn iter_from(&self, from: u64) -> impl DoubleEndedIterator<Item = (u64, &T)> + ExactSizeIterator {
        self.iter_range(from, self.end())
    }

    fn slot(&self, index: u64) -> usize {
        self.wrap(self.head + (index - self.first) as usize)
    }

    /// `n` is always below `2 * cap` here, so a single subtraction stands in for a modulo.
    fn wrap(&self, n: usize) -> usize {
        if n >= self.cap { n - self.cap } else { n }
    }
}

impl<T: Clone> SequencedRingBuffer<T> {
    /// Copies every resident element, oldest to newest.
    pub fn snapshot(&self) -> Vec<T> {
        self.iter().map(|(_, elem)| elem.clone()).collect()
    }

    /// Copies the resident elements in the half-open interval `[from, to)`. Indices which are not
    /// resident are skipped, so this never returns more than `to - from` elements and returns
    /// nothing if the interval does not overlap the ring.
    pub fn range(&self, from: u64, to: u64) -> Vec<T> {
        self.iter_range(from, to).map(|(_, elem)| elem.clone()).collect()
    }

    /// Copies every resident element at or after `from`. Equivalent to `range(from, end())`.
    pub fn from(&self, from: u64) -> Vec<T> {
        self.range(from, self.end())
    }
}

impl<T> SharedRingBuffer<T> {
    pub fn new(cap: usize) -> Result<Self, RingError> {
        Self::with_origin(cap, 0)
    }

    pub fn with_origin(cap: usize, origin: u64) -> Result<Self, RingError> {
        let ring = SequencedRingBuffer::with_origin(cap, origin)?;
        Ok(Self { inner: sync::Arc::new(sync::RwLock::new(ring)) })
    }

    /// See [`SequencedRingBuffer::push`].
    pub fn push(&self, elem: T) -> u64 {
        write(&self.inner).push(elem)
    }

    pub fn capacity(&self) -> usize {
        read(&self.inner).capacity()
    }

    pub fn size(&self) -> usize {
        read(&self.inner).size()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.inner).is_empty()
    }

    pub fn first(&self) -> u64 {
        read(&self.inner).first()
    }

    pub fn last(&self) -> u64 {
        read(&self.inner).last()
    }

    /// Runs `f` against the ring while holding a read lock, for when several properties need to be
    /// observed from the same state.
    pub fn inspect<R>(&self, f: impl FnOnce(&SequencedRingBuffer<T>) -> R) -> R {
        f(&read(&self.inner))
    }
}

impl<T: Clone> SharedRingBuffer<T> {
    /// See [`SequencedRingBuffer::get`]. The element is cloned out of the ring.
    pub fn get(&self, index: u64) -> Result<T, RingError> {
        read(&self.inner).get(index).cloned()
    }

    pub fn snapshot(&self) -> Vec<T> {
        read(&self.inner).snapshot()
    }

    pub fn range(&self, from: u64, to: u64) -> Vec<T> {
        read(&self.inner).range(from, to)
    }

    pub fn from(&self, from: u64) -> Vec<T> {
        read(&self.inner).from(from)
    }
}


/// [proptest] drives a [`SequencedRingBuffer`] through random sequences of pushes and reads,
/// checking every result against a naive [`VecDeque`] model of the same window. Failing cases are
/// shrunk down to a minimal sequence of transitions.
///
/// [`VecDeque`]: std::collections::VecDeque
#[cfg(all(test, feature = "proptest"))]
mod proptesting {
    use super::*;
    use crate::common::*;
    use proptest::prelude::*;
    use proptest_state_machine::*;

    prop_state_machine! {
        #![proptest_config(ProptestConfig {
            // Enable verbose mode to make the state machine test print the
            // transitions for each case.
            verbose: 1,
            // The number of tests which need to be valid for this to pass.
            cases: 1024,
            // Max duration (in milliseconds) for each generated case.
            timeout: 1_000,
            ..Default::default()
        })]

        #[test]
        fn ring_proptest(sequential 1..256 => SystemUnderTest);
    }

    struct SystemUnderTest {
        ring: SequencedRingBuffer<u32>,
    }

    #[derive(Clone, Debug)]
    struct Reference {
        window: std::collections::VecDeque<u32>,
        first: u64,
        origin: u64,
        last_push: Option<u64>,
        next: u32,
        cap: usize,
    }

    #[derive(Clone, Debug)]
    enum Transition {
        Push(u32),
        Get(u64),
        Range(u64, u64),
        From(u64),
        Snapshot,
    }

    impl ReferenceStateMachine for Reference {
        type State = Self;
        type Transition = Transition;

        fn init_state() -> BoxedStrategy<Self::State> {
            (1..32usize, 0..64u64).prop_map(|(cap, origin)| Self::new(cap, origin)).boxed()
        }

        fn transitions(state: &Self::State) -> BoxedStrategy<Self::Transition> {
            // Indices are drawn slightly around the resident window so that both hits and misses
            // are exercised.
            let lo = state.first.saturating_sub(3);
            let hi = state.end() + 3;
            prop_oneof![
                6 => Just(Transition::Push(state.next)),
                1 => (lo..hi).prop_map(Transition::Get),
                1 => (lo..hi, lo..hi).prop_map(|(from, to)| Transition::Range(from, to)),
                1 => (lo..hi).prop_map(Transition::From),
                1 => Just(Transition::Snapshot),
            ]
            .boxed()
        }

        fn apply(mut state: Self::State, transition: &Self::Transition) -> Self::State {
            state.last_push = None;
            if let Transition::Push(elem) = transition {
                state.push(*elem);
            }
            state
        }
    }

    impl StateMachineTest for SystemUnderTest {
        type SystemUnderTest = Self;
        type Reference = Reference;

        fn init_test(ref_state: &<Self::Reference as ReferenceStateMachine>::State) -> Self::SystemUnderTest {
            let ring = SequencedRingBuffer::with_origin(ref_state.cap, ref_state.origin).expect("Failed to create ring");
            Self { ring }
        }

        #[tracing::instrument(skip(state))]
        fn apply(
            mut state: Self::SystemUnderTest,
            ref_state: &<Self::Reference as ReferenceStateMachine>::State,
            transition: <Self::Reference as ReferenceStateMachine>::Transition,
        ) -> Self::SystemUnderTest {
            let file =
                std::fs::OpenOptions::new().append(true).create(true).open("./log").expect("Failed to open file");
            let (appender, _guard) = tracing_appender::non_blocking(file);
            let logger = log_conf().with_writer(appender).finish();

            tracing::subscriber::with_default(logger, || {
                tracing::warn!(?transition, "Testing...");
                match transition {
                    Transition::Push(elem) => {
                        tracing::info!(elem, "Processing a PUSH request");
                        let index = state.ring.push(elem);
                        assert_eq!(Some(index), ref_state.last_push);
                        assert_eq!(state.ring.get(index), Ok(&elem));
                    }
                    Transition::Get(index) => {
                        tracing::info!(index, "Processing a GET request");
                        match ref_state.get(index) {
                            Some(elem) => assert_eq!(state.ring.get(index), Ok(&elem)),
                            None => assert_eq!(
                                state.ring.get(index),
                                Err(RingError::IndexOutOfRange { index, first: ref_state.first, end: ref_state.end() })
                            ),
                        }
                    }
                    Transition::Range(from, to) => {
                        tracing::info!(from, to, "Processing a RANGE request");
                        let range = state.ring.range(from, to);
                        assert!(range.len() as u64 <= to.saturating_sub(from));
                        assert_eq!(range, ref_state.range(from, to));
                    }
                    Transition::From(from) => {
                        tracing::info!(from, "Processing a FROM request");
                        assert_eq!(state.ring.from(from), ref_state.range(from, ref_state.end()));
                    }
                    Transition::Snapshot => {
                        tracing::info!("Processing a SNAPSHOT request");
                        let snapshot = state.ring.snapshot();
                        assert_eq!(snapshot, state.ring.snapshot());
                        assert_eq!(snapshot, Vec::from(ref_state.window.clone()));
                    }
                }
            });
            state
        }

        fn check_invariants(
            state: &Self::SystemUnderTest,
            ref_state: &<Self::Reference as ReferenceStateMachine>::State,
        ) {
            assert!(state.ring.size() <= state.ring.capacity());
            assert_eq!(state.ring.size(), ref_state.window.len());
            assert_eq!(state.ring.first(), ref_state.first);
            if !state.ring.is_empty() {
                assert_eq!(state.ring.last() - state.ring.first() + 1, state.ring.size() as u64);
            } else {
                assert_eq!(state.ring.last(), state.ring.first());
            }
        }
    }

    impl Reference {
        fn new(cap: usize, origin: u64) -> Self {
            Self { window: Default::default(), first: origin, origin, last_push: None, next: 0, cap }
        }

        fn end(&self) -> u64 {
            self.first + self.window.len() as u64
        }

        fn push(&mut self, elem: u32) {
            self.window.push_back(elem);
            if self.window.len() > self.cap {
                self.window.pop_front();
                self.first += 1;
            }
            self.last_push = Some(self.end() - 1);
            self.next += 1;
        }

        fn get(&self, index: u64) -> Option<u32> {
            index.checked_sub(self.first).and_then(|offset| self.window.get(offset as usize)).copied()
        }

        fn range(&self, from: u64, to: u64) -> Vec<u32> {
            (from..to).filter_map(|index| self.get(index)).collect()
        }
    }
}
