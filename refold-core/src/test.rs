//! Test utilities for event-sourced aggregates.
//!
//! Enabled with the `test-util` feature:
//!
//! - [`TestExecutor`] - given/when/then unit testing for aggregates in
//!   isolation, no store required
//! - [`FixedClock`] / [`SteppingClock`] - deterministic time sources
//! - [`CollectingConsumer`] - records every dispatched message for assertions
//! - [`FailingStore`] - a store whose every operation fails, for exercising
//!   storage error paths
//!
//! ```ignore
//! use refold::test::TestExecutor;
//!
//! #[test]
//! fn deposit_produces_event() {
//!     TestExecutor::<Account>::given(&[AccountEvent::Opened(Opened {})])
//!         .when(&Deposit { amount: 10 })
//!         .then_expect_events(&[AccountEvent::Deposited(Deposited { amount: 10 })]);
//! }
//! ```

use std::{
    fmt,
    future::Future,
    io,
    marker::PhantomData,
    sync::Mutex,
};

use chrono::{DateTime, Duration, Utc};
use nonempty::NonEmpty;

use crate::{
    aggregate::{AggregateId, AggregateRoot, Handle},
    clock::Clock,
    dispatcher::MessageConsumer,
    message::SavedMessage,
    store::{AppendError, MessageStore, PersistableMessage, StoredMessage},
};

/// A clock frozen at one instant.
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// A clock that advances one second per observation, starting at a base
/// instant. Useful when tests need distinct but deterministic timestamps.
#[derive(Debug)]
pub struct SteppingClock {
    base: DateTime<Utc>,
    ticks: Mutex<i64>,
}

impl SteppingClock {
    #[must_use]
    pub fn starting_at(base: DateTime<Utc>) -> Self {
        Self {
            base,
            ticks: Mutex::new(0),
        }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> DateTime<Utc> {
        let mut ticks = self.ticks.lock().expect("stepping clock lock poisoned");
        let now = self.base + Duration::seconds(*ticks);
        *ticks += 1;
        now
    }
}

/// Consumer that records every message it is handed.
///
/// Share it with a dispatcher through an `Arc` and assert on
/// [`versions`](Self::versions) or [`seen`](Self::seen) afterwards.
#[derive(Debug, Default)]
pub struct CollectingConsumer<E> {
    seen: Mutex<Vec<SavedMessage<E>>>,
}

impl<E> CollectingConsumer<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Everything consumed so far, in delivery order.
    #[must_use]
    pub fn seen(&self) -> Vec<SavedMessage<E>>
    where
        E: Clone,
    {
        self.seen
            .lock()
            .expect("collecting consumer lock poisoned")
            .clone()
    }

    /// Stream versions consumed so far, in delivery order.
    #[must_use]
    pub fn versions(&self) -> Vec<u64> {
        self.seen
            .lock()
            .expect("collecting consumer lock poisoned")
            .iter()
            .map(|m| m.version)
            .collect()
    }
}

impl<E> MessageConsumer<E> for CollectingConsumer<E>
where
    E: Clone + Send + Sync,
{
    fn name(&self) -> &str {
        "collecting"
    }

    fn consume(
        &self,
        message: &SavedMessage<E>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.seen
            .lock()
            .expect("collecting consumer lock poisoned")
            .push(message.clone());
        Ok(())
    }
}

/// A store whose every operation fails with an I/O error.
///
/// Exercises the `Store` variants of retrieve/persist errors without a real
/// faulty backend.
#[derive(Debug)]
pub struct FailingStore<Id> {
    _id: PhantomData<fn() -> Id>,
}

impl<Id> FailingStore<Id> {
    #[must_use]
    pub fn new() -> Self {
        Self { _id: PhantomData }
    }
}

impl<Id> Default for FailingStore<Id> {
    fn default() -> Self {
        Self::new()
    }
}

fn injected_failure() -> io::Error {
    io::Error::other("injected store failure")
}

impl<Id> MessageStore for FailingStore<Id>
where
    Id: AggregateId,
{
    type Id = Id;
    type Error = io::Error;

    fn append<'a>(
        &'a self,
        _id: &'a Self::Id,
        _expected_version: u64,
        _messages: NonEmpty<PersistableMessage>,
    ) -> impl Future<Output = Result<u64, AppendError<Self::Error>>> + Send + 'a {
        std::future::ready(Err(AppendError::Store(injected_failure())))
    }

    fn read_batch<'a>(
        &'a self,
        _id: &'a Self::Id,
        _after_version: u64,
        _limit: usize,
    ) -> impl Future<Output = Result<Vec<StoredMessage>, Self::Error>> + Send + 'a {
        std::future::ready(Err(injected_failure()))
    }

    fn stream_version<'a>(
        &'a self,
        _id: &'a Self::Id,
    ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a {
        std::future::ready(Err(injected_failure()))
    }
}

/// Given/when/then executor for aggregate logic in isolation.
///
/// Replays the given history into a default aggregate, runs one command, and
/// asserts on the produced events or the rejection.
pub struct TestExecutor<A: AggregateRoot> {
    state: A,
}

impl<A: AggregateRoot> TestExecutor<A> {
    /// Start from the given prior events.
    #[must_use]
    pub fn given(events: &[A::Event]) -> Self {
        let mut state = A::default();
        for event in events {
            state.apply(event);
        }
        Self { state }
    }

    /// Run one command against the accumulated state.
    #[must_use]
    pub fn when<C>(self, command: &C) -> TestOutcome<A>
    where
        A: Handle<C>,
    {
        TestOutcome {
            result: self.state.handle(command),
        }
    }
}

/// Outcome of [`TestExecutor::when`], ready for assertions.
pub struct TestOutcome<A: AggregateRoot> {
    result: Result<Vec<A::Event>, A::Error>,
}

impl<A: AggregateRoot> TestOutcome<A> {
    /// Assert the command succeeded with exactly these events, in order.
    ///
    /// # Panics
    ///
    /// Panics when the command was rejected or produced different events.
    pub fn then_expect_events(self, expected: &[A::Event])
    where
        A::Event: PartialEq + fmt::Debug,
        A::Error: fmt::Debug,
    {
        match self.result {
            Ok(events) => assert_eq!(events, expected),
            Err(error) => panic!("expected events, command was rejected: {error:?}"),
        }
    }

    /// Assert the command succeeded and produced nothing.
    ///
    /// # Panics
    ///
    /// Panics when the command was rejected or produced events.
    pub fn then_expect_no_events(self)
    where
        A::Event: fmt::Debug,
        A::Error: fmt::Debug,
    {
        match self.result {
            Ok(events) => assert!(events.is_empty(), "expected no events, got {events:?}"),
            Err(error) => panic!("expected no events, command was rejected: {error:?}"),
        }
    }

    /// Assert the command was rejected with exactly this message.
    ///
    /// # Panics
    ///
    /// Panics when the command succeeded or the message differs.
    pub fn then_expect_error_message(self, expected: &str)
    where
        A::Event: fmt::Debug,
        A::Error: fmt::Display,
    {
        match self.result {
            Ok(events) => panic!("expected rejection, got events: {events:?}"),
            Err(error) => assert_eq!(error.to_string(), expected),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::message::Message;

    #[derive(Debug, Default)]
    struct Tally {
        total: i64,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum TallyEvent {
        Added(i64),
    }

    impl AggregateRoot for Tally {
        const KIND: &'static str = "tally";

        type Id = String;
        type Event = TallyEvent;
        type Error = String;

        fn apply(&mut self, event: &Self::Event) {
            let TallyEvent::Added(amount) = event;
            self.total += amount;
        }
    }

    struct Add(i64);

    impl Handle<Add> for Tally {
        fn handle(&self, command: &Add) -> Result<Vec<Self::Event>, Self::Error> {
            match command.0 {
                n if n > 0 => Ok(vec![TallyEvent::Added(n)]),
                0 => Ok(vec![]),
                _ => Err("amount must not be negative".to_string()),
            }
        }
    }

    #[test]
    fn executor_asserts_produced_events() {
        TestExecutor::<Tally>::given(&[TallyEvent::Added(2)])
            .when(&Add(3))
            .then_expect_events(&[TallyEvent::Added(3)]);
    }

    #[test]
    fn executor_asserts_no_events() {
        TestExecutor::<Tally>::given(&[]).when(&Add(0)).then_expect_no_events();
    }

    #[test]
    fn executor_asserts_rejections() {
        TestExecutor::<Tally>::given(&[])
            .when(&Add(-1))
            .then_expect_error_message("amount must not be negative");
    }

    #[test]
    fn fixed_clock_never_moves() {
        let instant = Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap();
        let clock = FixedClock(instant);
        assert_eq!(clock.now(), instant);
        assert_eq!(clock.now(), instant);
    }

    #[test]
    fn stepping_clock_advances_per_observation() {
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap();
        let clock = SteppingClock::starting_at(base);
        assert_eq!(clock.now(), base);
        assert_eq!(clock.now(), base + Duration::seconds(1));
    }

    #[test]
    fn collecting_consumer_records_in_order() {
        let consumer = CollectingConsumer::new();
        for version in 1..=3 {
            consumer
                .consume(&SavedMessage {
                    version,
                    recorded_at: Utc::now(),
                    message: Message::new(TallyEvent::Added(1)),
                })
                .unwrap();
        }
        assert_eq!(consumer.versions(), vec![1, 2, 3]);
        assert_eq!(consumer.seen().len(), 3);
    }

    #[tokio::test]
    async fn failing_store_fails_every_operation() {
        let store = FailingStore::<String>::new();
        let id = "x".to_string();
        assert!(store.read_batch(&id, 0, 10).await.is_err());
        assert!(store.stream_version(&id).await.is_err());
    }
}
