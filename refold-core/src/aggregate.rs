//! Command-side domain primitives.
//!
//! This module defines the building blocks for aggregates: identity
//! ([`AggregateId`]), state reconstruction ([`AggregateRoot`], [`Apply`]),
//! command handling ([`Handle`]), and the in-memory handle the repository
//! hands out ([`Root`]), which tracks the persisted version and the buffer of
//! not-yet-persisted events.

use std::{fmt, hash::Hash};

use thiserror::Error;

/// Error parsing an encoded aggregate identity.
#[derive(Debug, Error)]
#[error("invalid aggregate id `{input}`: {reason}")]
pub struct IdParseError {
    pub input: String,
    pub reason: String,
}

/// Opaque, string-representable aggregate identity.
///
/// Round-trip law: `Self::decode(&x.encode()) == Ok(x)` for every value.
/// Equality is by encoded value; identities are immutable once minted.
pub trait AggregateId: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    fn encode(&self) -> String;

    fn decode(encoded: &str) -> Result<Self, IdParseError>;
}

impl AggregateId for String {
    fn encode(&self) -> String {
        self.clone()
    }

    fn decode(encoded: &str) -> Result<Self, IdParseError> {
        Ok(encoded.to_string())
    }
}

impl AggregateId for uuid::Uuid {
    fn encode(&self) -> String {
        self.to_string()
    }

    fn decode(encoded: &str) -> Result<Self, IdParseError> {
        // Only the canonical hyphenated form round-trips; other layouts the
        // uuid crate accepts would re-encode differently.
        let parsed = Self::try_parse(encoded).map_err(|e| IdParseError {
            input: encoded.to_string(),
            reason: e.to_string(),
        })?;
        if parsed.to_string() != encoded {
            return Err(IdParseError {
                input: encoded.to_string(),
                reason: "not in canonical hyphenated form".to_string(),
            });
        }
        Ok(parsed)
    }
}

/// State of a command-side entity reconstructed from its event history.
///
/// Implementations start from [`Default`] (the "does not yet exist" state)
/// and are folded forward one event at a time. `apply` must be total for
/// every variant of `Self::Event`; ordering and gap rejection are the
/// repository's job, so state transitions here can assume events arrive in
/// stream order.
pub trait AggregateRoot: Default + Sized {
    /// Aggregate type identifier, used to key snapshots and logging.
    ///
    /// Use lowercase kebab-case: `"account"`, `"shopping-cart"`.
    const KIND: &'static str;

    type Id: AggregateId;
    type Event: 'static;
    type Error;

    /// Apply one event to mutate internal state during replay.
    fn apply(&mut self, event: &Self::Event);
}

/// Mutate aggregate state with one concrete event type.
///
/// Hand-written [`AggregateRoot::apply`] implementations usually dispatch a
/// match expression to per-event `Apply` impls, keeping each transition small
/// and testable.
pub trait Apply<E> {
    fn apply(&mut self, event: &E);
}

/// Entry point for command handling.
///
/// Each command type gets its own implementation. Handlers validate against
/// current state and return the events to record; they never mutate state
/// directly.
pub trait Handle<C>: AggregateRoot {
    /// Decide what happened in response to a command.
    ///
    /// # Errors
    ///
    /// Returns `Self::Error` when the command is invalid for the current
    /// state. An `Ok(vec![])` is a legal "nothing happened".
    fn handle(&self, command: &C) -> Result<Vec<Self::Event>, Self::Error>;
}

/// In-memory handle to one aggregate instance.
///
/// Pairs reconstructed state with its identity, the persisted stream version,
/// and the buffer of pending events produced by command handling. `version`
/// only ever advances through a successful persist; recording events updates
/// in-memory state and the buffer, nothing else.
pub struct Root<A: AggregateRoot> {
    id: A::Id,
    version: u64,
    state: A,
    pending: Vec<A::Event>,
    // Events folded since the snapshot this root was seeded from (equals
    // `version` when no snapshot was involved). Drives snapshot policy.
    pub(crate) since_snapshot: u64,
}

impl<A: AggregateRoot> Root<A> {
    /// A fresh, version-0 root for an aggregate that does not exist yet.
    #[must_use]
    pub fn new(id: A::Id) -> Self {
        Self {
            id,
            version: 0,
            state: A::default(),
            pending: Vec::new(),
            since_snapshot: 0,
        }
    }

    pub(crate) fn reconstituted(id: A::Id, version: u64, state: A, since_snapshot: u64) -> Self {
        Self {
            id,
            version,
            state,
            pending: Vec::new(),
            since_snapshot,
        }
    }

    #[must_use]
    pub fn id(&self) -> &A::Id {
        &self.id
    }

    /// Persisted stream version (count of events applied from storage).
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub fn state(&self) -> &A {
        &self.state
    }

    /// Events recorded since the last successful persist, oldest first.
    #[must_use]
    pub fn pending(&self) -> &[A::Event] {
        &self.pending
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Record a fact: apply it to in-memory state and buffer it for the next
    /// persist. The persisted version is untouched.
    pub fn record(&mut self, event: A::Event) {
        self.state.apply(&event);
        self.pending.push(event);
    }

    /// Run a command against current state, recording every produced event.
    ///
    /// # Errors
    ///
    /// Returns the aggregate's error unchanged when the handler rejects the
    /// command; nothing is recorded in that case.
    pub fn execute<C>(&mut self, command: &C) -> Result<(), A::Error>
    where
        A: Handle<C>,
    {
        let events = self.state.handle(command)?;
        for event in events {
            self.record(event);
        }
        Ok(())
    }

    /// Confirm a successful append: clear the pending buffer and advance the
    /// version to the stream's new head.
    pub(crate) fn confirm_persisted(&mut self, new_version: u64) {
        let appended = self.pending.len() as u64;
        debug_assert_eq!(self.version + appended, new_version);
        self.version = new_version;
        self.since_snapshot += appended;
        self.pending.clear();
    }
}

impl<A> fmt::Debug for Root<A>
where
    A: AggregateRoot + fmt::Debug,
    A::Event: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Root")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("state", &self.state)
            .field("pending", &self.pending)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
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
            if command.0 <= 0 {
                return Err("amount must be positive".to_string());
            }
            Ok(vec![TallyEvent::Added(command.0)])
        }
    }

    #[test]
    fn new_root_is_version_zero_with_nothing_pending() {
        let root = Root::<Tally>::new("t-1".to_string());
        assert_eq!(root.version(), 0);
        assert!(!root.has_pending());
        assert_eq!(root.state().total, 0);
    }

    #[test]
    fn record_applies_state_without_advancing_version() {
        let mut root = Root::<Tally>::new("t-1".to_string());
        root.record(TallyEvent::Added(3));
        assert_eq!(root.state().total, 3);
        assert_eq!(root.version(), 0);
        assert_eq!(root.pending().len(), 1);
    }

    #[test]
    fn execute_records_all_produced_events() {
        let mut root = Root::<Tally>::new("t-1".to_string());
        root.execute(&Add(2)).unwrap();
        root.execute(&Add(5)).unwrap();
        assert_eq!(root.state().total, 7);
        assert_eq!(root.pending().len(), 2);
    }

    #[test]
    fn rejected_command_records_nothing() {
        let mut root = Root::<Tally>::new("t-1".to_string());
        let err = root.execute(&Add(-1)).unwrap_err();
        assert_eq!(err, "amount must be positive");
        assert!(!root.has_pending());
        assert_eq!(root.state().total, 0);
    }

    #[test]
    fn confirm_persisted_drains_buffer_and_advances_version() {
        let mut root = Root::<Tally>::new("t-1".to_string());
        root.execute(&Add(2)).unwrap();
        root.execute(&Add(3)).unwrap();
        root.confirm_persisted(2);
        assert_eq!(root.version(), 2);
        assert!(!root.has_pending());
    }

    #[test]
    fn string_id_roundtrips() {
        let id = "account-42".to_string();
        assert_eq!(String::decode(&id.encode()).unwrap(), id);
    }

    #[test]
    fn uuid_id_roundtrips() {
        let id = uuid::Uuid::new_v4();
        assert_eq!(uuid::Uuid::decode(&id.encode()).unwrap(), id);
    }

    #[test]
    fn uuid_id_rejects_non_canonical_form() {
        let err = uuid::Uuid::decode("936DA01F9ABD4D9D80C702AF85C822A8").unwrap_err();
        assert!(err.to_string().contains("invalid aggregate id"));
    }
}
