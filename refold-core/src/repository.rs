//! Aggregate root repository.
//!
//! [`AggregateRootRepository`] bridges the message store and an aggregate's
//! business logic: retrieval reads the stream and folds events into a fresh
//! aggregate, persistence decorates and serializes the pending buffer,
//! appends it under the optimistic version check, and hands the saved batch
//! to the dispatcher.
//!
//! Everything the repository needs is passed at construction (store,
//! registry, decorator chain, dispatcher, clock) with single-owner lifetime.
//! There is no process-wide registration to consult.
//!
//! Snapshot support is opt-in via `with_snapshots`. This keeps the default
//! repository lightweight: no snapshot load/serialize work and no serde
//! bounds on aggregate state unless snapshots are enabled.

use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::{
    aggregate::{AggregateId, AggregateRoot, Handle, Root},
    clock::{Clock, SystemClock},
    decorator::DecoratorChain,
    dispatcher::{MessageDispatcher, NoDispatch},
    message::{Message, SavedMessage},
    serializer::{EventRegistry, SerializationError},
    snapshot::{NoSnapshots, Snapshot, SnapshotOffer, SnapshotStore},
    store::{AppendError, MessageStore, MessageStream, NonEmpty, PersistableMessage},
};

/// Tunables for repository reads.
#[derive(Clone, Copy, Debug)]
pub struct RepositoryConfig {
    /// Messages fetched per storage round-trip while replaying or streaming.
    pub page_size: usize,
}

impl RepositoryConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self { page_size: 256 }
    }
}

/// Error loading an aggregate from its stream.
#[derive(Debug, Error)]
pub enum RetrieveError<StoreError>
where
    StoreError: std::error::Error + 'static,
{
    /// The caller required prior existence and the stream was empty.
    #[error("aggregate `{id}` not found")]
    NotFound { id: String },
    /// A stored payload could not be decoded; replay stops rather than skip.
    #[error("failed to decode stored event: {0}")]
    Serialization(#[source] SerializationError),
    /// A stored snapshot's state no longer matches the aggregate's shape.
    #[error("failed to restore snapshot state: {0}")]
    SnapshotState(#[source] serde_json::Error),
    /// Underlying storage fault.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

/// Error persisting an aggregate's pending events.
#[derive(Debug, Error)]
pub enum PersistError<StoreError>
where
    StoreError: std::error::Error + 'static,
{
    /// Another writer advanced the stream; reload and re-run the command.
    /// Propagated unchanged, the repository never retries on its own.
    #[error(transparent)]
    Conflict(crate::store::ConcurrencyConflict),
    /// A pending event could not be encoded.
    #[error("failed to encode pending event: {0}")]
    Serialization(#[source] SerializationError),
    /// Underlying storage fault.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

/// Error executing a command end to end (load, handle, persist).
#[derive(Debug, Error)]
pub enum CommandError<AggregateError, StoreError>
where
    StoreError: std::error::Error + 'static,
{
    /// The aggregate rejected the command; nothing was written.
    #[error("aggregate rejected command: {0}")]
    Aggregate(AggregateError),
    /// Loading the aggregate failed.
    #[error("failed to load aggregate: {0}")]
    Retrieve(#[source] RetrieveError<StoreError>),
    /// Persisting the produced events failed.
    #[error("failed to persist events: {0}")]
    Persist(#[source] PersistError<StoreError>),
}

/// Snapshot-enabled repository mode wrapper.
pub struct Snapshots<SS>(pub SS);

/// Orchestrates aggregate load and save against a [`MessageStore`].
pub struct AggregateRootRepository<A, S, D = NoDispatch, M = NoSnapshots>
where
    A: AggregateRoot,
{
    store: S,
    registry: EventRegistry<A::Event>,
    decorators: DecoratorChain<A::Event>,
    dispatcher: D,
    snapshots: M,
    config: RepositoryConfig,
    clock: Arc<dyn Clock>,
}

impl<A, S> AggregateRootRepository<A, S>
where
    A: AggregateRoot,
    S: MessageStore<Id = A::Id>,
{
    /// Build a repository with the standard decorator chain, no dispatch,
    /// and no snapshots.
    #[must_use]
    pub fn new(store: S, registry: EventRegistry<A::Event>) -> Self {
        Self {
            store,
            registry,
            decorators: DecoratorChain::standard(),
            dispatcher: NoDispatch,
            snapshots: NoSnapshots,
            config: RepositoryConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl<A, S, D, M> AggregateRootRepository<A, S, D, M>
where
    A: AggregateRoot + Send + Sync,
    A::Event: Send + Sync + 'static,
    S: MessageStore<Id = A::Id>,
    D: MessageDispatcher<A::Event>,
{
    /// Replace the decorator chain.
    #[must_use]
    pub fn with_decorators(mut self, decorators: DecoratorChain<A::Event>) -> Self {
        self.decorators = decorators;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: RepositoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the time source used to stamp `recorded_at`.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Attach a dispatcher notified after every successful persist.
    #[must_use]
    pub fn with_dispatcher<D2>(self, dispatcher: D2) -> AggregateRootRepository<A, S, D2, M>
    where
        D2: MessageDispatcher<A::Event>,
    {
        AggregateRootRepository {
            store: self.store,
            registry: self.registry,
            decorators: self.decorators,
            dispatcher,
            snapshots: self.snapshots,
            config: self.config,
            clock: self.clock,
        }
    }

    /// Enable snapshot-seeded retrieval backed by `snapshots`.
    #[must_use]
    pub fn with_snapshots<SS>(self, snapshots: SS) -> AggregateRootRepository<A, S, D, Snapshots<SS>>
    where
        SS: SnapshotStore<A::Id>,
    {
        AggregateRootRepository {
            store: self.store,
            registry: self.registry,
            decorators: self.decorators,
            dispatcher: self.dispatcher,
            snapshots: Snapshots(snapshots),
            config: self.config,
            clock: self.clock,
        }
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn registry(&self) -> &EventRegistry<A::Event> {
        &self.registry
    }

    /// Lazily stream every stored message of `id` as typed envelopes.
    pub fn messages(&self, id: &A::Id) -> TypedMessageStream<'_, S, A::Event> {
        self.messages_after(id, 0)
    }

    /// Lazily stream the tail of `id`: messages after `version`. Used for
    /// incremental catch-up consumers.
    pub fn messages_after(&self, id: &A::Id, version: u64) -> TypedMessageStream<'_, S, A::Event> {
        TypedMessageStream {
            inner: MessageStream::after_version(
                &self.store,
                id.clone(),
                version,
                self.config.page_size,
            ),
            registry: &self.registry,
        }
    }

    /// Fold the stream (after `after_version`) into `seed`.
    async fn replay(
        &self,
        id: &A::Id,
        seed: A,
        after_version: u64,
    ) -> Result<Root<A>, RetrieveError<S::Error>> {
        let mut state = seed;
        let mut version = after_version;
        let mut folded = 0_u64;
        let mut stream = MessageStream::after_version(
            &self.store,
            id.clone(),
            after_version,
            self.config.page_size,
        );
        while let Some(stored) = stream.next().await.map_err(RetrieveError::Store)? {
            let event = self
                .registry
                .deserialize(&stored.kind, &stored.payload)
                .map_err(RetrieveError::Serialization)?;
            state.apply(&event);
            version = stored.version;
            folded += 1;
        }
        tracing::debug!(events_replayed = folded, version, "aggregate reconstituted");
        Ok(Root::reconstituted(id.clone(), version, state, folded))
    }

    /// Decorate, serialize, append, dispatch. Shared by both repository
    /// modes; snapshot offers happen in the callers.
    async fn persist_inner(
        &self,
        root: &mut Root<A>,
    ) -> Result<Vec<SavedMessage<A::Event>>, PersistError<S::Error>>
    where
        A::Event: Clone,
    {
        let expected = root.version();
        let recorded_at = self.clock.now();

        let mut staged = Vec::with_capacity(root.pending().len());
        let mut wire = Vec::with_capacity(root.pending().len());
        for event in root.pending() {
            let message = self.decorators.decorate(Message::new(event.clone()));
            let payload = self
                .registry
                .serialize(message.event())
                .map_err(PersistError::Serialization)?;
            wire.push(PersistableMessage {
                kind: payload.kind.to_string(),
                payload: payload.data,
                headers: message.headers().clone(),
                recorded_at,
            });
            staged.push(message);
        }

        let Some(batch) = NonEmpty::from_vec(wire) else {
            tracing::trace!("nothing pending, persist is a no-op");
            return Ok(Vec::new());
        };

        let new_version = match self.store.append(root.id(), expected, batch).await {
            Ok(version) => version,
            Err(AppendError::Conflict(conflict)) => return Err(PersistError::Conflict(conflict)),
            Err(AppendError::Store(error)) => return Err(PersistError::Store(error)),
        };
        root.confirm_persisted(new_version);

        let saved: Vec<SavedMessage<A::Event>> = staged
            .into_iter()
            .zip(expected + 1..)
            .map(|(message, version)| SavedMessage {
                version,
                recorded_at,
                message,
            })
            .collect();

        if let Err(error) = self.dispatcher.dispatch(&saved).await {
            // The append is already durable; delivery failures are reported,
            // never rolled back.
            tracing::error!(
                error = %error,
                stream = %root.id().encode(),
                "dispatch of persisted messages failed"
            );
        }

        Ok(saved)
    }
}

impl<A, S, D> AggregateRootRepository<A, S, D, NoSnapshots>
where
    A: AggregateRoot + Send + Sync,
    A::Event: Send + Sync,
    S: MessageStore<Id = A::Id>,
    D: MessageDispatcher<A::Event>,
{
    /// Load an aggregate by replaying its full stream.
    ///
    /// An identity with no history yields a valid version-0 root; use
    /// [`retrieve_existing`](Self::retrieve_existing) when absence is an
    /// error.
    #[tracing::instrument(skip(self, id), fields(aggregate = A::KIND, stream = %id.encode()))]
    pub async fn retrieve(&self, id: &A::Id) -> Result<Root<A>, RetrieveError<S::Error>> {
        self.replay(id, A::default(), 0).await
    }

    /// Load an aggregate that must already exist.
    pub async fn retrieve_existing(&self, id: &A::Id) -> Result<Root<A>, RetrieveError<S::Error>> {
        let root = self.retrieve(id).await?;
        if root.version() == 0 {
            return Err(RetrieveError::NotFound { id: id.encode() });
        }
        Ok(root)
    }

    /// Persist the root's pending events at `expected_version = root.version()`.
    ///
    /// An empty pending buffer is an `Ok` no-op. On success the buffer is
    /// cleared, the version advances by the batch size, and the saved batch
    /// is returned (and dispatched). A [`PersistError::Conflict`] leaves the
    /// root untouched; reload and re-run the command to recover.
    #[tracing::instrument(
        skip(self, root),
        fields(
            aggregate = A::KIND,
            stream = %root.id().encode(),
            expected_version = root.version(),
            pending = root.pending().len(),
        )
    )]
    pub async fn persist(
        &self,
        root: &mut Root<A>,
    ) -> Result<Vec<SavedMessage<A::Event>>, PersistError<S::Error>>
    where
        A::Event: Clone,
    {
        self.persist_inner(root).await
    }

    /// Load, handle one command, persist: the common write path.
    pub async fn execute<C>(
        &self,
        id: &A::Id,
        command: &C,
    ) -> Result<Vec<SavedMessage<A::Event>>, CommandError<A::Error, S::Error>>
    where
        A: Handle<C>,
        A::Event: Clone,
        C: Sync,
    {
        let mut root = self.retrieve(id).await.map_err(CommandError::Retrieve)?;
        root.execute(command).map_err(CommandError::Aggregate)?;
        self.persist(&mut root).await.map_err(CommandError::Persist)
    }

    /// [`execute`](Self::execute), retried on concurrency conflicts.
    ///
    /// Each retry reloads the aggregate and re-runs the command against
    /// fresher state; up to `max_retries` retries after the first attempt.
    /// Every other error returns immediately.
    pub async fn execute_with_retry<C>(
        &self,
        id: &A::Id,
        command: &C,
        max_retries: usize,
    ) -> Result<Vec<SavedMessage<A::Event>>, CommandError<A::Error, S::Error>>
    where
        A: Handle<C>,
        A::Event: Clone,
        C: Sync,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.execute(id, command).await {
                Err(CommandError::Persist(PersistError::Conflict(conflict)))
                    if attempt <= max_retries =>
                {
                    tracing::debug!(attempt, %conflict, "conflict, re-running command");
                }
                other => return other,
            }
        }
    }
}

impl<A, S, D, SS> AggregateRootRepository<A, S, D, Snapshots<SS>>
where
    A: AggregateRoot + Serialize + DeserializeOwned + Send + Sync,
    A::Event: Send + Sync,
    S: MessageStore<Id = A::Id>,
    D: MessageDispatcher<A::Event>,
    SS: SnapshotStore<A::Id>,
{
    #[must_use]
    pub fn snapshot_store(&self) -> &SS {
        &self.snapshots.0
    }

    /// Load an aggregate, seeding from the latest usable snapshot and
    /// replaying only the tail.
    ///
    /// A snapshot that fails to load falls back to full replay; a snapshot
    /// ahead of its stream is ignored. A snapshot whose state no longer
    /// deserializes is surfaced as corruption.
    #[tracing::instrument(skip(self, id), fields(aggregate = A::KIND, stream = %id.encode()))]
    pub async fn retrieve(&self, id: &A::Id) -> Result<Root<A>, RetrieveError<S::Error>> {
        match self.usable_snapshot(id).await? {
            Some(snapshot) => {
                let state: A = serde_json::from_value(snapshot.state)
                    .map_err(RetrieveError::SnapshotState)?;
                self.replay(id, state, snapshot.version).await
            }
            None => self.replay(id, A::default(), 0).await,
        }
    }

    /// Load an aggregate that must already exist.
    pub async fn retrieve_existing(&self, id: &A::Id) -> Result<Root<A>, RetrieveError<S::Error>> {
        let root = self.retrieve(id).await?;
        if root.version() == 0 {
            return Err(RetrieveError::NotFound { id: id.encode() });
        }
        Ok(root)
    }

    async fn usable_snapshot(
        &self,
        id: &A::Id,
    ) -> Result<Option<Snapshot>, RetrieveError<S::Error>> {
        let snapshot = self
            .snapshots
            .0
            .load(A::KIND, id)
            .await
            .inspect_err(|error| {
                tracing::error!(
                    error = %error,
                    "failed to load snapshot, falling back to full replay"
                );
            })
            .ok()
            .flatten();
        let Some(snapshot) = snapshot else {
            return Ok(None);
        };
        let current = self
            .store
            .stream_version(id)
            .await
            .map_err(RetrieveError::Store)?;
        if snapshot.version > current {
            tracing::warn!(
                snapshot_version = snapshot.version,
                stream_version = current,
                "snapshot is ahead of its stream, ignoring it"
            );
            return Ok(None);
        }
        Ok(Some(snapshot))
    }

    /// Persist pending events, then offer the post-persist state to the
    /// snapshot store.
    ///
    /// A declined or failed snapshot offer never fails the persist: the
    /// stream is authoritative and the snapshot is only a cache.
    #[tracing::instrument(
        skip(self, root),
        fields(
            aggregate = A::KIND,
            stream = %root.id().encode(),
            expected_version = root.version(),
            pending = root.pending().len(),
        )
    )]
    pub async fn persist(
        &self,
        root: &mut Root<A>,
    ) -> Result<Vec<SavedMessage<A::Event>>, PersistError<S::Error>>
    where
        A::Event: Clone,
    {
        let saved = self.persist_inner(root).await?;
        if saved.is_empty() {
            return Ok(saved);
        }

        let version = root.version();
        let state = root.state();
        let offered = self
            .snapshots
            .0
            .offer(A::KIND, root.id(), root.since_snapshot, move || {
                Ok(Snapshot {
                    version,
                    state: serde_json::to_value(state)?,
                })
            })
            .await;
        match offered {
            Ok(SnapshotOffer::Stored) => {
                root.since_snapshot = 0;
                tracing::debug!(version, "snapshot stored");
            }
            Ok(SnapshotOffer::Declined) => {}
            Err(error) => {
                tracing::error!(error = %error, "failed to store snapshot");
            }
        }

        Ok(saved)
    }

    /// Load, handle one command, persist: the common write path.
    pub async fn execute<C>(
        &self,
        id: &A::Id,
        command: &C,
    ) -> Result<Vec<SavedMessage<A::Event>>, CommandError<A::Error, S::Error>>
    where
        A: Handle<C>,
        A::Event: Clone,
        C: Sync,
    {
        let mut root = self.retrieve(id).await.map_err(CommandError::Retrieve)?;
        root.execute(command).map_err(CommandError::Aggregate)?;
        self.persist(&mut root).await.map_err(CommandError::Persist)
    }

    /// [`execute`](Self::execute), retried on concurrency conflicts.
    pub async fn execute_with_retry<C>(
        &self,
        id: &A::Id,
        command: &C,
        max_retries: usize,
    ) -> Result<Vec<SavedMessage<A::Event>>, CommandError<A::Error, S::Error>>
    where
        A: Handle<C>,
        A::Event: Clone,
        C: Sync,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.execute(id, command).await {
                Err(CommandError::Persist(PersistError::Conflict(conflict)))
                    if attempt <= max_retries =>
                {
                    tracing::debug!(attempt, %conflict, "conflict, re-running command");
                }
                other => return other,
            }
        }
    }
}

/// Lazy reader over one stream, yielding typed envelopes.
///
/// Wraps [`MessageStream`] with the repository's registry so consumers pull
/// decoded [`SavedMessage`]s page by page. Same guarantees as the raw stream:
/// abandoning it mid-iteration has no side effects, and a decode failure
/// surfaces instead of being skipped.
pub struct TypedMessageStream<'a, S: MessageStore, E> {
    inner: MessageStream<'a, S>,
    registry: &'a EventRegistry<E>,
}

impl<S: MessageStore, E: 'static> TypedMessageStream<'_, S, E> {
    /// The next decoded message, or `None` once the stream is drained.
    pub async fn next(&mut self) -> Result<Option<SavedMessage<E>>, RetrieveError<S::Error>> {
        let Some(stored) = self.inner.next().await.map_err(RetrieveError::Store)? else {
            return Ok(None);
        };
        let event = self
            .registry
            .deserialize(&stored.kind, &stored.payload)
            .map_err(RetrieveError::Serialization)?;
        Ok(Some(SavedMessage {
            version: stored.version,
            recorded_at: stored.recorded_at,
            message: Message::with_headers(event, stored.headers),
        }))
    }

    /// Drain the remainder of the stream into a vector.
    pub async fn collect(mut self) -> Result<Vec<SavedMessage<E>>, RetrieveError<S::Error>> {
        let mut messages = Vec::new();
        while let Some(message) = self.next().await? {
            messages.push(message);
        }
        Ok(messages)
    }
}
