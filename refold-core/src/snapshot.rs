//! Snapshot support for optimised aggregate loading.
//!
//! A snapshot caches aggregate state at a stream version so retrieval can
//! replay only the tail instead of the whole history. Snapshots are strictly
//! a cache in front of full replay: the stream stays the source of truth, and
//! a missing, stale, or unreadable snapshot degrades to replaying more
//! events, never to wrong state.
//!
//! - [`Snapshot`] - point-in-time aggregate state
//! - [`SnapshotStore`] - persistence trait with built-in cadence policy
//! - [`NoSnapshots`] - no-op default used when snapshots are not enabled
//! - [`inmemory`] - reference implementation with configurable policy

use std::{convert::Infallible, future::Future};

use serde_json::Value;
use thiserror::Error;

pub mod inmemory;

/// Point-in-time snapshot of aggregate state.
///
/// `version` is the stream version the state reflects; retrieval replays
/// only events after it. State is held as a JSON tree so snapshot stores
/// stay independent of concrete aggregate types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub version: u64,
    pub state: Value,
}

/// Result of offering a snapshot to a store.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SnapshotOffer {
    /// The store declined (policy said no, or it already holds something
    /// newer).
    Declined,
    /// The snapshot was persisted.
    Stored,
}

/// Error returned by [`SnapshotStore::offer`].
#[derive(Debug, Error)]
pub enum OfferError<StoreError>
where
    StoreError: std::error::Error + 'static,
{
    /// Serializing the aggregate state failed.
    #[error("failed to create snapshot: {0}")]
    Create(#[source] serde_json::Error),
    /// Persisting the snapshot failed.
    #[error("snapshot store error: {0}")]
    Store(#[source] StoreError),
}

/// Snapshot persistence with built-in policy.
///
/// Implementations decide both *how* to store snapshots and *when*: the
/// repository calls [`offer`](SnapshotStore::offer) after each successful
/// persist, and the store may decline without invoking the `create` callback,
/// skipping the serialization cost entirely.
pub trait SnapshotStore<Id: Send + Sync>: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// The most recent snapshot for an aggregate, if any.
    fn load(
        &self,
        kind: &str,
        id: &Id,
    ) -> impl Future<Output = Result<Option<Snapshot>, Self::Error>> + Send;

    /// Offer to snapshot, with lazy creation.
    ///
    /// `events_since_last` counts events applied since the snapshot the
    /// aggregate was loaded from, which is what cadence policies key on.
    fn offer<Create>(
        &self,
        kind: &str,
        id: &Id,
        events_since_last: u64,
        create: Create,
    ) -> impl Future<Output = Result<SnapshotOffer, OfferError<Self::Error>>> + Send
    where
        Create: FnOnce() -> Result<Snapshot, serde_json::Error> + Send;
}

/// No-op snapshot store: never loads anything, declines every offer.
///
/// This is the repository default; retrieval falls back to full replay.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoSnapshots;

impl NoSnapshots {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl<Id> SnapshotStore<Id> for NoSnapshots
where
    Id: Send + Sync,
{
    type Error = Infallible;

    async fn load(&self, _kind: &str, _id: &Id) -> Result<Option<Snapshot>, Self::Error> {
        Ok(None)
    }

    async fn offer<Create>(
        &self,
        _kind: &str,
        _id: &Id,
        _events_since_last: u64,
        _create: Create,
    ) -> Result<SnapshotOffer, OfferError<Self::Error>>
    where
        Create: FnOnce() -> Result<Snapshot, serde_json::Error> + Send,
    {
        Ok(SnapshotOffer::Declined)
    }
}
