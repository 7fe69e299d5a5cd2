//! In-memory snapshot store.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use crate::{
    aggregate::AggregateId,
    snapshot::{OfferError, Snapshot, SnapshotOffer, SnapshotStore},
};

/// When to accept a snapshot offer.
#[derive(Clone, Copy, Debug)]
pub enum SnapshotPolicy {
    /// Snapshot after every persist.
    Always,
    /// Snapshot once at least N events have accumulated since the last one.
    EveryNEvents(u64),
    /// Never snapshot (load-only mode, e.g. a read replica).
    Never,
}

impl SnapshotPolicy {
    #[must_use]
    pub const fn should_snapshot(&self, events_since: u64) -> bool {
        match self {
            Self::Always => true,
            Self::EveryNEvents(threshold) => events_since >= *threshold,
            Self::Never => false,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
struct SnapshotKey<Id> {
    kind: String,
    id: Id,
}

type SharedSnapshots<Id> = Arc<RwLock<HashMap<SnapshotKey<Id>, Snapshot>>>;

/// In-memory snapshot store with configurable policy.
///
/// Reference implementation for tests and development; production systems
/// implement [`SnapshotStore`] over durable storage.
#[derive(Clone, Debug)]
pub struct Store<Id> {
    snapshots: SharedSnapshots<Id>,
    policy: SnapshotPolicy,
}

impl<Id> Store<Id> {
    /// Snapshot after every persist.
    #[must_use]
    pub fn always() -> Self {
        Self::with_policy(SnapshotPolicy::Always)
    }

    /// Snapshot every `n` events. A reasonable starting cadence for most
    /// aggregates is 50-100.
    #[must_use]
    pub fn every(n: u64) -> Self {
        Self::with_policy(SnapshotPolicy::EveryNEvents(n))
    }

    /// Load-only: serve existing snapshots, never store new ones.
    #[must_use]
    pub fn never() -> Self {
        Self::with_policy(SnapshotPolicy::Never)
    }

    fn with_policy(policy: SnapshotPolicy) -> Self {
        Self {
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            policy,
        }
    }
}

impl<Id> Default for Store<Id> {
    fn default() -> Self {
        Self::always()
    }
}

impl<Id> SnapshotStore<Id> for Store<Id>
where
    Id: AggregateId,
{
    type Error = std::convert::Infallible;

    #[tracing::instrument(skip(self, id), fields(stream = %id.encode()))]
    async fn load(&self, kind: &str, id: &Id) -> Result<Option<Snapshot>, Self::Error> {
        let key = SnapshotKey {
            kind: kind.to_string(),
            id: id.clone(),
        };
        let snapshot = {
            let snapshots = self.snapshots.read().expect("snapshot store lock poisoned");
            snapshots.get(&key).cloned()
        };
        tracing::trace!(found = snapshot.is_some(), "snapshot lookup");
        Ok(snapshot)
    }

    #[tracing::instrument(skip(self, id, create), fields(stream = %id.encode()))]
    async fn offer<Create>(
        &self,
        kind: &str,
        id: &Id,
        events_since_last: u64,
        create: Create,
    ) -> Result<SnapshotOffer, OfferError<Self::Error>>
    where
        Create: FnOnce() -> Result<Snapshot, serde_json::Error> + Send,
    {
        if !self.policy.should_snapshot(events_since_last) {
            return Ok(SnapshotOffer::Declined);
        }

        let snapshot = create().map_err(OfferError::Create)?;
        let key = SnapshotKey {
            kind: kind.to_string(),
            id: id.clone(),
        };

        let offer = {
            let mut snapshots = self
                .snapshots
                .write()
                .expect("snapshot store lock poisoned");
            match snapshots.get(&key) {
                Some(existing) if existing.version >= snapshot.version => SnapshotOffer::Declined,
                _ => {
                    snapshots.insert(key, snapshot);
                    SnapshotOffer::Stored
                }
            }
        };

        tracing::debug!(events_since_last, ?offer, "snapshot offer evaluated");
        Ok(offer)
    }
}
