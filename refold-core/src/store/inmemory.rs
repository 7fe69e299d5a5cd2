//! In-memory message store.
//!
//! [`Store`] is a thread-safe reference implementation of
//! [`MessageStore`](super::MessageStore) suitable for unit tests, examples,
//! and prototyping. Appends take the write lock for the duration of the
//! version check plus insertion, which gives the all-or-nothing visibility
//! the contract requires; reads clone out of the map under the read lock and
//! hold nothing afterwards.

use std::{
    collections::HashMap,
    convert::Infallible,
    future::Future,
    sync::{Arc, RwLock},
};

use nonempty::NonEmpty;

use crate::{
    aggregate::AggregateId,
    store::{AppendError, ConcurrencyConflict, MessageStore, PersistableMessage, StoredMessage},
};

/// In-memory event store keyed by aggregate identity.
#[derive(Clone, Debug)]
pub struct Store<Id> {
    inner: Arc<RwLock<HashMap<Id, Vec<StoredMessage>>>>,
}

impl<Id> Store<Id> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<Id> Default for Store<Id> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Id> MessageStore for Store<Id>
where
    Id: AggregateId,
{
    type Id = Id;
    type Error = Infallible;

    #[tracing::instrument(skip(self, id, messages), fields(stream = %id.encode(), message_count = messages.len()))]
    fn append<'a>(
        &'a self,
        id: &'a Self::Id,
        expected_version: u64,
        messages: NonEmpty<PersistableMessage>,
    ) -> impl Future<Output = Result<u64, AppendError<Self::Error>>> + Send + 'a {
        let result = {
            let mut inner = self.inner.write().expect("in-memory store lock poisoned");
            let stream = inner.entry(id.clone()).or_default();
            let actual = stream.last().map_or(0, |m| m.version);
            if actual == expected_version {
                let mut version = expected_version;
                for message in messages {
                    version += 1;
                    stream.push(StoredMessage {
                        version,
                        kind: message.kind,
                        payload: message.payload,
                        headers: message.headers,
                        recorded_at: message.recorded_at,
                    });
                }
                tracing::debug!(new_version = version, "messages appended to stream");
                Ok(version)
            } else {
                tracing::debug!(expected_version, actual, "version mismatch, rejecting append");
                Err(AppendError::Conflict(ConcurrencyConflict {
                    stream: id.encode(),
                    expected: expected_version,
                    actual,
                }))
            }
        };
        std::future::ready(result)
    }

    #[tracing::instrument(skip(self, id), fields(stream = %id.encode()))]
    fn read_batch<'a>(
        &'a self,
        id: &'a Self::Id,
        after_version: u64,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<StoredMessage>, Self::Error>> + Send + 'a {
        let batch = {
            let inner = self.inner.read().expect("in-memory store lock poisoned");
            inner.get(id).map_or_else(Vec::new, |stream| {
                stream
                    .iter()
                    .filter(|m| m.version > after_version)
                    .take(limit)
                    .cloned()
                    .collect()
            })
        };
        tracing::trace!(messages_read = batch.len(), "read batch from stream");
        std::future::ready(Ok(batch))
    }

    #[tracing::instrument(skip(self, id), fields(stream = %id.encode()))]
    fn stream_version<'a>(
        &'a self,
        id: &'a Self::Id,
    ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a {
        let version = {
            let inner = self.inner.read().expect("in-memory store lock poisoned");
            inner
                .get(id)
                .and_then(|stream| stream.last())
                .map_or(0, |m| m.version)
        };
        std::future::ready(Ok(version))
    }
}
