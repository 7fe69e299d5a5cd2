//! Persistence layer abstractions.
//!
//! This module describes the storage-backend contract ([`MessageStore`]),
//! the wire forms crossing that boundary ([`PersistableMessage`],
//! [`StoredMessage`]), the optimistic-concurrency error, and the lazy stream
//! reader ([`MessageStream`]). A reference in-memory implementation lives in
//! [`inmemory`].
//!
//! A stream is the per-aggregate ordered sequence of stored messages, with
//! strictly increasing, gap-free versions starting at 1. The version of an
//! empty stream is 0, which is also the `expected_version` a writer passes
//! when creating a new aggregate.

use std::{collections::VecDeque, future::Future};

use chrono::{DateTime, Utc};
pub use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{aggregate::AggregateId, message::Headers};

pub mod inmemory;

/// Serialized message ready to be appended.
///
/// This is the boundary between the repository and a [`MessageStore`]: the
/// repository decorates and serializes, the store assigns versions and
/// persists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistableMessage {
    pub kind: String,
    pub payload: Value,
    pub headers: Headers,
    pub recorded_at: DateTime<Utc>,
}

/// Message materialized from a stream, with its storage-assigned version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Position within the stream; the first message of a stream is 1.
    pub version: u64,
    pub kind: String,
    pub payload: Value,
    pub headers: Headers,
    pub recorded_at: DateTime<Utc>,
}

/// Expected-version mismatch detected at append time.
///
/// Exactly one of two writers racing with the same expected version wins;
/// the loser receives this error with nothing written. Recoverable: reload
/// the aggregate and re-run the command against fresher state.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error(
    "concurrency conflict on stream `{stream}`: expected version {expected}, found {actual} \
     (hint: another writer advanced this stream; reload and retry)"
)]
pub struct ConcurrencyConflict {
    /// Encoded identity of the contested stream.
    pub stream: String,
    /// The version the writer observed when it loaded.
    pub expected: u64,
    /// The stream's actual version at append time.
    pub actual: u64,
}

/// Error from an append with version checking.
#[derive(Debug, Error)]
pub enum AppendError<StoreError>
where
    StoreError: std::error::Error,
{
    /// Another writer modified the stream since it was read.
    #[error(transparent)]
    Conflict(#[from] ConcurrencyConflict),
    /// Underlying storage fault (I/O failure, constraint violation).
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

/// Storage-backend contract: durable, ordered, per-identity append and read.
///
/// The core is agnostic to whether this is a relational table, a log file, or
/// an in-memory map; it only requires the stated atomicity and ordering
/// guarantees:
///
/// - `append` is all-or-nothing: a partially applied batch is never visible
///   to readers, and a conflicting append writes nothing.
/// - `read_batch` returns messages in ascending version order; repeated reads
///   of an unchanged stream return equivalent content.
/// - concurrency control is the version comparison inside `append`, never an
///   in-process lock held across unrelated streams.
pub trait MessageStore: Send + Sync {
    /// Aggregate identity type used as the stream key.
    type Id: AggregateId;

    /// Backend-specific error type for non-concurrency faults.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Append a batch atomically, starting at `expected_version + 1`.
    ///
    /// Returns the stream's new version. Fails with
    /// [`AppendError::Conflict`] when the stream's current version differs
    /// from `expected_version`, with nothing written.
    fn append<'a>(
        &'a self,
        id: &'a Self::Id,
        expected_version: u64,
        messages: NonEmpty<PersistableMessage>,
    ) -> impl Future<Output = Result<u64, AppendError<Self::Error>>> + Send + 'a;

    /// Read up to `limit` messages with versions strictly greater than
    /// `after_version`, in ascending version order.
    ///
    /// An unknown identity yields an empty batch, not an error.
    fn read_batch<'a>(
        &'a self,
        id: &'a Self::Id,
        after_version: u64,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<StoredMessage>, Self::Error>> + Send + 'a;

    /// Current version of a stream; 0 for an identity with no history.
    fn stream_version<'a>(
        &'a self,
        id: &'a Self::Id,
    ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'a;
}

/// Lazy, restartable reader over one stream.
///
/// Pulls pages from [`MessageStore::read_batch`] on demand, so a consumer can
/// stop partway through a long stream without having materialized the rest.
/// Dropping the stream has no side effects; constructing a new one re-reads
/// equivalent content (modulo concurrent appends).
#[derive(Debug)]
pub struct MessageStream<'a, S: MessageStore> {
    store: &'a S,
    id: S::Id,
    cursor: u64,
    page: VecDeque<StoredMessage>,
    page_size: usize,
    exhausted: bool,
}

impl<'a, S: MessageStore> MessageStream<'a, S> {
    /// Stream every message of `id` from the beginning.
    pub fn all(store: &'a S, id: S::Id, page_size: usize) -> Self {
        Self::after_version(store, id, 0, page_size)
    }

    /// Stream the tail of `id`: messages with versions greater than
    /// `version`. Used for incremental catch-up reads.
    pub fn after_version(store: &'a S, id: S::Id, version: u64, page_size: usize) -> Self {
        Self {
            store,
            id,
            cursor: version,
            page: VecDeque::new(),
            page_size: page_size.max(1),
            exhausted: false,
        }
    }

    /// The next message, or `None` once the stream is drained.
    pub async fn next(&mut self) -> Result<Option<StoredMessage>, S::Error> {
        loop {
            if let Some(message) = self.page.pop_front() {
                self.cursor = message.version;
                return Ok(Some(message));
            }
            if self.exhausted {
                return Ok(None);
            }
            let batch = self
                .store
                .read_batch(&self.id, self.cursor, self.page_size)
                .await?;
            if batch.len() < self.page_size {
                self.exhausted = true;
            }
            if batch.is_empty() {
                return Ok(None);
            }
            self.page.extend(batch);
        }
    }

    /// Drain the remainder of the stream into a vector.
    pub async fn collect(mut self) -> Result<Vec<StoredMessage>, S::Error> {
        let mut messages = Vec::new();
        while let Some(message) = self.next().await? {
            messages.push(message);
        }
        Ok(messages)
    }
}
