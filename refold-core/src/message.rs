//! Message envelope and headers.
//!
//! A [`Message`] wraps a domain event with a [`Headers`] map populated by the
//! decorator pipeline before persistence. Headers are additive-only: the type
//! deliberately exposes no way to remove a key, so a decorator cannot drop
//! metadata attached earlier in the chain.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Standard header keys written by the stock decorators.
///
/// Applications are free to attach their own keys alongside these; each
/// decorator owns the keys it writes and leaves everything else untouched.
pub mod keys {
    /// Unique identifier assigned to the message before persistence.
    pub const EVENT_ID: &str = "event-id";
    /// RFC 3339 timestamp of when the message was recorded.
    pub const TIME_OF_RECORDING: &str = "time-of-recording";
    /// Identifier of the message or command that caused this one.
    pub const CAUSATION_ID: &str = "causation-id";
    /// Identifier shared by every message in one logical operation.
    pub const CORRELATION_ID: &str = "correlation-id";
}

/// Ordered, additive-only header map.
///
/// Keys are unique; iteration order is deterministic (sorted by key). There
/// is intentionally no `remove`: once a header is set it stays set for the
/// lifetime of the envelope. `set` replaces a value and exists for owners
/// re-stamping their own key; decorators that must be idempotent use
/// [`Headers::set_if_absent`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, Value>);

impl Headers {
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Get a header value as a string slice, if present and textual.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Set a header, replacing any existing value for the key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Set a header only when the key is not already present.
    ///
    /// Returns `true` when the value was written. This is the primitive that
    /// makes decorators idempotent: re-running a pipeline over an
    /// already-decorated message leaves every existing value untouched.
    pub fn set_if_absent(&mut self, key: impl Into<String>, value: impl Into<Value>) -> bool {
        let key = key.into();
        if self.0.contains_key(&key) {
            return false;
        }
        self.0.insert(key, value.into());
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Envelope pairing a domain event with its headers.
///
/// Constructed transiently per persist operation, enriched by the decorator
/// pipeline, then serialized into the store's wire form. An equivalent
/// envelope is reconstructed on read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message<E> {
    event: E,
    headers: Headers,
}

impl<E> Message<E> {
    /// Wrap an event with empty headers.
    #[must_use]
    pub fn new(event: E) -> Self {
        Self {
            event,
            headers: Headers::new(),
        }
    }

    /// Wrap an event with pre-populated headers (used when rehydrating a
    /// stored message).
    #[must_use]
    pub fn with_headers(event: E, headers: Headers) -> Self {
        Self { event, headers }
    }

    #[must_use]
    pub fn event(&self) -> &E {
        &self.event
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Set a header, replacing any existing value. Builder-style, for
    /// decorators that own the key unconditionally.
    #[must_use]
    pub fn set_header(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.set(key, value);
        self
    }

    /// Set a header only when absent. Builder-style; the idempotent variant
    /// decorators should reach for first.
    #[must_use]
    pub fn set_header_if_absent(
        mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.headers.set_if_absent(key, value);
        self
    }

    pub fn into_parts(self) -> (E, Headers) {
        (self.event, self.headers)
    }
}

/// A message that has been durably appended to a stream.
///
/// Carries the storage-assigned fields alongside the envelope: the stream
/// version the message landed at and the recording timestamp stamped at
/// persistence time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SavedMessage<E> {
    /// Position within the aggregate's stream (first event is 1).
    pub version: u64,
    /// When the message was recorded.
    pub recorded_at: DateTime<Utc>,
    /// The envelope as it was persisted.
    pub message: Message<E>,
}

impl<E> SavedMessage<E> {
    #[must_use]
    pub fn event(&self) -> &E {
        self.message.event()
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        self.message.headers()
    }
}
