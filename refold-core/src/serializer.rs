//! Event serialization.
//!
//! The [`EventRegistry`] is a closed table mapping each event kind to an
//! encode/decode pair for one aggregate's event sum type. Dispatch is a plain
//! table lookup; an unknown discriminator is always a reported error, never a
//! skipped or defaulted event, because replay correctness depends on exact
//! field recovery.

use std::{collections::BTreeMap, fmt};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;

use crate::event::DomainEvent;

/// Error converting between a typed event and its stored payload.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// A stored payload's discriminator is not registered.
    #[error("unknown event kind `{kind}`, expected one of {expected:?}")]
    UnknownKind {
        kind: String,
        expected: Vec<&'static str>,
    },
    /// An event value matched none of the registered variants.
    #[error("event variant is not registered; registered kinds: {expected:?}")]
    Unregistered { expected: Vec<&'static str> },
    /// Encoding a registered event failed.
    #[error("failed to encode event `{kind}`: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    /// A stored payload is malformed for its declared kind (missing or
    /// mistyped fields).
    #[error("failed to decode event `{kind}`: {source}")]
    Decode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Storage-neutral encoded event: a discriminator plus a JSON payload tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventPayload {
    pub kind: &'static str,
    pub data: Value,
}

type EncodeFn<E> = Box<dyn Fn(&E) -> Option<Result<Value, serde_json::Error>> + Send + Sync>;
type DecodeFn<E> = Box<dyn Fn(&Value) -> Result<E, serde_json::Error> + Send + Sync>;

struct Entry<E> {
    encode: EncodeFn<E>,
    decode: DecodeFn<E>,
}

/// Closed registry of the event variants one aggregate persists.
///
/// Each variant is registered with two plain functions: `into` lifts the
/// concrete event into the sum type, `project` extracts it back out. Both are
/// fn pointers, so registration stays declarative:
///
/// ```ignore
/// let registry = EventRegistry::new()
///     .with(AccountEvent::Opened, |e| match e {
///         AccountEvent::Opened(v) => Some(v),
///         _ => None,
///     })
///     .with(AccountEvent::Deposited, |e| match e {
///         AccountEvent::Deposited(v) => Some(v),
///         _ => None,
///     });
/// ```
pub struct EventRegistry<E> {
    entries: BTreeMap<&'static str, Entry<E>>,
}

impl<E: 'static> EventRegistry<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Register one event variant under [`DomainEvent::KIND`].
    ///
    /// Registering the same kind twice replaces the earlier entry; the
    /// registry stays closed over whatever was registered last.
    #[must_use]
    pub fn with<V>(mut self, into: fn(V) -> E, project: fn(&E) -> Option<&V>) -> Self
    where
        V: DomainEvent + Serialize + DeserializeOwned + 'static,
    {
        let entry = Entry {
            encode: Box::new(move |event| project(event).map(serde_json::to_value)),
            decode: Box::new(move |data| serde_json::from_value::<V>(data.clone()).map(into)),
        };
        self.entries.insert(V::KIND, entry);
        self
    }

    /// The kinds this registry can encode and decode.
    #[must_use]
    pub fn kinds(&self) -> Vec<&'static str> {
        self.entries.keys().copied().collect()
    }

    /// Encode an event into its storage-neutral payload.
    pub fn serialize(&self, event: &E) -> Result<EventPayload, SerializationError> {
        for (&kind, entry) in &self.entries {
            if let Some(result) = (entry.encode)(event) {
                let data = result.map_err(|source| SerializationError::Encode { kind, source })?;
                return Ok(EventPayload { kind, data });
            }
        }
        Err(SerializationError::Unregistered {
            expected: self.kinds(),
        })
    }

    /// Decode a stored payload back into the sum type.
    pub fn deserialize(&self, kind: &str, data: &Value) -> Result<E, SerializationError> {
        let entry = self
            .entries
            .get(kind)
            .ok_or_else(|| SerializationError::UnknownKind {
                kind: kind.to_string(),
                expected: self.kinds(),
            })?;
        (entry.decode)(data).map_err(|source| SerializationError::Decode {
            kind: kind.to_string(),
            source,
        })
    }
}

impl<E: 'static> Default for EventRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: 'static> fmt::Debug for EventRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Deposited {
        amount: i64,
    }

    impl DomainEvent for Deposited {
        const KIND: &'static str = "deposited";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Withdrawn {
        amount: i64,
    }

    impl DomainEvent for Withdrawn {
        const KIND: &'static str = "withdrawn";
    }

    #[derive(Debug, Clone, PartialEq)]
    enum AccountEvent {
        Deposited(Deposited),
        Withdrawn(Withdrawn),
    }

    fn registry() -> EventRegistry<AccountEvent> {
        EventRegistry::new()
            .with(AccountEvent::Deposited, |e| match e {
                AccountEvent::Deposited(v) => Some(v),
                AccountEvent::Withdrawn(_) => None,
            })
            .with(AccountEvent::Withdrawn, |e| match e {
                AccountEvent::Withdrawn(v) => Some(v),
                AccountEvent::Deposited(_) => None,
            })
    }

    #[test]
    fn serialize_picks_the_matching_variant() {
        let registry = registry();
        let payload = registry
            .serialize(&AccountEvent::Withdrawn(Withdrawn { amount: 5 }))
            .unwrap();
        assert_eq!(payload.kind, "withdrawn");
        assert_eq!(payload.data, serde_json::json!({ "amount": 5 }));
    }

    #[test]
    fn roundtrip_recovers_the_event() {
        let registry = registry();
        let event = AccountEvent::Deposited(Deposited { amount: 42 });
        let payload = registry.serialize(&event).unwrap();
        let decoded = registry.deserialize(payload.kind, &payload.data).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn unknown_kind_is_an_error() {
        let registry = registry();
        let err = registry
            .deserialize("renamed-event", &serde_json::json!({}))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unknown event kind `renamed-event`"));
        assert!(msg.contains("deposited"));
    }

    #[test]
    fn missing_field_is_an_error_not_a_default() {
        let registry = registry();
        let err = registry
            .deserialize("deposited", &serde_json::json!({ "wrong_field": 1 }))
            .unwrap_err();
        assert!(matches!(err, SerializationError::Decode { .. }));
    }

    #[test]
    fn unregistered_variant_is_an_error() {
        let partial: EventRegistry<AccountEvent> =
            EventRegistry::new().with(AccountEvent::Deposited, |e| match e {
                AccountEvent::Deposited(v) => Some(v),
                AccountEvent::Withdrawn(_) => None,
            });
        let err = partial
            .serialize(&AccountEvent::Withdrawn(Withdrawn { amount: 1 }))
            .unwrap_err();
        assert!(matches!(err, SerializationError::Unregistered { .. }));
    }

    #[test]
    fn kinds_are_sorted_and_stable() {
        assert_eq!(registry().kinds(), vec!["deposited", "withdrawn"]);
    }
}
