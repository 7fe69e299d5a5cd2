#![doc = include_str!("../README.md")]

pub use refold_core::{
    aggregate,
    aggregate::{AggregateId, AggregateRoot, Apply, Handle, Root},
    clock,
    clock::{Clock, SystemClock},
    decorator,
    decorator::{DecoratorChain, MessageContext, MessageDecorator},
    dispatcher,
    dispatcher::{
        ChannelDispatcher, ConsumerDispatcher, DispatchError, MessageConsumer, MessageDispatcher,
        NoDispatch,
    },
    event,
    event::{DomainEvent, EventKind},
    message,
    message::{Headers, Message, SavedMessage},
    repository,
    repository::{
        AggregateRootRepository, CommandError, PersistError, RepositoryConfig, RetrieveError,
    },
    serializer,
    serializer::{EventPayload, EventRegistry, SerializationError},
};
#[cfg(feature = "test-util")]
pub use refold_core::test;

pub mod store {

    pub use refold_core::store::{
        AppendError, ConcurrencyConflict, MessageStore, MessageStream, NonEmpty,
        PersistableMessage, StoredMessage, inmemory,
    };
}

pub mod snapshot {

    pub use refold_core::snapshot::{
        NoSnapshots, OfferError, Snapshot, SnapshotOffer, SnapshotStore, inmemory,
    };
}
