//! Core traits and types for the Refold event-sourcing library.
//!
//! This crate provides the foundational abstractions for an event-sourcing
//! persistence core:
//!
//! - [`aggregate`] - Command-side primitives (`AggregateRoot`, `Apply`,
//!   `Handle`, `Root`)
//! - [`event`] - Domain event marker traits (`DomainEvent`, `EventKind`)
//! - [`serializer`] - Closed event registry mapping discriminators to
//!   encode/decode pairs (`EventRegistry`)
//! - [`message`] - Envelope and additive-only headers (`Message`, `Headers`)
//! - [`decorator`] - Metadata pipeline applied before persistence
//!   (`DecoratorChain`, stock decorators)
//! - [`store`] - Storage-backend contract with optimistic concurrency
//!   (`MessageStore`, `MessageStream`)
//! - [`repository`] - Aggregate load/persist orchestration
//!   (`AggregateRootRepository`)
//! - [`dispatcher`] - Post-persist delivery to consumers
//!   (`MessageDispatcher`, `MessageConsumer`)
//! - [`snapshot`] - Optional state cache in front of full replay
//!   (`SnapshotStore`)
//! - [`clock`] - Time source seam (`Clock`, `SystemClock`)
//!
//! Most users should depend on the `refold` crate, which re-exports these
//! types with a cleaner API surface.

pub mod aggregate;
pub mod clock;
pub mod decorator;
pub mod dispatcher;
pub mod event;
pub mod message;
pub mod repository;
pub mod serializer;
pub mod snapshot;
pub mod store;

// Test utilities module: public when the feature is enabled, internal for
// crate tests.
#[cfg(feature = "test-util")]
pub mod test;

#[cfg(all(test, not(feature = "test-util")))]
pub(crate) mod test;
