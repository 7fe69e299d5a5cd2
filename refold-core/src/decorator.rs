//! Message decoration pipeline.
//!
//! Decorators enrich a [`Message`] with headers before it reaches the store:
//! recording time, a fresh event identifier, causation/correlation
//! identifiers from the current operation. A pipeline is an ordered list of
//! values implementing one transform capability, composed by sequential
//! application. Decorators are pure with respect to everything but the
//! headers they own: they never touch the event payload, never perform I/O,
//! and never remove or rewrite a key another decorator set.

use crate::{
    clock::{Clock, SystemClock},
    message::{Message, keys},
};

/// One step of the decoration pipeline: a pure `Message -> Message`
/// transform.
///
/// Implementations must be idempotent for the headers they own: re-running
/// the pipeline over an already-decorated message must not change any
/// existing value. [`Message::set_header_if_absent`] gives that for free.
pub trait MessageDecorator<E>: Send + Sync {
    fn decorate(&self, message: Message<E>) -> Message<E>;
}

/// Ordered chain of decorators, applied first-to-last.
pub struct DecoratorChain<E> {
    decorators: Vec<Box<dyn MessageDecorator<E>>>,
}

impl<E> DecoratorChain<E> {
    /// An empty chain: messages pass through untouched.
    #[must_use]
    pub fn new() -> Self {
        Self {
            decorators: Vec::new(),
        }
    }

    /// The usual production chain: recording time from the system clock,
    /// then a fresh event identifier.
    #[must_use]
    pub fn standard() -> Self {
        Self::new()
            .with(RecordingTime::system())
            .with(EventIdentifier)
    }

    /// Append a decorator to the end of the chain.
    #[must_use]
    pub fn with(mut self, decorator: impl MessageDecorator<E> + 'static) -> Self {
        self.decorators.push(Box::new(decorator));
        self
    }

    /// Run the full chain over one message.
    #[must_use]
    pub fn decorate(&self, message: Message<E>) -> Message<E> {
        self.decorators
            .iter()
            .fold(message, |message, decorator| decorator.decorate(message))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.decorators.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.decorators.is_empty()
    }
}

impl<E> Default for DecoratorChain<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for DecoratorChain<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoratorChain")
            .field("len", &self.decorators.len())
            .finish()
    }
}

/// Stamps [`keys::TIME_OF_RECORDING`] (RFC 3339) when absent.
#[derive(Clone, Copy, Debug)]
pub struct RecordingTime<C = SystemClock> {
    clock: C,
}

impl RecordingTime<SystemClock> {
    #[must_use]
    pub fn system() -> Self {
        Self { clock: SystemClock }
    }
}

impl<C: Clock> RecordingTime<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<E, C: Clock> MessageDecorator<E> for RecordingTime<C> {
    fn decorate(&self, message: Message<E>) -> Message<E> {
        message.set_header_if_absent(keys::TIME_OF_RECORDING, self.clock.now().to_rfc3339())
    }
}

/// Stamps a fresh UUID under [`keys::EVENT_ID`] when absent.
#[derive(Clone, Copy, Debug, Default)]
pub struct EventIdentifier;

impl<E> MessageDecorator<E> for EventIdentifier {
    fn decorate(&self, message: Message<E>) -> Message<E> {
        message.set_header_if_absent(keys::EVENT_ID, uuid::Uuid::new_v4().to_string())
    }
}

/// Causation and correlation identifiers for one logical operation.
///
/// Built by the caller at the edge (an HTTP handler, a consumer reacting to
/// an upstream message) and threaded through explicitly; there is no
/// ambient, process-wide context to consult.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageContext {
    causation_id: Option<String>,
    correlation_id: Option<String>,
}

impl MessageContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn caused_by(mut self, id: impl Into<String>) -> Self {
        self.causation_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn correlated_by(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn causation_id(&self) -> Option<&str> {
        self.causation_id.as_deref()
    }

    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }
}

/// Propagates [`keys::CAUSATION_ID`] / [`keys::CORRELATION_ID`] from a
/// [`MessageContext`], for whichever of the two is present.
#[derive(Clone, Debug, Default)]
pub struct ContextPropagation {
    context: MessageContext,
}

impl ContextPropagation {
    #[must_use]
    pub fn new(context: MessageContext) -> Self {
        Self { context }
    }
}

impl<E> MessageDecorator<E> for ContextPropagation {
    fn decorate(&self, message: Message<E>) -> Message<E> {
        let mut message = message;
        if let Some(causation) = self.context.causation_id() {
            message = message.set_header_if_absent(keys::CAUSATION_ID, causation);
        }
        if let Some(correlation) = self.context.correlation_id() {
            message = message.set_header_if_absent(keys::CORRELATION_ID, correlation);
        }
        message
    }
}
