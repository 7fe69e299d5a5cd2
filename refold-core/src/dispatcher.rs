//! Message dispatch after successful persistence.
//!
//! Once a batch is durably appended, the repository hands the saved messages
//! to a [`MessageDispatcher`]. Delivery is decoupled from the append outcome:
//! a dispatch failure is reported to the caller's logs but the stream is the
//! source of truth, so nothing is rolled back or re-appended. Two
//! configurations of the same contract ship here: [`ConsumerDispatcher`]
//! delivers in-line (strongest ordering, consumer latency on the write path)
//! and [`ChannelDispatcher`] hands batches to a queue the caller drains.

use std::future::Future;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::message::SavedMessage;

/// Error delivering persisted messages to consumers.
///
/// Never converted into a rollback: by the time dispatch runs, the append has
/// already succeeded durably.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A consumer rejected or failed to process a message.
    #[error("consumer `{consumer}` failed at stream version {version}: {source}")]
    Consumer {
        consumer: String,
        version: u64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// The receiving side of a channel dispatcher has been dropped.
    #[error("dispatch channel closed")]
    ChannelClosed,
}

/// Receives newly persisted messages, in persisted order.
pub trait MessageConsumer<E>: Send + Sync {
    /// Consumer name used in error reports and logs.
    fn name(&self) -> &str {
        "consumer"
    }

    /// Process one persisted message.
    ///
    /// # Errors
    ///
    /// Returns an error to report delivery failure; the message stays
    /// durably persisted either way.
    fn consume(
        &self,
        message: &SavedMessage<E>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

impl<E, T> MessageConsumer<E> for std::sync::Arc<T>
where
    T: MessageConsumer<E> + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    fn consume(
        &self,
        message: &SavedMessage<E>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).consume(message)
    }
}

/// Delivers a persisted batch to zero or more consumers.
pub trait MessageDispatcher<E>: Send + Sync {
    fn dispatch(
        &self,
        messages: &[SavedMessage<E>],
    ) -> impl Future<Output = Result<(), DispatchError>> + Send;
}

/// Default dispatcher: nobody is listening.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoDispatch;

impl<E> MessageDispatcher<E> for NoDispatch
where
    E: Sync,
{
    async fn dispatch(&self, _messages: &[SavedMessage<E>]) -> Result<(), DispatchError> {
        Ok(())
    }
}

/// Synchronous in-line dispatcher.
///
/// Every message is handed to every registered consumer, in persisted order,
/// before `dispatch` returns. The first consumer failure stops delivery and
/// is reported; earlier deliveries are not undone.
pub struct ConsumerDispatcher<E> {
    consumers: Vec<Box<dyn MessageConsumer<E>>>,
}

impl<E> ConsumerDispatcher<E> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            consumers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, consumer: impl MessageConsumer<E> + 'static) -> Self {
        self.consumers.push(Box::new(consumer));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }
}

impl<E> Default for ConsumerDispatcher<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for ConsumerDispatcher<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerDispatcher")
            .field("consumers", &self.consumers.len())
            .finish()
    }
}

impl<E> MessageDispatcher<E> for ConsumerDispatcher<E>
where
    E: Send + Sync,
{
    async fn dispatch(&self, messages: &[SavedMessage<E>]) -> Result<(), DispatchError> {
        for message in messages {
            for consumer in &self.consumers {
                consumer
                    .consume(message)
                    .map_err(|source| DispatchError::Consumer {
                        consumer: consumer.name().to_string(),
                        version: message.version,
                        source,
                    })?;
            }
        }
        tracing::trace!(message_count = messages.len(), "batch dispatched in-line");
        Ok(())
    }
}

/// Asynchronous dispatcher backed by an unbounded channel.
///
/// `dispatch` only enqueues; the caller owns the receiving half and drains it
/// at its own pace, isolating consumer latency and failures from the write
/// path. Ordering within the channel matches persisted order.
#[derive(Clone, Debug)]
pub struct ChannelDispatcher<E> {
    sender: mpsc::UnboundedSender<SavedMessage<E>>,
}

impl<E> ChannelDispatcher<E> {
    /// Create the dispatcher and the receiver to drain.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SavedMessage<E>>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl<E> MessageDispatcher<E> for ChannelDispatcher<E>
where
    E: Clone + Send + Sync,
{
    async fn dispatch(&self, messages: &[SavedMessage<E>]) -> Result<(), DispatchError> {
        for message in messages {
            self.sender
                .send(message.clone())
                .map_err(|_| DispatchError::ChannelClosed)?;
        }
        tracing::trace!(message_count = messages.len(), "batch enqueued for dispatch");
        Ok(())
    }
}
