//! The broker collaborator seam.
//!
//! Transport, reply correlation and connection management belong to the
//! broker. This module only fixes the shape of what the rest of the crate
//! needs from it.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::error::BrokerError;
use crate::request::MessageOptions;

/// Broker-side facts about one delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct EventContext {
    pub queue: String,
    pub delivery_tag: u64,
    pub correlation_id: Option<String>,
    /// The publisher is waiting on a reply for this message.
    pub reply_expected: bool,
    pub redelivered: bool,
}

/// Final disposition of a delivery, reported back to the broker once.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    /// Remove from the queue; `reply` is sent back for request/reply exchanges.
    Ack { reply: Option<Value> },
    /// Retry budget exhausted.
    DeadLetter { reason: String },
}

/// An inbound message plus its acknowledgment handle.
#[derive(Debug)]
pub struct Delivery {
    pub body: Value,
    pub options: MessageOptions,
    pub context: EventContext,
    ack: oneshot::Sender<Settlement>,
}

impl Delivery {
    /// Create a delivery and the receiver on which its settlement arrives.
    pub fn new(
        body: Value,
        options: MessageOptions,
        context: EventContext,
    ) -> (Self, oneshot::Receiver<Settlement>) {
        let (ack, settled) = oneshot::channel();
        (
            Self {
                body,
                options,
                context,
                ack,
            },
            settled,
        )
    }

    /// Settle the delivery. Consumes it, so a message settles at most once.
    /// Returns `false` if the broker side stopped listening.
    pub fn settle(self, settlement: Settlement) -> bool {
        self.ack.send(settlement).is_ok()
    }

    /// Split off the ack handle so the message parts can be moved
    /// independently while dispatch runs.
    pub fn into_parts(self) -> (Value, MessageOptions, EventContext, AckHandle) {
        (self.body, self.options, self.context, AckHandle(self.ack))
    }
}

/// Settlement half of a [`Delivery`] after [`Delivery::into_parts`].
#[derive(Debug)]
pub struct AckHandle(oneshot::Sender<Settlement>);

impl AckHandle {
    pub fn settle(self, settlement: Settlement) -> bool {
        self.0.send(settlement).is_ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected(Option<BrokerError>),
}

/// What the crate needs from a message broker client.
///
/// Implemented by [`crate::MemoryBroker`] for tests and in-process use. Also
/// implemented for `Arc<B>` so one broker can be shared.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish `body` on `queue` and wait for the correlated reply.
    async fn request_reply(
        &self,
        queue: &str,
        body: Value,
        options: MessageOptions,
    ) -> Result<Value, BrokerError>;

    /// Start consuming `queue`. The broker should hold at most `prefetch`
    /// unsettled deliveries for this consumer.
    async fn subscribe(
        &self,
        queue: &str,
        prefetch: usize,
    ) -> Result<mpsc::Receiver<Delivery>, BrokerError>;

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent>;

    async fn reconnect(&self) -> Result<(), BrokerError>;

    /// Current connection state, as last reported by the transport.
    fn is_connected(&self) -> bool;
}

#[async_trait]
impl<B: Broker + ?Sized> Broker for Arc<B> {
    async fn request_reply(
        &self,
        queue: &str,
        body: Value,
        options: MessageOptions,
    ) -> Result<Value, BrokerError> {
        (**self).request_reply(queue, body, options).await
    }

    async fn subscribe(
        &self,
        queue: &str,
        prefetch: usize,
    ) -> Result<mpsc::Receiver<Delivery>, BrokerError> {
        (**self).subscribe(queue, prefetch).await
    }

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        (**self).connection_events()
    }

    async fn reconnect(&self) -> Result<(), BrokerError> {
        (**self).reconnect().await
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
}
