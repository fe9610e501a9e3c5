//! In-process broker.
//!
//! Queues are bounded `mpsc` channels and replies travel back on each
//! delivery's settlement channel. Connection loss can be simulated with
//! [`MemoryBroker::disconnect`], which also fails every request still
//! waiting on a reply. No external service required.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::debug;
use uuid::Uuid;

use crate::broker::{Broker, ConnectionEvent, Delivery, EventContext, Settlement};
use crate::error::BrokerError;
use crate::request::MessageOptions;

const QUEUE_CAPACITY: usize = 1024;
const EVENT_CAPACITY: usize = 16;

struct QueueSlot {
    tx: mpsc::Sender<Delivery>,
    /// Taken by the first subscriber.
    rx: Option<mpsc::Receiver<Delivery>>,
}

/// A message the broker moved to its dead-letter store.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLettered {
    pub queue: String,
    pub options: MessageOptions,
    pub reason: String,
}

pub struct MemoryBroker {
    queues: Mutex<HashMap<String, QueueSlot>>,
    dead_letters: Mutex<Vec<DeadLettered>>,
    events: broadcast::Sender<ConnectionEvent>,
    connected: watch::Sender<bool>,
    next_tag: AtomicU64,
    requests: AtomicUsize,
    reconnects: AtomicUsize,
    failing_reconnects: AtomicUsize,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (connected, _) = watch::channel(true);
        Self {
            queues: Mutex::new(HashMap::new()),
            dead_letters: Mutex::new(Vec::new()),
            events,
            connected,
            next_tag: AtomicU64::new(1),
            requests: AtomicUsize::new(0),
            reconnects: AtomicUsize::new(0),
            failing_reconnects: AtomicUsize::new(0),
        }
    }

    /// Publish without waiting for a reply. The returned receiver yields the
    /// consumer's settlement.
    pub async fn publish(
        &self,
        queue: &str,
        body: Value,
        options: MessageOptions,
    ) -> Result<oneshot::Receiver<Settlement>, BrokerError> {
        self.ensure_connected()?;
        let (delivery, settled) = Delivery::new(body, options, self.context(queue, false));
        self.sender(queue)
            .send(delivery)
            .await
            .map_err(|_| BrokerError::ChannelClosed)?;
        Ok(settled)
    }

    /// Drop the connection and notify listeners. Pending requests fail with
    /// [`BrokerError::Disconnected`].
    pub fn disconnect(&self, cause: Option<BrokerError>) {
        self.connected.send_replace(false);
        let _ = self.events.send(ConnectionEvent::Disconnected(cause));
    }

    /// Make the next `count` calls to `reconnect` fail.
    pub fn fail_next_reconnects(&self, count: usize) {
        self.failing_reconnects.store(count, Ordering::SeqCst);
    }

    /// Number of `request_reply` calls that reached the broker.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn reconnect_count(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    pub fn dead_letters(&self) -> Vec<DeadLettered> {
        lock(&self.dead_letters).clone()
    }

    fn ensure_connected(&self) -> Result<(), BrokerError> {
        if *self.connected.borrow() {
            Ok(())
        } else {
            Err(BrokerError::Disconnected)
        }
    }

    fn context(&self, queue: &str, reply_expected: bool) -> EventContext {
        EventContext {
            queue: queue.to_string(),
            delivery_tag: self.next_tag.fetch_add(1, Ordering::SeqCst),
            correlation_id: reply_expected.then(|| Uuid::new_v4().to_string()),
            reply_expected,
            redelivered: false,
        }
    }

    fn sender(&self, queue: &str) -> mpsc::Sender<Delivery> {
        let mut queues = lock(&self.queues);
        queues
            .entry(queue.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
                QueueSlot { tx, rx: Some(rx) }
            })
            .tx
            .clone()
    }

    fn record_dead_letter(&self, queue: &str, options: MessageOptions, reason: &str) {
        lock(&self.dead_letters).push(DeadLettered {
            queue: queue.to_string(),
            options,
            reason: reason.to_string(),
        });
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn request_reply(
        &self,
        queue: &str,
        body: Value,
        options: MessageOptions,
    ) -> Result<Value, BrokerError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let mut connection = self.connected.subscribe();
        if !*connection.borrow_and_update() {
            return Err(BrokerError::Disconnected);
        }

        let context = self.context(queue, true);
        debug!(queue, correlation_id = ?context.correlation_id, "Publishing request");
        let (delivery, settled) = Delivery::new(body, options.clone(), context);
        self.sender(queue)
            .send(delivery)
            .await
            .map_err(|_| BrokerError::ChannelClosed)?;

        let settlement = tokio::select! {
            settlement = settled => settlement,
            () = connection_lost(&mut connection) => {
                debug!(queue, "Connection lost while awaiting reply");
                return Err(BrokerError::Disconnected);
            }
        };
        match settlement {
            Ok(Settlement::Ack { reply }) => Ok(reply.unwrap_or(Value::Null)),
            Ok(Settlement::DeadLetter { reason }) => {
                self.record_dead_letter(queue, options, &reason);
                Err(BrokerError::DeadLettered { reason })
            }
            Err(_) => Err(BrokerError::ChannelClosed),
        }
    }

    async fn subscribe(
        &self,
        queue: &str,
        _prefetch: usize,
    ) -> Result<mpsc::Receiver<Delivery>, BrokerError> {
        self.ensure_connected()?;
        // Ensure the slot exists, then take its receiver.
        drop(self.sender(queue));
        let mut queues = lock(&self.queues);
        queues
            .get_mut(queue)
            .and_then(|slot| slot.rx.take())
            .ok_or_else(|| BrokerError::AlreadySubscribed {
                queue: queue.to_string(),
            })
    }

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    async fn reconnect(&self) -> Result<(), BrokerError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .failing_reconnects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(BrokerError::Transport("connection refused".into()));
        }
        self.connected.send_replace(true);
        let _ = self.events.send(ConnectionEvent::Connected);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }
}

async fn connection_lost(connection: &mut watch::Receiver<bool>) {
    let _ = connection.wait_for(|connected| !*connected).await;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn second_subscriber_is_rejected() {
        let broker = MemoryBroker::new();
        let _rx = broker.subscribe("jobs", 1).await.unwrap();
        let err = broker.subscribe("jobs", 1).await.unwrap_err();
        assert_eq!(
            err,
            BrokerError::AlreadySubscribed {
                queue: "jobs".into()
            }
        );
    }

    #[tokio::test]
    async fn published_message_waits_for_subscriber() {
        let broker = MemoryBroker::new();
        let settled = broker
            .publish("jobs", json!(1), MessageOptions::default())
            .await
            .unwrap();

        let mut rx = broker.subscribe("jobs", 1).await.unwrap();
        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.body, json!(1));
        assert!(!delivery.context.reply_expected);
        assert!(delivery.context.correlation_id.is_none());

        assert!(delivery.settle(Settlement::Ack { reply: None }));
        assert_eq!(settled.await.unwrap(), Settlement::Ack { reply: None });
    }

    #[tokio::test]
    async fn request_reply_returns_acked_reply() {
        let broker = std::sync::Arc::new(MemoryBroker::new());
        let mut rx = broker.subscribe("jobs", 1).await.unwrap();

        let consumer = tokio::spawn(async move {
            let delivery = rx.recv().await.unwrap();
            assert!(delivery.context.reply_expected);
            assert!(delivery.context.correlation_id.is_some());
            let reply = json!({"echo": delivery.body.clone()});
            delivery.settle(Settlement::Ack { reply: Some(reply) });
        });

        let reply = broker
            .request_reply("jobs", json!("hi"), MessageOptions::default())
            .await
            .unwrap();
        consumer.await.unwrap();
        assert_eq!(reply, json!({"echo": "hi"}));
    }

    #[tokio::test]
    async fn disconnected_broker_rejects_requests_until_reconnected() {
        let broker = MemoryBroker::new();
        broker.disconnect(None);
        let err = broker
            .request_reply("jobs", Value::Null, MessageOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, BrokerError::Disconnected);

        broker.fail_next_reconnects(1);
        assert!(broker.reconnect().await.is_err());
        assert!(!broker.is_connected());
        broker.reconnect().await.unwrap();
        assert!(broker.is_connected());
        assert_eq!(broker.reconnect_count(), 2);
    }

    #[tokio::test]
    async fn disconnect_fails_requests_awaiting_a_reply() {
        let broker = std::sync::Arc::new(MemoryBroker::new());
        let mut rx = broker.subscribe("jobs", 1).await.unwrap();

        let pending = tokio::spawn({
            let broker = broker.clone();
            async move {
                broker
                    .request_reply("jobs", json!("hi"), MessageOptions::default())
                    .await
            }
        });
        let delivery = rx.recv().await.unwrap();

        broker.disconnect(None);
        let result = pending.await.unwrap();
        assert_eq!(result, Err(BrokerError::Disconnected));

        // The late reply has nowhere to go.
        assert!(!delivery.settle(Settlement::Ack {
            reply: Some(json!("late"))
        }));
        assert!(!broker.is_connected());
    }
}
