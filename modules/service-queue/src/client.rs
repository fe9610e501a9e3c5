//! Outbound request/reply calls.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::address::EventAddress;
use crate::broker::Broker;
use crate::config::QueueSettings;
use crate::error::Result;
use crate::request::{require_attribute, RequestBuilder, SendOptions};

/// Sends requests to named queues and waits for the reply.
///
/// Holds no per-call state: correlation is the broker's job, and calls may
/// run concurrently through a shared reference.
#[derive(Clone)]
pub struct QueueClient {
    broker: Arc<dyn Broker>,
    default_queue: Option<String>,
    prefix: String,
}

impl QueueClient {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            default_queue: None,
            prefix: String::new(),
        }
    }

    /// Client targeting the settings' queue, with the same name prefix.
    pub fn from_settings(broker: Arc<dyn Broker>, settings: &QueueSettings) -> Self {
        Self::new(broker)
            .with_default_queue(settings.queue_name.clone())
            .with_prefix(settings.prefix.clone())
    }

    pub fn with_default_queue(mut self, queue: impl Into<String>) -> Self {
        self.default_queue = Some(queue.into());
        self
    }

    /// Prepended to every queue name before publishing.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn default_queue(&self) -> Option<&str> {
        self.default_queue.as_deref()
    }

    /// Publish a request for `address` on `queue_name` and wait for the reply.
    ///
    /// A missing or empty queue name fails before the broker is touched.
    /// Broker errors come back unchanged and are never retried here.
    pub async fn send(
        &self,
        queue_name: Option<&str>,
        address: &EventAddress,
        body: Value,
        options: SendOptions,
    ) -> Result<Value> {
        require_attribute("queueName", queue_name, &[""])?;
        let queue = format!("{}{}", self.prefix, queue_name.unwrap_or_default());
        let options = RequestBuilder::new(address.clone()).options(options).build();

        debug!(queue = %queue, event_type = ?options.event_type, "Sending request");
        let reply = self.broker.request_reply(&queue, body, options).await?;
        Ok(reply)
    }

    /// Call `path::method` on the default queue. A `null` body is sent as `{}`.
    pub async fn create_message(&self, path: &str, method: &str, body: Value) -> Result<Value> {
        let address = EventAddress::new(path, method)?;
        let body = match body {
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other,
        };
        self.send(
            self.default_queue.as_deref(),
            &address,
            body,
            SendOptions::default(),
        )
        .await
    }
}
