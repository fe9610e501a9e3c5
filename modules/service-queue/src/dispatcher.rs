//! The inbound dispatch loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn, Instrument, Span};

use crate::address;
use crate::broker::{AckHandle, Broker, Delivery, EventContext, Settlement};
use crate::config::QueueSettings;
use crate::error::{BrokerError, DecodeError, DispatchFailure};
use crate::handler::{CallContext, DispatchRequest, ServiceHandler, PROVIDER};
use crate::request::MessageOptions;
use crate::sink::{DeadLetter, FailureSink, LogFailureSink};
use crate::timer::{Timer, TokioTimer};

/// Where a message is in its dispatch lifecycle.
///
/// `Received → Decoding → Dispatching → {AckSuccess | NackRetry | NackDeadLetter}`,
/// with `NackRetry` looping back to `Decoding` after the retry delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Received,
    Decoding,
    Dispatching,
    AckSuccess,
    NackRetry,
    NackDeadLetter,
}

/// How many times a failing message is re-attempted, and how far apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Re-attempts after the first failure. Total attempts is `retries + 1`.
    pub retries: u32,
    pub retry_delay: Duration,
}

impl RetryPolicy {
    /// Whether another attempt follows after `attempts` failed ones.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts <= self.retries
    }
}

/// Consumes a queue and turns each message into exactly one settlement.
pub struct QueueDispatcher {
    queue: String,
    broker: Arc<dyn Broker>,
    handler: Arc<dyn ServiceHandler>,
    sink: Arc<dyn FailureSink>,
    timer: Arc<dyn Timer>,
    policy: RetryPolicy,
    prefetch: usize,
    log_enabled: bool,
    span: Span,
}

impl QueueDispatcher {
    pub fn new(
        settings: &QueueSettings,
        broker: Arc<dyn Broker>,
        handler: Arc<dyn ServiceHandler>,
    ) -> Self {
        let queue = settings.prefixed_queue_name();
        let span = tracing::info_span!("queue_dispatcher", queue = %queue);
        Self {
            sink: Arc::new(LogFailureSink::with_span(span.clone())),
            queue,
            broker,
            handler,
            timer: Arc::new(TokioTimer),
            policy: RetryPolicy {
                retries: settings.retries,
                retry_delay: settings.retry_delay,
            },
            prefetch: settings.prefetch.max(1),
            log_enabled: settings.log_enabled,
            span,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = timer;
        self
    }

    /// Log within `span` instead of the default `queue_dispatcher` span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn prefetch(&self) -> usize {
        self.prefetch
    }

    /// Subscribe to the queue and dispatch until the broker closes it.
    pub async fn subscribe_and_run(self: Arc<Self>) -> Result<(), BrokerError> {
        let deliveries = self.broker.subscribe(&self.queue, self.prefetch).await?;
        self.run(deliveries).await;
        Ok(())
    }

    /// Dispatch deliveries from an existing subscription.
    ///
    /// A permit is taken before each delivery is pulled, so at most
    /// `prefetch` messages are past `Received` at any time.
    pub async fn run(self: Arc<Self>, mut deliveries: mpsc::Receiver<Delivery>) {
        let permits = Arc::new(Semaphore::new(self.prefetch));
        info!(parent: &self.span, prefetch = self.prefetch, "Consuming queue");

        loop {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let Some(delivery) = deliveries.recv().await else {
                break;
            };

            let this = Arc::clone(&self);
            tokio::spawn(
                async move {
                    this.handle(delivery).await;
                    drop(permit);
                }
                .instrument(self.span.clone()),
            );
        }

        info!(parent: &self.span, "Queue subscription closed");
    }

    /// Run one delivery to its terminal state and settle it.
    pub async fn process(&self, delivery: Delivery) -> DispatchState {
        self.handle(delivery).instrument(self.span.clone()).await
    }

    async fn handle(&self, delivery: Delivery) -> DispatchState {
        let (body, options, context, ack) = delivery.into_parts();
        self.trace(&context, DispatchState::Received);

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.attempt(&body, &options, &context).await {
                Ok(result) => {
                    self.trace(&context, DispatchState::AckSuccess);
                    let reply = context.reply_expected.then_some(result);
                    self.settle(ack, &context, Settlement::Ack { reply });
                    return DispatchState::AckSuccess;
                }
                Err(failure) if self.policy.should_retry(attempts) => {
                    self.trace(&context, DispatchState::NackRetry);
                    if self.log_enabled {
                        warn!(
                            delivery_tag = context.delivery_tag,
                            attempt = attempts,
                            retries = self.policy.retries,
                            error = %failure,
                            "Dispatch failed, retrying"
                        );
                    }
                    self.timer.sleep(self.policy.retry_delay).await;
                }
                Err(failure) => {
                    self.trace(&context, DispatchState::NackDeadLetter);
                    let reason = failure.to_string();
                    self.settle(
                        ack,
                        &context,
                        Settlement::DeadLetter {
                            reason: reason.clone(),
                        },
                    );
                    let dead = DeadLetter {
                        body,
                        options,
                        attempts,
                        reason,
                        failed_at: Utc::now(),
                    };
                    self.sink.record(&dead, &context);
                    return DispatchState::NackDeadLetter;
                }
            }
        }
    }

    async fn attempt(
        &self,
        body: &Value,
        options: &MessageOptions,
        context: &EventContext,
    ) -> Result<Value, DispatchFailure> {
        self.trace(context, DispatchState::Decoding);
        let request = decode(body, options)?;

        self.trace(context, DispatchState::Dispatching);
        let call = CallContext {
            provider: PROVIDER,
            query: request.query.clone(),
        };
        self.handler
            .invoke(call, request)
            .await
            .map_err(DispatchFailure::Application)
    }

    fn settle(&self, ack: AckHandle, context: &EventContext, settlement: Settlement) {
        if !ack.settle(settlement) && self.log_enabled {
            warn!(
                delivery_tag = context.delivery_tag,
                "Broker stopped listening before settlement"
            );
        }
    }

    fn trace(&self, context: &EventContext, state: DispatchState) {
        if self.log_enabled {
            debug!(delivery_tag = context.delivery_tag, state = ?state, "Dispatch state");
        }
    }
}

/// Turn message metadata and body into a dispatch request.
pub fn decode(body: &Value, options: &MessageOptions) -> Result<DispatchRequest, DecodeError> {
    let event_type = options
        .event_type
        .as_deref()
        .ok_or(DecodeError::MissingEventType)?;
    let address = address::parse(event_type);

    let path = match address.path() {
        Some(path) if !path.is_empty() => path.to_string(),
        _ => {
            return Err(DecodeError::EmptyPath {
                event_type: event_type.to_string(),
            })
        }
    };
    let method = address
        .method()
        .ok_or_else(|| DecodeError::MissingMethod {
            event_type: event_type.to_string(),
        })?
        .to_string();

    Ok(DispatchRequest {
        path,
        method,
        query: options.query.clone(),
        body: body.clone(),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn options(event_type: Option<&str>) -> MessageOptions {
        MessageOptions {
            event_type: event_type.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn decode_extracts_path_method_query_and_body() {
        let mut query = serde_json::Map::new();
        query.insert("limit".into(), json!(5));
        let options = MessageOptions {
            event_type: Some("users::find".into()),
            query: Some(query.clone()),
            data: None,
        };

        let request = decode(&json!({"name": "ada"}), &options).unwrap();
        assert_eq!(request.path, "users");
        assert_eq!(request.method, "find");
        assert_eq!(request.query, Some(query));
        assert_eq!(request.body, json!({"name": "ada"}));
    }

    #[test]
    fn decode_without_event_type_fails() {
        let err = decode(&Value::Null, &options(None)).unwrap_err();
        assert_eq!(err, DecodeError::MissingEventType);
    }

    #[test]
    fn decode_without_method_fails() {
        let err = decode(&Value::Null, &options(Some("users"))).unwrap_err();
        assert!(matches!(err, DecodeError::MissingMethod { .. }));
    }

    #[test]
    fn decode_bare_delimiter_has_empty_path() {
        let err = decode(&Value::Null, &options(Some("::"))).unwrap_err();
        assert!(matches!(err, DecodeError::EmptyPath { .. }));
    }

    #[test]
    fn retry_policy_allows_retries_plus_one_attempts() {
        let policy = RetryPolicy {
            retries: 3,
            retry_delay: Duration::from_millis(10),
        };
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(3));
        assert!(!policy.should_retry(4));

        let no_retries = RetryPolicy {
            retries: 0,
            ..policy
        };
        assert!(!no_retries.should_retry(1));
    }
}
