//! Failure sinks: where dead-lettered messages become visible.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::error;

use crate::broker::EventContext;
use crate::request::MessageOptions;

/// A message that exhausted its retry budget.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub body: Value,
    pub options: MessageOptions,
    /// Handler invocations made before giving up.
    pub attempts: u32,
    /// Display form of the last failure.
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// Called exactly once per dead-lettered message.
///
/// Implementations must not fail, retry or re-publish.
pub trait FailureSink: Send + Sync {
    fn record(&self, message: &DeadLetter, context: &EventContext);
}

/// Default sink: one error-level log line per dead letter.
#[derive(Debug, Clone, Default)]
pub struct LogFailureSink {
    span: Option<tracing::Span>,
}

impl LogFailureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit records inside `span` instead of the caller's current span.
    pub fn with_span(span: tracing::Span) -> Self {
        Self { span: Some(span) }
    }
}

impl FailureSink for LogFailureSink {
    fn record(&self, message: &DeadLetter, context: &EventContext) {
        let _entered = self.span.as_ref().map(|span| span.enter());
        error!(
            queue = %context.queue,
            delivery_tag = context.delivery_tag,
            event_type = message.options.event_type.as_deref().unwrap_or("<none>"),
            attempts = message.attempts,
            reason = %message.reason,
            body = %message.body,
            "DLQ: message dead-lettered"
        );
    }
}

/// In-memory sink for tests and in-process inspection.
#[derive(Debug, Default)]
pub struct MemoryFailureSink {
    records: Mutex<Vec<(DeadLetter, EventContext)>>,
}

impl MemoryFailureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(DeadLetter, EventContext)> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl FailureSink for MemoryFailureSink {
    fn record(&self, message: &DeadLetter, context: &EventContext) {
        let mut records = match self.records.lock() {
            Ok(records) => records,
            Err(poisoned) => poisoned.into_inner(),
        };
        records.push((message.clone(), context.clone()));
    }
}

impl<S: FailureSink + ?Sized> FailureSink for Arc<S> {
    fn record(&self, message: &DeadLetter, context: &EventContext) {
        (**self).record(message, context)
    }
}
