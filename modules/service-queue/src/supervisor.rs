//! Reconnects the broker after connection loss.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::broker::{Broker, ConnectionEvent};
use crate::timer::{Timer, TokioTimer};

/// Watches connection events. On `Disconnected` it waits `reconnect_delay`
/// and calls `reconnect()`, repeating at the same delay until it succeeds.
/// Disconnects queued while a reconnect was in progress are skipped once the
/// broker reports itself connected again.
pub struct ConnectionSupervisor {
    broker: Arc<dyn Broker>,
    timer: Arc<dyn Timer>,
    reconnect_delay: Duration,
    span: Span,
}

impl ConnectionSupervisor {
    pub fn new(broker: Arc<dyn Broker>, reconnect_delay: Duration) -> Self {
        Self {
            broker,
            timer: Arc::new(TokioTimer),
            reconnect_delay,
            span: tracing::info_span!("connection_supervisor"),
        }
    }

    pub fn with_timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = timer;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Start watching. Subscribes to connection events before spawning, so
    /// nothing emitted after this call returns is missed.
    pub fn spawn(self) -> JoinHandle<()> {
        let events = self.broker.connection_events();
        let span = self.span.clone();
        tokio::spawn(self.run(events).instrument(span))
    }

    async fn run(self, mut events: broadcast::Receiver<ConnectionEvent>) {
        loop {
            match events.recv().await {
                Ok(ConnectionEvent::Connected) => info!("Connected to broker"),
                Ok(ConnectionEvent::Disconnected(_)) if self.broker.is_connected() => {
                    debug!("Stale disconnect, broker already reconnected");
                }
                Ok(ConnectionEvent::Disconnected(cause)) => {
                    match cause {
                        Some(err) => error!(error = %err, "Disconnected from broker"),
                        None => error!("Disconnected from broker"),
                    }
                    self.reconnect().await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Connection events lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    async fn reconnect(&self) {
        let mut attempt: u32 = 0;
        loop {
            self.timer.sleep(self.reconnect_delay).await;
            attempt += 1;
            match self.broker.reconnect().await {
                Ok(()) => return,
                Err(err) => {
                    error!(attempt, error = %err, "Reconnect failed");
                }
            }
        }
    }
}
