//! Wires client, dispatcher and reconnect supervisor onto one broker.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info};
use typed_builder::TypedBuilder;

use crate::broker::Broker;
use crate::client::QueueClient;
use crate::config::QueueSettings;
use crate::dispatcher::QueueDispatcher;
use crate::error::QueueError;
use crate::handler::ServiceHandler;
use crate::sink::{FailureSink, LogFailureSink};
use crate::supervisor::ConnectionSupervisor;
use crate::timer::{Timer, TokioTimer};

/// Long-lived collaborators shared by everything a [`ServiceQueue`] runs.
#[derive(Clone, TypedBuilder)]
pub struct ServiceQueueDeps {
    pub broker: Arc<dyn Broker>,
    pub handler: Arc<dyn ServiceHandler>,
    #[builder(default = Arc::new(LogFailureSink::new()) as Arc<dyn FailureSink>)]
    pub sink: Arc<dyn FailureSink>,
    #[builder(default = Arc::new(TokioTimer) as Arc<dyn Timer>)]
    pub timer: Arc<dyn Timer>,
}

/// A running queue: inbound dispatch, reconnect supervision, and a client
/// for outbound calls over the same broker.
pub struct ServiceQueue {
    settings: QueueSettings,
    client: QueueClient,
    dispatcher: JoinHandle<()>,
    supervisor: JoinHandle<()>,
}

impl ServiceQueue {
    /// Validate settings, subscribe to the queue and start the background
    /// tasks. Subscription failures are returned here rather than logged.
    pub async fn start(
        settings: QueueSettings,
        deps: ServiceQueueDeps,
    ) -> Result<Self, QueueError> {
        settings.validate()?;
        if settings.log_enabled {
            settings.log_redacted();
        }

        let dispatcher = Arc::new(
            QueueDispatcher::new(&settings, Arc::clone(&deps.broker), deps.handler)
                .with_sink(deps.sink)
                .with_timer(Arc::clone(&deps.timer)),
        );
        let deliveries = deps
            .broker
            .subscribe(dispatcher.queue(), dispatcher.prefetch())
            .await?;

        let supervisor =
            ConnectionSupervisor::new(Arc::clone(&deps.broker), settings.reconnect_delay)
                .with_timer(deps.timer)
                .spawn();
        let dispatcher = tokio::spawn(dispatcher.run(deliveries));

        info!(queue = %settings.prefixed_queue_name(), "Service queue started");
        Ok(Self {
            client: QueueClient::from_settings(deps.broker, &settings),
            settings,
            dispatcher,
            supervisor,
        })
    }

    pub fn client(&self) -> &QueueClient {
        &self.client
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Stop consuming and stop reconnecting. In-flight dispatches already
    /// spawned run to completion.
    pub async fn shutdown(self) {
        self.supervisor.abort();
        self.dispatcher.abort();
        for (name, task) in [("supervisor", self.supervisor), ("dispatcher", self.dispatcher)] {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    error!(task = name, error = %err, "Background task failed");
                }
            }
        }
        info!(queue = %self.settings.prefixed_queue_name(), "Service queue stopped");
    }
}
