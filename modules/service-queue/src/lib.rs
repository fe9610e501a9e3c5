//! Request/reply RPC over a message broker, addressed to named service
//! operations.
//!
//! A caller encodes `(path, method)` into a single `eventType` header
//! (`path::method`) and waits on the broker's reply. On the consuming side a
//! dispatcher decodes the header and runs the application handler. Success
//! acknowledges the message with the handler's reply; failures are retried
//! until the budget is spent and then dead-lettered.
//!
//! The broker itself is a collaborator behind the [`Broker`] trait;
//! [`MemoryBroker`] implements it in-process.

pub mod address;
pub mod broker;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod memory;
pub mod request;
pub mod runtime;
pub mod sink;
pub mod supervisor;
pub mod timer;

pub use address::{EventAddress, EVENT_DELIMITER};
pub use broker::{AckHandle, Broker, ConnectionEvent, Delivery, EventContext, Settlement};
pub use client::QueueClient;
pub use config::QueueSettings;
pub use dispatcher::{DispatchState, QueueDispatcher, RetryPolicy};
pub use error::{
    AddressError, BrokerError, ConfigError, DecodeError, DispatchFailure, QueueError, RpcError,
    ValidationError,
};
pub use handler::{CallContext, DispatchRequest, ServiceHandler, PROVIDER};
pub use memory::{DeadLettered, MemoryBroker};
pub use request::{attach, require_attribute, MessageOptions, Query, RequestBuilder, SendOptions};
pub use runtime::{ServiceQueue, ServiceQueueDeps};
pub use sink::{DeadLetter, FailureSink, LogFailureSink, MemoryFailureSink};
pub use supervisor::ConnectionSupervisor;
pub use timer::{Timer, TokioTimer};
