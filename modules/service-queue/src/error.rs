use thiserror::Error;

/// A required attribute was missing or carried a forbidden value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Attribute '{name}' is required, current value is '{value}'")]
pub struct ValidationError {
    pub name: String,
    /// Display form of the rejected value, `<unset>` when absent.
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("Event address {part} '{value}' does not encode unambiguously with delimiter '{delimiter}'")]
    Ambiguous {
        part: &'static str,
        value: String,
        delimiter: &'static str,
    },
}

/// The event address on an inbound message could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Message has no eventType header")]
    MissingEventType,

    #[error("Event type '{event_type}' has no method")]
    MissingMethod { event_type: String },

    #[error("Event type '{event_type}' has an empty path")]
    EmptyPath { event_type: String },
}

/// Outcome of a single failed dispatch attempt.
#[derive(Debug, Error)]
pub enum DispatchFailure {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Application error: {0}")]
    Application(anyhow::Error),
}

/// Connection or transport failure reported by the broker collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("Broker disconnected")]
    Disconnected,

    #[error("Queue '{queue}' already has a consumer")]
    AlreadySubscribed { queue: String },

    #[error("Delivery channel closed before settlement")]
    ChannelClosed,

    #[error("Message dead-lettered: {reason}")]
    DeadLettered { reason: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Error returned to the caller of an outbound RPC.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key} is required")]
    Missing { key: &'static str },

    #[error("{key}='{value}' is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Failure to bring a service queue up.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

pub type Result<T, E = RpcError> = std::result::Result<T, E>;
