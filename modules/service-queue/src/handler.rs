//! The application dispatch seam.

use async_trait::async_trait;
use serde_json::Value;

use crate::request::Query;

/// Provider tag attached to every call made from the queue.
pub const PROVIDER: &str = "rabbot";

/// Call context handed to the application alongside the arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct CallContext {
    pub provider: &'static str,
    pub query: Option<Query>,
}

/// A decoded request for one service operation.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    pub path: String,
    pub method: String,
    pub query: Option<Query>,
    pub body: Value,
}

/// Runs the service operation a message is addressed to.
///
/// The returned future is the single completion signal: it resolves once,
/// with the reply value or the failure that feeds the retry policy.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    async fn invoke(
        &self,
        context: CallContext,
        request: DispatchRequest,
    ) -> anyhow::Result<Value>;
}

#[async_trait]
impl<H: ServiceHandler + ?Sized> ServiceHandler for std::sync::Arc<H> {
    async fn invoke(
        &self,
        context: CallContext,
        request: DispatchRequest,
    ) -> anyhow::Result<Value> {
        (**self).invoke(context, request).await
    }
}
