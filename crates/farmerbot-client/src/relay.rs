//! The relay-mediated request bus.

use async_trait::async_trait;
use farmerbot_proto::{Envelope, Reply};
use serde_json::Value;

use crate::error::Result;

/// Outbound side of the relay: request/response calls addressed by twin id.
#[async_trait]
pub trait RelayBus: Send + Sync {
    /// Sends `cmd` with a JSON payload to the given twin and awaits the
    /// response payload. Deadlines are the caller's responsibility.
    async fn call(&self, twin: u32, cmd: &str, payload: Value) -> Result<Value>;
}

/// Inbound side of the relay: requests addressed to our session.
#[async_trait]
pub trait RelayListener: Send {
    /// Next inbound request, or `None` once the connection is gone.
    async fn next(&mut self) -> Option<Envelope>;
}

/// Sends replies for envelopes received through a [`RelayListener`].
#[async_trait]
pub trait RelayReplier: Send + Sync {
    async fn reply(&self, reply: Reply) -> Result<()>;
}
