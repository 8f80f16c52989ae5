//! The seam between the dispatcher and the network.

use crate::ClientError;
use async_trait::async_trait;
use std::fmt;
use tether_core::{Reactive, Request, StreamHandle, SubscriptionId, Value, ValueEnvelope};

/// Which implementation carries the calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Persistent WebSocket; the server pushes changes.
    Push,
    /// One-shot HTTP calls; the client polls for changes.
    Fallback,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push => f.write_str("push"),
            Self::Fallback => f.write_str("fallback"),
        }
    }
}

/// Carries calls to a server and keeps live results in sync.
///
/// Both implementations honour the same contract: `call` resolves exactly
/// once, and a value returned by `materialize` is updated until it is closed,
/// released, or the transport goes away.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Send a request and wait for its envelope.
    async fn call(&self, request: Request) -> Result<ValueEnvelope, ClientError>;

    /// The local value for a subscription, created from `stream` on first use
    /// and reused afterwards.
    fn materialize(&self, stream: &StreamHandle) -> Reactive<Value>;

    /// Stop tracking a subscription and tell the server to drop it. Releasing
    /// an unknown subscription does nothing.
    async fn release(&self, subscription: SubscriptionId) -> Result<(), ClientError>;
}
