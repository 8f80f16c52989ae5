//! Client dispatcher: ids, envelopes, and live values.

use crate::{ClientConfig, ClientError, FallbackTransport, PushTransport, Transport, TransportKind, TransportMode};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tether_core::{
    Reactive, ReactiveError, Request, RequestId, Subscription, SubscriptionId, Value,
    ValueEnvelope,
};

/// Issues calls over a [`Transport`].
pub struct Client {
    transport: Arc<dyn Transport>,
    next_id: AtomicU64,
}

/// Result of a call.
#[derive(Debug)]
pub enum Reply {
    Plain(Value),
    Stream(RemoteValue),
}

impl Client {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(0),
        }
    }

    /// Connect according to `config.mode`. In `auto` mode a push connection is
    /// tried first and the HTTP transport is used if it cannot be opened.
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let fallback = || -> Arc<dyn Transport> {
            Arc::new(FallbackTransport::new(&config.fallback_url, config.min_poll()))
        };
        let transport: Arc<dyn Transport> = match config.mode {
            TransportMode::Fallback => fallback(),
            TransportMode::Push => {
                Arc::new(PushTransport::connect(&config.url, config.connect_timeout()).await?)
            }
            TransportMode::Auto => {
                match PushTransport::connect(&config.url, config.connect_timeout()).await {
                    Ok(push) => Arc::new(push),
                    Err(e) => {
                        tracing::warn!("Falling back to HTTP transport: {}", e);
                        fallback()
                    }
                }
            }
        };
        Ok(Self::new(transport))
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    fn next_request_id(&self) -> RequestId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Call `method` and wait for its result. Failures are returned as-is;
    /// nothing is retried.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Reply, ClientError> {
        let id = self.next_request_id();
        tracing::debug!(request_id = id, method, "Issuing call");
        let request = Request {
            id,
            method: method.to_string(),
            args,
        };
        match self.transport.call(request).await {
            Ok(ValueEnvelope::Plain(value)) => Ok(Reply::Plain(value)),
            Ok(ValueEnvelope::Stream(stream)) => {
                let value = self.transport.materialize(&stream);
                Ok(Reply::Stream(RemoteValue {
                    id: stream.id,
                    value,
                    transport: Arc::clone(&self.transport),
                }))
            }
            Err(e) => {
                tracing::debug!(request_id = id, method, "Call failed: {}", e);
                Err(e)
            }
        }
    }

    /// Call a method that returns a one-shot value and decode it.
    pub async fn call_plain<T: DeserializeOwned>(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> Result<T, ClientError> {
        match self.call(method, args).await? {
            Reply::Plain(value) => Ok(serde_json::from_value(value)?),
            Reply::Stream(remote) => {
                remote.close().await?;
                Err(ClientError::UnexpectedReply { expected: "plain" })
            }
        }
    }

    /// Call a method that returns a live value.
    pub async fn watch(&self, method: &str, args: Vec<Value>) -> Result<RemoteValue, ClientError> {
        match self.call(method, args).await? {
            Reply::Stream(remote) => Ok(remote),
            Reply::Plain(_) => Err(ClientError::UnexpectedReply { expected: "stream" }),
        }
    }
}

/// A live result held by the server and mirrored locally.
#[derive(Clone)]
pub struct RemoteValue {
    id: SubscriptionId,
    value: Reactive<Value>,
    transport: Arc<dyn Transport>,
}

impl RemoteValue {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn get(&self) -> Value {
        self.value.get()
    }

    pub fn get_as<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        Ok(serde_json::from_value(self.value.get())?)
    }

    /// Observe changes. The listener is called with the current value first.
    pub fn subscribe<F>(&self, listener: F) -> Result<Subscription, ReactiveError>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.value.subscribe(listener)
    }

    pub fn is_closed(&self) -> bool {
        self.value.is_closed()
    }

    /// The local value. Closing it releases the server subscription too,
    /// without waiting for the server to acknowledge.
    pub fn reactive(&self) -> &Reactive<Value> {
        &self.value
    }

    /// Stop following the value and wait until the server has been told.
    pub async fn close(&self) -> Result<(), ClientError> {
        let released = self.transport.release(self.id).await;
        self.value.close();
        released
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("transport", &self.transport.kind())
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl fmt::Debug for RemoteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteValue")
            .field("id", &self.id)
            .field("transport", &self.transport.kind())
            .field("value", &self.value)
            .finish()
    }
}
