//! HTTP fallback transport.
//!
//! Each call is a single `POST {base}/call`. When the reply is a stream, a
//! poll task fetches `POST {base}/poll` every `max(min_poll, hint)` and feeds
//! the local value. A round trip always completes before the next wait
//! starts, so polls never overlap. Failed polls are reported and retried on
//! the next tick; only closing or releasing the value stops the task. The one
//! exception is a server that no longer knows the subscription (its lease ran
//! out, or it restarted): that is reported once and the value is closed.
//!
//! Closing a materialized value, by any route, sends `POST {base}/close`.

use crate::{ClientError, Transport, TransportKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tether_core::{
    CallBody, E_STREAM_NOT_FOUND, FallbackReply, Reactive, Request, StreamHandle, StreamRef,
    SubscriptionId, Value, ValueEnvelope,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// The period between two polls of one subscription.
pub fn poll_period(min_poll: Duration, hint: Option<Duration>) -> Duration {
    hint.map_or(min_poll, |hint| hint.max(min_poll))
}

#[derive(Clone)]
struct Endpoint {
    http: reqwest::Client,
    base_url: String,
}

impl Endpoint {
    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<FallbackReply, ClientError> {
        let response = self
            .http
            .post(format!("{}/{path}", self.base_url))
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(ClientError::Status(status.as_u16()));
        }
        response
            .json::<FallbackReply>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn poll(&self, id: SubscriptionId) -> Result<Value, ClientError> {
        match self.post("poll", &StreamRef { id }).await? {
            FallbackReply::Success { value } => Ok(value),
            FallbackReply::Error { message } => Err(ClientError::Remote(message)),
        }
    }

    async fn close(&self, id: SubscriptionId) -> Result<(), ClientError> {
        if let FallbackReply::Error { message } = self.post("close", &StreamRef { id }).await? {
            tracing::debug!(subscription = id, "Server did not know the stream: {}", message);
        }
        Ok(())
    }
}

struct Poller {
    value: Reactive<Value>,
    task: JoinHandle<()>,
}

type Pollers = Mutex<HashMap<SubscriptionId, Poller>>;

/// Transport over plain HTTP requests.
pub struct FallbackTransport {
    endpoint: Endpoint,
    min_poll: Duration,
    pollers: Arc<Pollers>,
    errors: broadcast::Sender<ClientError>,
}

impl FallbackTransport {
    /// `base_url` is the prefix of the endpoints, e.g. `http://host:3000/fallback`.
    pub fn new(base_url: &str, min_poll: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, min_poll)
    }

    pub fn with_client(http: reqwest::Client, base_url: &str, min_poll: Duration) -> Self {
        let (errors, _) = broadcast::channel(64);
        Self {
            endpoint: Endpoint {
                http,
                base_url: base_url.trim_end_matches('/').to_string(),
            },
            min_poll,
            pollers: Arc::default(),
            errors,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.endpoint.base_url
    }

    /// Failures of background polls. Polling continues after each one.
    pub fn poll_errors(&self) -> broadcast::Receiver<ClientError> {
        self.errors.subscribe()
    }

    /// Subscriptions with a running poll task.
    pub fn active_polls(&self) -> usize {
        self.pollers.lock().len()
    }
}

async fn poll_loop(
    endpoint: Endpoint,
    id: SubscriptionId,
    period: Duration,
    value: Reactive<Value>,
    pollers: Weak<Pollers>,
    errors: broadcast::Sender<ClientError>,
) {
    loop {
        tokio::time::sleep(period).await;
        if value.is_closed() {
            break;
        }
        match endpoint.poll(id).await {
            Ok(latest) => {
                if value.set(latest).is_err() {
                    break;
                }
            }
            Err(ClientError::Remote(message)) if message == E_STREAM_NOT_FOUND => {
                tracing::warn!(subscription = id, "Server dropped the subscription; closing it");
                // Out of the table first, so closing does not ask the server again.
                if let Some(pollers) = pollers.upgrade() {
                    pollers.lock().remove(&id);
                }
                let _ = errors.send(ClientError::Remote(message));
                value.close();
                break;
            }
            Err(e) => {
                tracing::error!(subscription = id, "Poll failed: {}", e);
                let _ = errors.send(e);
            }
        }
    }
    tracing::debug!(subscription = id, "Poll loop stopped");
}

impl Drop for FallbackTransport {
    fn drop(&mut self) {
        for (_, poller) in self.pollers.lock().drain() {
            poller.task.abort();
        }
    }
}

#[async_trait]
impl Transport for FallbackTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Fallback
    }

    async fn call(&self, request: Request) -> Result<ValueEnvelope, ClientError> {
        let body = CallBody {
            method_name: request.method,
            args: request.args,
        };
        match self.endpoint.post("call", &body).await? {
            FallbackReply::Success { value } => Ok(ValueEnvelope::from_json(&value)?),
            FallbackReply::Error { message } => Err(ClientError::Remote(message)),
        }
    }

    fn materialize(&self, stream: &StreamHandle) -> Reactive<Value> {
        let mut pollers = self.pollers.lock();
        if let Some(poller) = pollers.get(&stream.id) {
            return poller.value.clone();
        }

        let value = Reactive::new(stream.initial.clone());
        let period = poll_period(self.min_poll, stream.poll_hint);
        tracing::debug!(subscription = stream.id, ?period, "Starting poll loop");
        let task = tokio::spawn(poll_loop(
            self.endpoint.clone(),
            stream.id,
            period,
            value.clone(),
            Arc::downgrade(&self.pollers),
            self.errors.clone(),
        ));
        let abort = task.abort_handle();
        let table = Arc::downgrade(&self.pollers);
        let endpoint = self.endpoint.clone();
        let runtime = tokio::runtime::Handle::current();
        let id = stream.id;
        value.on_close(move || {
            abort.abort();
            let Some(table) = table.upgrade() else {
                return;
            };
            // Entries already gone were released through `release`.
            if table.lock().remove(&id).is_none() {
                return;
            }
            runtime.spawn(async move {
                if let Err(e) = endpoint.close(id).await {
                    tracing::debug!(subscription = id, "Close request failed: {}", e);
                }
            });
        });
        pollers.insert(
            stream.id,
            Poller {
                value: value.clone(),
                task,
            },
        );
        value
    }

    async fn release(&self, subscription: SubscriptionId) -> Result<(), ClientError> {
        let Some(poller) = self.pollers.lock().remove(&subscription) else {
            return Ok(());
        };
        poller.task.abort();
        poller.value.close();
        self.endpoint.close(subscription).await
    }
}
