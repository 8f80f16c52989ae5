//! WebSocket transport.
//!
//! One socket per transport. A writer task drains an outbound queue into the
//! socket and a reader task routes every inbound frame: responses go to the
//! pending call with the same id, notifications to the materialized value
//! with the same subscription id. Anything without a match is dropped, since
//! a late reply or a notification racing an unsubscribe is expected.
//!
//! Closing a materialized value, by any route, tells the server to release the
//! subscription.

use crate::{ClientError, Transport, TransportKind};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tether_core::{
    Message, Outcome, Reactive, Request, RequestId, Response, StreamEvent, StreamHandle,
    SubscriptionId, Unsubscribe, Value, ValueEnvelope, encode,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

type Reply = Result<ValueEnvelope, ClientError>;

struct Shared {
    outbound: mpsc::UnboundedSender<Message>,
    pending: Mutex<HashMap<RequestId, oneshot::Sender<Reply>>>,
    streams: Mutex<HashMap<SubscriptionId, Reactive<Value>>>,
    closed: AtomicBool,
}

/// Transport over a persistent WebSocket connection.
pub struct PushTransport {
    url: String,
    shared: Arc<Shared>,
    tasks: [AbortHandle; 2],
}

impl PushTransport {
    /// Open a connection, failing with [`ClientError::ConnectTimeout`] if the
    /// handshake does not complete within `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let (socket, _) = match tokio::time::timeout(timeout, connect_async(url)).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                return Err(ClientError::Connect {
                    url: url.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(ClientError::ConnectTimeout {
                    url: url.to_string(),
                    timeout,
                });
            }
        };
        tracing::info!("Established WebSocket connection to {}", url);

        let (mut sink, mut stream) = socket.split();
        let (outbound, mut queue) = mpsc::unbounded_channel::<Message>();
        let shared = Arc::new(Shared {
            outbound,
            pending: Mutex::default(),
            streams: Mutex::default(),
            closed: AtomicBool::new(false),
        });

        let writer = tokio::spawn(async move {
            while let Some(message) = queue.recv().await {
                let frame = WsMessage::Text(encode(&message).into());
                if let Err(e) = sink.send(frame).await {
                    tracing::debug!("WebSocket write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = Arc::clone(&shared);
        let peer = url.to_string();
        let reader_task = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => reader.route(text.as_str()),
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("WebSocket error from {}: {}", peer, e);
                        break;
                    }
                }
            }
            tracing::info!("WebSocket connection to {} closed", peer);
            reader.shutdown();
        });

        Ok(Self {
            url: url.to_string(),
            shared,
            tasks: [writer.abort_handle(), reader_task.abort_handle()],
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Ids of calls still waiting for their response.
    pub fn pending_ids(&self) -> Vec<RequestId> {
        let mut ids: Vec<_> = self.shared.pending.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Drop for PushTransport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Shared {
    fn register(&self, id: RequestId) -> Result<oneshot::Receiver<Reply>, ClientError> {
        let mut pending = self.pending.lock();
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::TransportClosed);
        }
        if pending.contains_key(&id) {
            return Err(ClientError::DuplicateRequest(id));
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(id, tx);
        Ok(rx)
    }

    fn materialize(self: &Arc<Self>, stream: &StreamHandle) -> Reactive<Value> {
        let value = {
            let mut streams = self.streams.lock();
            if let Some(existing) = streams.get(&stream.id) {
                return existing.clone();
            }
            let value = Reactive::new(stream.initial.clone());
            streams.insert(stream.id, value.clone());
            value
        };
        let shared: Weak<Shared> = Arc::downgrade(self);
        let id = stream.id;
        value.on_close(move || {
            if let Some(shared) = shared.upgrade() {
                shared.forget(id);
            }
        });
        // Lost the race with shutdown: nothing will ever update it.
        if self.closed.load(Ordering::SeqCst) {
            self.streams.lock().remove(&stream.id);
            value.close();
        }
        value
    }

    /// Drop a subscription closed locally and tell the server. Entries already
    /// taken out of the table were released some other way.
    fn forget(&self, subscription: SubscriptionId) {
        if self.streams.lock().remove(&subscription).is_none() {
            return;
        }
        if !self.closed.load(Ordering::SeqCst) {
            self.unsubscribe(subscription);
        }
    }

    fn unsubscribe(&self, subscription: SubscriptionId) {
        if self.outbound.send(Unsubscribe { subscription }.into()).is_err() {
            tracing::debug!(subscription, "Writer gone; not sending unsubscribe");
        }
    }

    fn route(self: &Arc<Self>, text: &str) {
        let message = match tether_core::decode(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Dropping frame: {}", e);
                return;
            }
        };

        match message {
            Message::Response(Response { id, outcome }) => {
                let waiter = self.pending.lock().remove(&id);
                let Some(waiter) = waiter else {
                    tracing::debug!(request_id = id, "No pending call for response");
                    if let Outcome::Success(ValueEnvelope::Stream(stream)) = outcome {
                        self.unsubscribe(stream.id);
                    }
                    return;
                };
                let reply = match outcome {
                    Outcome::Success(envelope) => {
                        // Register before resolving so a notification sent
                        // right after this response finds its value.
                        if let ValueEnvelope::Stream(stream) = &envelope {
                            self.materialize(stream);
                        }
                        Ok(envelope)
                    }
                    Outcome::Failure(message) => Err(ClientError::Remote(message)),
                };
                if let Err(Ok(ValueEnvelope::Stream(stream))) = waiter.send(reply) {
                    tracing::debug!(request_id = id, "Caller gave up; releasing subscription");
                    let abandoned = self.streams.lock().get(&stream.id).cloned();
                    match abandoned {
                        Some(value) => value.close(),
                        None => self.unsubscribe(stream.id),
                    }
                }
            }
            Message::Notify(StreamEvent { subscription, value }) => {
                let target = self.streams.lock().get(&subscription).cloned();
                match target {
                    Some(target) => {
                        if target.set(value).is_err() {
                            tracing::debug!(subscription, "Notification for a closed value");
                        }
                    }
                    None => tracing::debug!(subscription, "Notification for unknown subscription"),
                }
            }
            Message::Request(_) | Message::Close(_) => {
                tracing::warn!("Dropping client-bound frame of unexpected type");
            }
        }
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let pending = std::mem::take(&mut *self.pending.lock());
        for (_, waiter) in pending {
            let _ = waiter.send(Err(ClientError::TransportClosed));
        }
        let streams = std::mem::take(&mut *self.streams.lock());
        for (_, value) in streams {
            value.close();
        }
    }
}

#[async_trait]
impl Transport for PushTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Push
    }

    async fn call(&self, request: Request) -> Result<ValueEnvelope, ClientError> {
        let id = request.id;
        let reply = self.shared.register(id)?;
        if self.shared.outbound.send(request.into()).is_err() {
            self.shared.pending.lock().remove(&id);
            return Err(ClientError::TransportClosed);
        }
        reply.await.unwrap_or(Err(ClientError::TransportClosed))
    }

    fn materialize(&self, stream: &StreamHandle) -> Reactive<Value> {
        self.shared.materialize(stream)
    }

    async fn release(&self, subscription: SubscriptionId) -> Result<(), ClientError> {
        let Some(value) = self.shared.streams.lock().remove(&subscription) else {
            return Ok(());
        };
        value.close();
        if self.is_closed() {
            return Ok(());
        }
        self.shared
            .outbound
            .send(Unsubscribe { subscription }.into())
            .map_err(|_| ClientError::TransportClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    /// Accepts one WebSocket client and hands its frames to `script`.
    async fn serve_once<F, Fut>(script: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = accept_async(stream).await.unwrap();
            script(ws).await;
        });
        format!("ws://{addr}")
    }

    async fn next_request(
        ws: &mut tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    ) -> Option<Message> {
        while let Some(Ok(frame)) = ws.next().await {
            if let WsMessage::Text(text) = frame {
                return tether_core::decode(text.as_str()).ok();
            }
        }
        None
    }

    async fn send(
        ws: &mut tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
        message: Message,
    ) {
        ws.send(WsMessage::Text(encode(&message).into()))
            .await
            .unwrap();
    }

    fn request(id: RequestId, method: &str) -> Request {
        Request {
            id,
            method: method.into(),
            args: vec![],
        }
    }

    #[tokio::test]
    async fn replies_are_matched_by_id_not_order() {
        let url = serve_once(|mut ws| async move {
            let mut ids = Vec::new();
            for _ in 0..2 {
                if let Some(Message::Request(r)) = next_request(&mut ws).await {
                    ids.push(r.id);
                }
            }
            ids.reverse();
            // Noise first: an unknown id must be ignored.
            send(&mut ws, Response::success(999, ValueEnvelope::Plain(json!(0))).into()).await;
            for id in ids {
                send(&mut ws, Response::success(id, ValueEnvelope::Plain(json!(id))).into()).await;
            }
            let _ = next_request(&mut ws).await;
        })
        .await;

        let transport = PushTransport::connect(&url, Duration::from_secs(5)).await.unwrap();
        let (a, b) = tokio::join!(transport.call(request(0, "a")), transport.call(request(1, "b")));
        assert_eq!(a.unwrap(), ValueEnvelope::Plain(json!(0)));
        assert_eq!(b.unwrap(), ValueEnvelope::Plain(json!(1)));
        assert!(transport.pending_ids().is_empty());
    }

    #[tokio::test]
    async fn failure_carries_the_server_message() {
        let url = serve_once(|mut ws| async move {
            if let Some(Message::Request(r)) = next_request(&mut ws).await {
                send(&mut ws, Response::failure(r.id, "Method 'nope' was not found.").into()).await;
            }
            let _ = next_request(&mut ws).await;
        })
        .await;

        let transport = PushTransport::connect(&url, Duration::from_secs(5)).await.unwrap();
        let err = transport.call(request(0, "nope")).await.unwrap_err();
        assert!(matches!(err, ClientError::Remote(m) if m.contains("nope")));
    }

    #[tokio::test]
    async fn notification_right_after_response_is_not_lost() {
        let url = serve_once(|mut ws| async move {
            if let Some(Message::Request(r)) = next_request(&mut ws).await {
                let stream = StreamHandle {
                    id: 4,
                    initial: json!([]),
                    poll_hint: None,
                };
                send(&mut ws, Response::success(r.id, ValueEnvelope::Stream(stream)).into()).await;
                send(&mut ws, StreamEvent { subscription: 4, value: json!(["a"]) }.into()).await;
                send(&mut ws, StreamEvent { subscription: 77, value: json!("stray") }.into()).await;
            }
            let _ = next_request(&mut ws).await;
        })
        .await;

        let transport = PushTransport::connect(&url, Duration::from_secs(5)).await.unwrap();
        let envelope = transport.call(request(0, "listServers")).await.unwrap();
        let ValueEnvelope::Stream(stream) = envelope else {
            panic!("expected a stream envelope");
        };
        let value = transport.materialize(&stream);
        tokio::time::timeout(Duration::from_secs(2), async {
            while value.get() != json!(["a"]) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn release_sends_source_close() {
        let (seen_tx, seen_rx) = oneshot::channel();
        let url = serve_once(|mut ws| async move {
            if let Some(Message::Request(r)) = next_request(&mut ws).await {
                let stream = StreamHandle {
                    id: 0,
                    initial: json!(1),
                    poll_hint: None,
                };
                send(&mut ws, Response::success(r.id, ValueEnvelope::Stream(stream)).into()).await;
            }
            let close = next_request(&mut ws).await;
            let _ = seen_tx.send(close);
        })
        .await;

        let transport = PushTransport::connect(&url, Duration::from_secs(5)).await.unwrap();
        let ValueEnvelope::Stream(stream) = transport.call(request(0, "watch")).await.unwrap() else {
            panic!("expected a stream envelope");
        };
        let value = transport.materialize(&stream);
        transport.release(stream.id).await.unwrap();
        assert!(value.is_closed());
        assert_eq!(
            seen_rx.await.unwrap(),
            Some(Message::Close(Unsubscribe { subscription: 0 }))
        );
    }

    #[tokio::test]
    async fn closing_the_value_itself_sends_source_close() {
        let (seen_tx, seen_rx) = oneshot::channel();
        let url = serve_once(|mut ws| async move {
            if let Some(Message::Request(r)) = next_request(&mut ws).await {
                let stream = StreamHandle {
                    id: 5,
                    initial: json!(1),
                    poll_hint: None,
                };
                send(&mut ws, Response::success(r.id, ValueEnvelope::Stream(stream)).into()).await;
            }
            let close = next_request(&mut ws).await;
            let _ = seen_tx.send(close);
        })
        .await;

        let transport = PushTransport::connect(&url, Duration::from_secs(5)).await.unwrap();
        let ValueEnvelope::Stream(stream) = transport.call(request(0, "watch")).await.unwrap() else {
            panic!("expected a stream envelope");
        };
        let value = transport.materialize(&stream);
        value.close();
        assert_eq!(
            seen_rx.await.unwrap(),
            Some(Message::Close(Unsubscribe { subscription: 5 }))
        );
        // Already released; a second release sends nothing.
        transport.release(stream.id).await.unwrap();
        assert!(transport.shared.streams.lock().is_empty());
    }

    #[tokio::test]
    async fn garbage_frames_do_not_stop_the_reader() {
        let url = serve_once(|mut ws| async move {
            if let Some(Message::Request(r)) = next_request(&mut ws).await {
                for junk in ["[42]", "garbage", "{}", "[2]"] {
                    ws.send(WsMessage::Text(junk.into())).await.unwrap();
                }
                send(&mut ws, Response::success(r.id, ValueEnvelope::Plain(json!("ok"))).into()).await;
            }
            let _ = next_request(&mut ws).await;
        })
        .await;

        let transport = PushTransport::connect(&url, Duration::from_secs(5)).await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(2), transport.call(request(0, "ping")))
            .await
            .unwrap();
        assert_eq!(reply.unwrap(), ValueEnvelope::Plain(json!("ok")));
        assert!(!transport.is_closed());
    }

    #[tokio::test]
    async fn dropped_connection_fails_pending_calls_and_closes_values() {
        let url = serve_once(|mut ws| async move {
            if let Some(Message::Request(r)) = next_request(&mut ws).await {
                let stream = StreamHandle {
                    id: 0,
                    initial: json!(null),
                    poll_hint: None,
                };
                send(&mut ws, Response::success(r.id, ValueEnvelope::Stream(stream)).into()).await;
            }
            // Swallow the second request and hang up.
            let _ = next_request(&mut ws).await;
            drop(ws);
        })
        .await;

        let transport = PushTransport::connect(&url, Duration::from_secs(5)).await.unwrap();
        let ValueEnvelope::Stream(stream) = transport.call(request(0, "watch")).await.unwrap() else {
            panic!("expected a stream envelope");
        };
        let value = transport.materialize(&stream);

        let err = transport.call(request(1, "slow")).await.unwrap_err();
        assert!(matches!(err, ClientError::TransportClosed));
        assert!(value.is_closed());
        assert!(transport.is_closed());

        let err = transport.call(request(2, "late")).await.unwrap_err();
        assert!(matches!(err, ClientError::TransportClosed));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept the TCP connection but never answer the handshake.
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let err = PushTransport::connect(&format!("ws://{addr}"), Duration::from_millis(100))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::ConnectTimeout { .. }));
    }
}
