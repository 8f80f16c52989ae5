//! Per-connection dispatcher of the push transport.
//!
//! A [`Connection`] turns inbound frames into handler calls and writes
//! responses and stream events to an outbound queue. The socket itself is
//! driven elsewhere; this type never blocks on I/O.

use crate::subscription::ActiveSubscription;
use crate::{Output, Router, SessionHandle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tether_core::{
    Message, Reactive, Request, RequestId, Response, StreamEvent, StreamHandle, SubscriptionId,
    Value, ValueEnvelope, decode,
};
use tokio::sync::mpsc;

#[derive(Default)]
struct State {
    subscriptions: HashMap<SubscriptionId, ActiveSubscription>,
    next_subscription: SubscriptionId,
    closed: bool,
}

/// Server side of one push connection. Clones share the same state.
#[derive(Clone)]
pub struct Connection {
    router: Arc<Router>,
    session: SessionHandle,
    outbound: mpsc::UnboundedSender<Message>,
    state: Arc<Mutex<State>>,
}

impl Connection {
    pub fn new(
        router: Arc<Router>,
        session: SessionHandle,
        outbound: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            router,
            session,
            outbound,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    fn send(&self, message: impl Into<Message>) {
        if self.outbound.send(message.into()).is_err() {
            tracing::debug!("Outbound queue closed, dropping message");
        }
    }

    /// Handle one text frame. Requests run on their own task, so a slow
    /// handler never holds up the frames behind it.
    pub fn handle_frame(&self, text: &str) {
        match decode(text) {
            Ok(Message::Request(request)) => {
                let conn = self.clone();
                tokio::spawn(async move { conn.dispatch(request).await });
            }
            Ok(Message::Close(close)) => self.release(close.subscription),
            Ok(other) => {
                tracing::warn!(?other, "Ignoring server-bound message of the wrong kind");
            }
            Err(e) => match e.request_id() {
                Some(id) => {
                    tracing::warn!(request_id = id, "Rejecting malformed request: {}", e);
                    self.send(Response::failure(id, e.to_string()));
                }
                None => tracing::warn!("Dropping malformed frame: {}", e),
            },
        }
    }

    /// Run one request to completion and answer it.
    pub async fn dispatch(&self, request: Request) {
        let Request { id, method, args } = request;
        tracing::debug!(request_id = id, %method, "Dispatching");
        match self.router.invoke(&method, args, self.session.clone()).await {
            Ok(Output::Plain(value)) => self.send(Response::success(id, ValueEnvelope::Plain(value))),
            Ok(Output::Stream(value)) => self.register(id, value, false),
            Ok(Output::Owned(value)) => self.register(id, value, true),
            Err(e) => self.send(Response::failure(id, e.to_wire())),
        }
    }

    /// Subscribe the connection to `value` and answer `request_id` with a
    /// Stream envelope. The answer is sent from the first listener call, so
    /// it always precedes the first event for the new id.
    fn register(&self, request_id: RequestId, value: Reactive<Value>, owned: bool) {
        let mut state = self.state.lock();
        if state.closed {
            tracing::debug!(request_id, "Connection gone before the stream was registered");
            if owned {
                value.close();
            }
            return;
        }

        let id = state.next_subscription;
        let outbound = self.outbound.clone();
        let announced = AtomicBool::new(false);
        let attached = ActiveSubscription::attach(value.clone(), owned, move |current| {
            let message: Message = if announced.swap(true, Ordering::AcqRel) {
                StreamEvent {
                    subscription: id,
                    value: current.clone(),
                }
                .into()
            } else {
                Response::success(
                    request_id,
                    ValueEnvelope::Stream(StreamHandle {
                        id,
                        initial: current.clone(),
                        poll_hint: None,
                    }),
                )
                .into()
            };
            let _ = outbound.send(message);
        });

        match attached {
            Ok(subscription) => {
                state.next_subscription += 1;
                state.subscriptions.insert(id, subscription);
                tracing::debug!(request_id, subscription = id, "Stream registered");
            }
            Err(_) => {
                drop(state);
                // Nothing will ever change; answer with the final value.
                self.send(Response::success(request_id, ValueEnvelope::Plain(value.get())));
            }
        }
    }

    /// Stop delivering events for `id`. Unknown ids are ignored.
    pub fn release(&self, id: SubscriptionId) {
        let removed = self.state.lock().subscriptions.remove(&id);
        match removed {
            Some(subscription) => {
                subscription.release();
                tracing::debug!(subscription = id, "Stream released");
            }
            None => tracing::debug!(subscription = id, "Release of unknown stream"),
        }
    }

    /// Release every subscription. Later registrations are released
    /// immediately.
    pub fn teardown(&self) {
        let subscriptions = {
            let mut state = self.state.lock();
            state.closed = true;
            std::mem::take(&mut state.subscriptions)
        };
        let count = subscriptions.len();
        for (_, subscription) in subscriptions {
            subscription.release();
        }
        tracing::debug!(released = count, "Connection torn down");
    }
}
