//! Server side of the fallback transport.
//!
//! Calls arrive one HTTP request at a time, each with a fresh anonymous
//! session. A live result is registered here under a server-wide id and its
//! latest value is kept for the poll endpoint. A subscription that is neither
//! polled nor closed for a whole lease is reaped by [`FallbackRegistry::sweep`].

use crate::subscription::ActiveSubscription;
use crate::{Output, Router, Session};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{
    CallBody, FallbackReply, Reactive, StreamHandle, SubscriptionId, Value, ValueEnvelope,
};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub use tether_core::E_STREAM_NOT_FOUND;

struct Leased {
    subscription: ActiveSubscription,
    latest: Arc<Mutex<Value>>,
    last_seen: Instant,
}

#[derive(Default)]
struct Table {
    entries: HashMap<SubscriptionId, Leased>,
    next_id: SubscriptionId,
}

pub struct FallbackRegistry {
    router: Arc<Router>,
    poll_hint: Duration,
    lease: Duration,
    table: Mutex<Table>,
}

impl FallbackRegistry {
    pub fn new(router: Arc<Router>, poll_hint: Duration, lease: Duration) -> Self {
        Self {
            router,
            poll_hint,
            lease,
            table: Mutex::new(Table::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Answer one `call` request.
    pub async fn call(&self, body: CallBody) -> FallbackReply {
        let CallBody { method_name, args } = body;
        tracing::debug!(method = %method_name, "Fallback call");
        let session = Session::anonymous().into_handle();
        let envelope = match self.router.invoke(&method_name, args, session).await {
            Ok(Output::Plain(value)) => ValueEnvelope::Plain(value),
            Ok(Output::Stream(value)) => self.register(value, false),
            Ok(Output::Owned(value)) => self.register(value, true),
            Err(e) => return FallbackReply::error(e.to_wire()),
        };
        FallbackReply::success(envelope.to_json())
    }

    fn register(&self, value: Reactive<Value>, owned: bool) -> ValueEnvelope {
        let latest = Arc::new(Mutex::new(Value::Null));
        let sink = Arc::clone(&latest);
        let subscription = match ActiveSubscription::attach(value.clone(), owned, move |current| {
            *sink.lock() = current.clone();
        }) {
            Ok(subscription) => subscription,
            Err(_) => return ValueEnvelope::Plain(value.get()),
        };
        let initial = latest.lock().clone();

        let mut table = self.table.lock();
        let id = table.next_id;
        table.next_id += 1;
        table.entries.insert(
            id,
            Leased {
                subscription,
                latest,
                last_seen: Instant::now(),
            },
        );
        tracing::debug!(subscription = id, "Fallback stream registered");
        ValueEnvelope::Stream(StreamHandle {
            id,
            initial,
            poll_hint: Some(self.poll_hint),
        })
    }

    /// Latest value of `id`. Renews the lease.
    pub fn poll(&self, id: SubscriptionId) -> FallbackReply {
        let mut table = self.table.lock();
        match table.entries.get_mut(&id) {
            Some(entry) => {
                entry.last_seen = Instant::now();
                FallbackReply::success(entry.latest.lock().clone())
            }
            None => FallbackReply::error(E_STREAM_NOT_FOUND),
        }
    }

    /// Release `id`.
    pub fn close(&self, id: SubscriptionId) -> FallbackReply {
        let removed = self.table.lock().entries.remove(&id);
        match removed {
            Some(entry) => {
                entry.subscription.release();
                tracing::debug!(subscription = id, "Fallback stream closed");
                FallbackReply::success(Value::Null)
            }
            None => FallbackReply::error(E_STREAM_NOT_FOUND),
        }
    }

    /// Release every subscription whose lease ran out before `now`. Returns
    /// how many were reaped.
    pub fn sweep(&self, now: Instant) -> usize {
        let expired: Vec<Leased> = {
            let mut table = self.table.lock();
            let ids: Vec<SubscriptionId> = table
                .entries
                .iter()
                .filter(|(_, entry)| now.saturating_duration_since(entry.last_seen) > self.lease)
                .map(|(id, _)| *id)
                .collect();
            ids.iter()
                .filter_map(|id| table.entries.remove(id))
                .collect()
        };
        let count = expired.len();
        for entry in expired {
            entry.subscription.release();
        }
        if count > 0 {
            tracing::info!(reaped = count, "Reaped idle fallback streams");
        }
        count
    }

    /// Run [`sweep`](Self::sweep) every `interval` until the task is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                registry.sweep(Instant::now());
            }
        })
    }
}
