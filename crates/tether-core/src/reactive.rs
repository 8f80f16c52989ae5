//! Observable single-slot values.
//!
//! A [`Reactive`] holds a current value and a list of listeners. Every `set`
//! replaces the value and calls each listener once, in registration order,
//! before returning. Subscribing replays the current value to the new
//! listener, so a late subscriber never waits for the next change.
//!
//! Mutations of one value are serialised: `set`, `update`, `subscribe` and
//! `close` each run as a critical section and never interleave with one
//! another. The lock is re-entrant, so a listener may call back into the value
//! it observes (for instance to close it) from the notifying thread.

use parking_lot::{Mutex, ReentrantMutex};
use std::fmt;
use std::sync::{Arc, Weak};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;
type CloseHook = Box<dyn FnOnce() + Send>;

/// Error returned when operating on a closed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReactiveError {
    #[error("reactive value is already closed")]
    AlreadyClosed,
}

struct State<T> {
    current: T,
    listeners: Vec<(u64, Listener<T>)>,
    next_listener: u64,
    closed: bool,
    on_close: Vec<CloseHook>,
}

struct Inner<T> {
    /// Held for the whole of a mutation, including listener calls.
    write: ReentrantMutex<()>,
    /// Held only while reading or swapping state, never across a listener.
    state: Mutex<State<T>>,
}

/// A shared, observable value. Clones share the same cell.
pub struct Reactive<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Reactive<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Reactive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Reactive")
            .field("current", &state.current)
            .field("listeners", &state.listeners.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl<T> Reactive<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                write: ReentrantMutex::new(()),
                state: Mutex::new(State {
                    current: initial,
                    listeners: Vec::new(),
                    next_listener: 0,
                    closed: false,
                    on_close: Vec::new(),
                }),
            }),
        }
    }

    /// The current value. Still defined after `close`.
    pub fn get(&self) -> T {
        self.inner.state.lock().current.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn listener_count(&self) -> usize {
        self.inner.state.lock().listeners.len()
    }

    /// Register a listener and immediately call it with the current value.
    pub fn subscribe<F>(&self, listener: F) -> Result<Subscription, ReactiveError>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let _write = self.inner.write.lock();
        let listener: Listener<T> = Arc::new(listener);
        let (id, current) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(ReactiveError::AlreadyClosed);
            }
            let id = state.next_listener;
            state.next_listener += 1;
            state.listeners.push((id, Arc::clone(&listener)));
            (id, state.current.clone())
        };
        listener(&current);

        let cell: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        Ok(Subscription {
            cell,
            listener: id,
        })
    }

    /// Replace the value and notify every listener.
    pub fn set(&self, value: T) -> Result<(), ReactiveError> {
        self.update(move |_| value).map(drop)
    }

    /// Compute the next value from the current one inside the critical
    /// section, so concurrent updates are never lost. Returns the new value.
    ///
    /// `f` runs while the state is locked and must not touch this value.
    pub fn update<F>(&self, f: F) -> Result<T, ReactiveError>
    where
        F: FnOnce(&T) -> T,
    {
        let _write = self.inner.write.lock();
        let (next, listeners) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(ReactiveError::AlreadyClosed);
            }
            let next = f(&state.current);
            state.current = next.clone();
            let listeners: Vec<(u64, Listener<T>)> = state
                .listeners
                .iter()
                .map(|(id, listener)| (*id, Arc::clone(listener)))
                .collect();
            (next, listeners)
        };
        for (id, listener) in &listeners {
            // An earlier listener may have closed the value or detached this one.
            if !self.inner.is_attached(*id) {
                continue;
            }
            listener(&next);
        }
        Ok(next)
    }

    /// Detach every listener and mark the value terminal. Runs the close hooks
    /// once; closing twice is a no-op.
    pub fn close(&self) {
        let _write = self.inner.write.lock();
        let hooks = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.listeners.clear();
            std::mem::take(&mut state.on_close)
        };
        for hook in hooks {
            hook();
        }
    }

    /// Run `hook` when the value is closed, or right away if it already is.
    pub fn on_close<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.closed {
            drop(state);
            hook();
        } else {
            state.on_close.push(Box::new(hook));
        }
    }

    /// A value that follows this one through `f`. Closing the derived value
    /// detaches it from this one; closing this one leaves the derived value
    /// frozen at its last state.
    pub fn map<U, F>(&self, f: F) -> Reactive<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let derived = Reactive::new(f(&self.get()));
        let target = derived.clone();
        match self.subscribe(move |value| {
            // A closed target is about to detach itself.
            let _ = target.set(f(value));
        }) {
            Ok(upstream) => derived.on_close(move || upstream.unsubscribe()),
            Err(ReactiveError::AlreadyClosed) => derived.close(),
        }
        derived
    }
}

/// Handle to one listener of a [`Reactive`].
///
/// Dropping the handle leaves the listener attached; call
/// [`unsubscribe`](Subscription::unsubscribe) to detach it.
pub struct Subscription {
    cell: Weak<dyn Detach>,
    listener: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(cell) = self.cell.upgrade() {
            cell.detach(self.listener);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("listener", &self.listener)
            .field("live", &(self.cell.strong_count() > 0))
            .finish()
    }
}

trait Detach: Send + Sync {
    fn detach(&self, listener: u64);
}

impl<T> Inner<T> {
    fn is_attached(&self, listener: u64) -> bool {
        let state = self.state.lock();
        !state.closed && state.listeners.iter().any(|(id, _)| *id == listener)
    }
}

impl<T: Send + Sync> Detach for Inner<T> {
    fn detach(&self, listener: u64) {
        self.state.lock().listeners.retain(|(id, _)| *id != listener);
    }
}
