use tether_core::{Reactive, ReactiveError, Subscription, Value};

/// A live value one caller follows.
pub(crate) struct ActiveSubscription {
    value: Reactive<Value>,
    listener: Subscription,
    /// The value was made for this caller and dies with the subscription.
    owned: bool,
}

impl ActiveSubscription {
    /// Subscribe `listener`, which first receives the current value.
    pub(crate) fn attach<F>(
        value: Reactive<Value>,
        owned: bool,
        listener: F,
    ) -> Result<Self, ReactiveError>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let listener = value.subscribe(listener)?;
        Ok(Self {
            value,
            listener,
            owned,
        })
    }

    pub(crate) fn release(self) {
        self.listener.unsubscribe();
        if self.owned {
            self.value.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_values_survive_release() {
        let value = Reactive::new(Value::from(1));
        let sub = ActiveSubscription::attach(value.clone(), false, |_| {}).unwrap();
        assert_eq!(value.listener_count(), 1);
        sub.release();
        assert_eq!(value.listener_count(), 0);
        assert!(!value.is_closed());
    }

    #[test]
    fn owned_values_close_on_release() {
        let value = Reactive::new(Value::from(1));
        let sub = ActiveSubscription::attach(value.clone(), true, |_| {}).unwrap();
        sub.release();
        assert!(value.is_closed());
    }
}
