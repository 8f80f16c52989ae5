//! The handler table shared by both transports.

use crate::{DispatchError, HandlerError, SessionHandle};
use futures_util::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use tether_core::{Identity, Reactive, Value};

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Output, HandlerError>> + Send>>;
type Handler = Arc<dyn Fn(CallContext, Args) -> HandlerFuture + Send + Sync>;

/// What a handler returns.
#[derive(Debug, Clone)]
pub enum Output {
    /// A one-shot value.
    Plain(Value),
    /// A live value shared with other callers. Ending the subscription only
    /// detaches this caller's listener.
    Stream(Reactive<Value>),
    /// A live value made for this call alone. Ending the subscription closes it.
    Owned(Reactive<Value>),
}

impl Output {
    pub fn plain<T: Serialize>(value: &T) -> Result<Self, HandlerError> {
        Ok(Self::Plain(serde_json::to_value(value)?))
    }

    pub fn null() -> Self {
        Self::Plain(Value::Null)
    }
}

/// Positional arguments of a call.
#[derive(Debug, Clone, Default)]
pub struct Args(Vec<Value>);

impl Args {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<Value> {
        self.0
    }

    /// Decode the arguments as a tuple, e.g. `args.decode::<(String, String)>()`.
    /// A single struct argument is decoded with `args.decode::<(MyStruct,)>()`.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T, HandlerError> {
        serde_json::from_value(Value::Array(self.0))
            .map_err(|e| HandlerError::domain(format!("Invalid arguments: {e}")))
    }
}

/// Everything a handler knows about its caller.
#[derive(Clone)]
pub struct CallContext {
    method: Arc<str>,
    session: SessionHandle,
}

impl CallContext {
    pub fn new(method: &str, session: SessionHandle) -> Self {
        Self {
            method: Arc::from(method),
            session,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Identity of the caller at this moment.
    pub async fn identity(&self) -> Option<Identity> {
        self.session.read().await.identity().cloned()
    }
}

/// Fixed table of named handlers.
#[derive(Clone, Default)]
pub struct Router {
    handlers: HashMap<String, Handler>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous one.
    pub fn method<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(CallContext, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Output, HandlerError>> + Send + 'static,
    {
        let handler: Handler =
            Arc::new(move |ctx: CallContext, args: Args| -> HandlerFuture {
                Box::pin(handler(ctx, args))
            });
        self.handlers.insert(name.to_string(), handler);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Run the handler for `method`. Panics inside the handler become
    /// internal errors.
    pub async fn invoke(
        &self,
        method: &str,
        args: Vec<Value>,
        session: SessionHandle,
    ) -> Result<Output, DispatchError> {
        let Some(handler) = self.handlers.get(method) else {
            tracing::debug!(method, "Unknown method");
            return Err(DispatchError::MethodNotFound(method.to_string()));
        };
        let ctx = CallContext::new(method, session);
        let result = match AssertUnwindSafe(handler(ctx, Args(args))).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(HandlerError::Internal(anyhow::anyhow!(
                    "handler panicked: {reason}"
                )))
            }
        };
        result.map_err(|e| {
            if let HandlerError::Internal(cause) = &e {
                tracing::error!(method, "Handler failed: {:#}", cause);
            }
            DispatchError::Handler(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Session;
    use serde_json::json;

    fn router() -> Router {
        Router::new()
            .method("add", |_, args| async move {
                let (a, b) = args.decode::<(i64, i64)>()?;
                Output::plain(&(a + b))
            })
            .method("whoami", |ctx, _| async move {
                let who = ctx.identity().await.map(|i| i.to_string());
                Ok::<_, HandlerError>(Output::Plain(json!(who)))
            })
            .method("explode", |_, _| async move {
                if true {
                    panic!("kaboom");
                }
                Ok::<_, HandlerError>(Output::null())
            })
            .method("fail", |_, _| async move {
                Err::<Output, _>(HandlerError::Internal(anyhow::anyhow!("disk on fire")))
            })
    }

    fn anonymous() -> SessionHandle {
        Session::anonymous().into_handle()
    }

    #[tokio::test]
    async fn decodes_positional_arguments() {
        let out = router()
            .invoke("add", vec![json!(2), json!(3)], anonymous())
            .await
            .unwrap();
        assert!(matches!(out, Output::Plain(v) if v == json!(5)));
    }

    #[tokio::test]
    async fn argument_mismatch_is_a_domain_failure() {
        let err = router()
            .invoke("add", vec![json!("two")], anonymous())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Handler(HandlerError::Domain(_))));
        assert!(err.to_wire().starts_with("Invalid arguments"));
    }

    #[tokio::test]
    async fn unknown_method_names_the_method() {
        let err = router()
            .invoke("nope", vec![], anonymous())
            .await
            .unwrap_err();
        assert_eq!(err.to_wire(), "Method 'nope' was not found.");
    }

    #[tokio::test]
    async fn handler_sees_the_session() {
        let session = Session::with_identity(Identity::account("7")).into_handle();
        let out = router().invoke("whoami", vec![], session).await.unwrap();
        assert!(matches!(out, Output::Plain(v) if v == json!("account:7")));
    }

    #[tokio::test]
    async fn panics_and_errors_become_internal() {
        let router = router();
        for method in ["explode", "fail"] {
            let err = router.invoke(method, vec![], anonymous()).await.unwrap_err();
            assert_eq!(err.to_wire(), tether_core::E_INTERNAL_SERVER_ERROR);
        }
    }
}
