//! The methods the dashboard exposes.

use crate::protocol::{Diagnostic, Fallible, Server};
use crate::store::Store;
use std::sync::Arc;
use tether_core::Identity;
use tether_server::{Args, CallContext, HandlerError, Output, Router};
use uuid::Uuid;

pub const E_EMAIL_OR_PASSWORD_INCORRECT: &str =
    "The given email address or password is incorrect.";

/// Build the handler table over `store`.
pub fn router(store: Arc<Store>) -> Router {
    Router::new()
        .method("login", with_store(&store, login))
        .method("logout", |ctx, _| logout(ctx))
        .method("listServers", with_store(&store, list_servers))
        .method("addServer", with_store(&store, add_server))
}

fn with_store<F, Fut>(
    store: &Arc<Store>,
    handler: F,
) -> impl Fn(CallContext, Args) -> Fut + Send + Sync + 'static
where
    F: Fn(Arc<Store>, CallContext, Args) -> Fut + Send + Sync + 'static,
{
    let store = Arc::clone(store);
    move |ctx, args| handler(Arc::clone(&store), ctx, args)
}

/// The logged-in person, from the caller's session.
async fn viewer(ctx: &CallContext) -> Option<Uuid> {
    let identity = ctx.identity().await?;
    Uuid::parse_str(identity.account_id()).ok()
}

async fn login(store: Arc<Store>, ctx: CallContext, args: Args) -> Result<Output, HandlerError> {
    let (email, password) = args.decode::<(String, String)>()?;
    let Some(person) = store.authenticate(&email, &password).cloned() else {
        tracing::info!(%email, "Rejected login");
        return Output::plain(&Fallible::<()>::failure(E_EMAIL_OR_PASSWORD_INCORRECT));
    };
    ctx.session()
        .write()
        .await
        .authenticate(Identity::account(person.id.to_string()));
    tracing::info!(%email, "Logged in");
    Output::plain(&Fallible::Success(person))
}

async fn logout(ctx: CallContext) -> Result<Output, HandlerError> {
    ctx.session().write().await.clear();
    Ok(Output::null())
}

async fn list_servers(
    store: Arc<Store>,
    ctx: CallContext,
    _args: Args,
) -> Result<Output, HandlerError> {
    let viewer = viewer(&ctx).await;
    Ok(Output::Owned(store.visible_servers(viewer)))
}

async fn add_server(store: Arc<Store>, _ctx: CallContext, args: Args) -> Result<Output, HandlerError> {
    let (server,) = args.decode::<(Server,)>()?;
    if server.name.trim().is_empty() {
        return Output::plain(&Fallible::<Server>::Failure(vec![Diagnostic::at(
            "name",
            "A server needs a name.",
        )]));
    }
    let stored = store
        .add_server(server)
        .map_err(|e| HandlerError::Internal(e.into()))?;
    Output::plain(&Fallible::Success(stored))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_server::Session;

    fn session() -> tether_server::SessionHandle {
        Session::anonymous().into_handle()
    }

    #[tokio::test]
    async fn login_sets_and_logout_clears_the_session() {
        let router = router(Arc::new(Store::demo()));
        let session = session();

        let out = router
            .invoke("login", vec![json!("samvv@pm.me"), json!("blabla")], session.clone())
            .await
            .unwrap();
        let Output::Plain(value) = out else {
            panic!("login must return a plain value");
        };
        assert_eq!(value["success"], json!(true));
        assert_eq!(value["value"]["email"], json!("samvv@pm.me"));
        assert!(session.read().await.is_authenticated());

        router.invoke("logout", vec![], session.clone()).await.unwrap();
        assert!(!session.read().await.is_authenticated());
    }

    #[tokio::test]
    async fn wrong_password_is_a_domain_failure_value() {
        let router = router(Arc::new(Store::demo()));
        let session = session();
        let out = router
            .invoke("login", vec![json!("samvv@pm.me"), json!("nope")], session.clone())
            .await
            .unwrap();
        let Output::Plain(value) = out else {
            panic!("login must return a plain value");
        };
        assert_eq!(
            value,
            json!({"success": false, "value": [{"message": E_EMAIL_OR_PASSWORD_INCORRECT}]})
        );
        assert!(!session.read().await.is_authenticated());
    }

    #[tokio::test]
    async fn add_server_validates_the_name() {
        let store = Arc::new(Store::new(vec![], vec![]));
        let out = router(store.clone())
            .invoke(
                "addServer",
                vec![json!({"name": " ", "ownerId": Uuid::nil(), "status": 0, "isPublic": true})],
                session(),
            )
            .await
            .unwrap();
        let Output::Plain(value) = out else {
            panic!("addServer must return a plain value");
        };
        assert_eq!(value["success"], json!(false));
        assert_eq!(value["value"][0]["path"], json!(["name"]));
        assert!(store.servers().get().is_empty());
    }

    #[tokio::test]
    async fn list_servers_is_a_live_value() {
        let store = Arc::new(Store::demo());
        let out = router(store.clone())
            .invoke("listServers", vec![], session())
            .await
            .unwrap();
        let Output::Owned(value) = out else {
            panic!("listServers must return a live value");
        };
        assert_eq!(value.get()[0]["name"], json!("prometheus"));
    }
}
