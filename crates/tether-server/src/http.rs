//! HTTP and WebSocket surface.
//!
//! `GET /` upgrades to the push transport. The fallback transport lives under
//! `/fallback`. Application failures are answered with status 200 and an
//! error body; any other status means the request itself was unusable.
//!
//! Fallback bodies are read as JSON whatever their content type, since
//! browsers posting with `fetch` often send `text/plain`. Every response
//! allows any origin and `OPTIONS` preflights are answered.

use crate::{Connection, FallbackRegistry, Router, ServerConfig, ServerError, Session};
use axum::body::Bytes;
use axum::extract::ws::{Message as Frame, WebSocket};
use axum::extract::{FromRequest, Request, State, WebSocketUpgrade};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, middleware};
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use tether_core::{CallBody, FallbackReply, Message, StreamRef, Value, encode};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

#[derive(Clone)]
struct AppState {
    router: Arc<Router>,
    fallback: Arc<FallbackRegistry>,
}

/// A handler table served over both transports.
pub struct Server {
    config: ServerConfig,
    router: Arc<Router>,
    fallback: Arc<FallbackRegistry>,
}

impl Server {
    pub fn new(router: Router, config: ServerConfig) -> Self {
        let router = Arc::new(router);
        let fallback = Arc::new(FallbackRegistry::new(
            Arc::clone(&router),
            config.poll_hint(),
            config.fallback_lease(),
        ));
        Self {
            config,
            router,
            fallback,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn fallback(&self) -> &Arc<FallbackRegistry> {
        &self.fallback
    }

    pub fn app(&self) -> axum::Router {
        axum::Router::new()
            .route("/", get(upgrade))
            .route("/health", get(health))
            .route("/fallback/call", post(call).options(preflight))
            .route("/fallback/poll", post(poll).options(preflight))
            .route("/fallback/close", post(close).options(preflight))
            .layer(middleware::map_response(allow_any_origin))
            .with_state(AppState {
                router: Arc::clone(&self.router),
                fallback: Arc::clone(&self.fallback),
            })
    }

    /// Serve on an already bound listener until the process stops.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!("Listening on ws://{} and http://{}/fallback", addr, addr);
        let sweeper = self.fallback.spawn_sweeper(self.config.sweep_interval());
        let result = axum::serve(listener, self.app()).await;
        sweeper.abort();
        Ok(result?)
    }

    /// Bind `config.listen` and serve.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.config.listen;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        self.serve(listener).await
    }
}

async fn allow_any_origin(mut response: Response) -> Response {
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

async fn preflight() -> (StatusCode, [(header::HeaderName, &'static str); 2]) {
    (
        StatusCode::NO_CONTENT,
        [
            (header::ACCESS_CONTROL_ALLOW_METHODS, "POST, OPTIONS"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "content-type"),
        ],
    )
}

/// A JSON request body, accepted under any content type.
struct AnyJson<T>(T);

impl<T, S> FromRequest<S> for AnyJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| (e.status(), e.body_text()))?;
        serde_json::from_slice(&bytes)
            .map(Self)
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid request body: {e}")))
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn call(State(state): State<AppState>, AnyJson(body): AnyJson<CallBody>) -> Json<FallbackReply> {
    Json(state.fallback.call(body).await)
}

async fn poll(
    State(state): State<AppState>,
    AnyJson(StreamRef { id }): AnyJson<StreamRef>,
) -> Json<FallbackReply> {
    Json(state.fallback.poll(id))
}

async fn close(
    State(state): State<AppState>,
    AnyJson(StreamRef { id }): AnyJson<StreamRef>,
) -> Json<FallbackReply> {
    Json(state.fallback.close(id))
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.router))
}

async fn handle_socket(socket: WebSocket, router: Arc<Router>) {
    let (mut sink, mut stream) = socket.split();
    let (outbound, mut queue) = mpsc::unbounded_channel::<Message>();
    let conn = Connection::new(router, Session::anonymous().into_handle(), outbound);
    tracing::debug!("Push connection opened");

    let writer = tokio::spawn(async move {
        while let Some(message) = queue.recv().await {
            if sink.send(Frame::Text(encode(&message).into())).await.is_err() {
                tracing::debug!("WebSocket send failed, client disconnected");
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Frame::Text(text)) => conn.handle_frame(text.as_str()),
            Ok(Frame::Close(_)) => break,
            Ok(Frame::Binary(_)) => tracing::warn!("Ignoring binary frame"),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("WebSocket error: {}", e);
                break;
            }
        }
    }

    conn.teardown();
    writer.abort();
    tracing::debug!("Push connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{HandlerError, Output};
    use axum::body::Body;
    use axum::http::Request;
    use tether_core::Reactive;
    use tower::ServiceExt;

    fn server() -> Server {
        let router = Router::new()
            .method("hello", |_, _| async {
                Ok::<_, HandlerError>(Output::Plain(json!("world")))
            })
            .method("boom", |_, _| async {
                Err::<Output, _>(HandlerError::Internal(anyhow::anyhow!("secret detail")))
            })
            .method("live", |_, _| async {
                Ok::<_, HandlerError>(Output::Owned(Reactive::new(json!(1))))
            });
        Server::new(router, ServerConfig::default())
    }

    async fn post_json(app: axum::Router, path: &str, body: Value) -> (StatusCode, Response) {
        let request = Request::post(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        (response.status(), response)
    }

    async fn reply(response: Response) -> FallbackReply {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let response = server()
            .app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
    }

    #[tokio::test]
    async fn call_returns_plain_envelope() {
        let (status, response) = post_json(
            server().app(),
            "/fallback/call",
            json!({"methodName": "hello", "args": []}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply(response).await, FallbackReply::success(json!([0, "world"])));
    }

    #[tokio::test]
    async fn failures_are_error_bodies() {
        let server = server();
        let (status, response) = post_json(
            server.app(),
            "/fallback/call",
            json!({"methodName": "missing"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            reply(response).await,
            FallbackReply::error("Method 'missing' was not found.")
        );

        let (_, response) =
            post_json(server.app(), "/fallback/call", json!({"methodName": "boom"})).await;
        assert_eq!(
            reply(response).await,
            FallbackReply::error(tether_core::E_INTERNAL_SERVER_ERROR)
        );
    }

    #[tokio::test]
    async fn stream_can_be_polled_and_closed() {
        let server = server();
        let (_, response) =
            post_json(server.app(), "/fallback/call", json!({"methodName": "live"})).await;
        let FallbackReply::Success { value } = reply(response).await else {
            panic!("call failed");
        };
        assert_eq!(value, json!([1, 0, 1, 3000]));

        let (_, response) = post_json(server.app(), "/fallback/poll", json!({"id": 0})).await;
        assert_eq!(reply(response).await, FallbackReply::success(json!(1)));

        let (_, response) = post_json(server.app(), "/fallback/close", json!({"id": 0})).await;
        assert_eq!(reply(response).await, FallbackReply::success(Value::Null));
        assert!(server.fallback().is_empty());

        let (status, response) = post_json(server.app(), "/fallback/poll", json!({"id": 0})).await;
        assert_eq!(status, StatusCode::OK);
        assert!(matches!(reply(response).await, FallbackReply::Error { .. }));
    }

    #[tokio::test]
    async fn body_without_json_content_type_is_accepted() {
        let request = Request::post("/fallback/call")
            .header(header::CONTENT_TYPE, "text/plain;charset=UTF-8")
            .body(Body::from(json!({"methodName": "hello", "args": []}).to_string()))
            .unwrap();
        let response = server().app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(reply(response).await, FallbackReply::success(json!([0, "world"])));
    }

    #[tokio::test]
    async fn preflight_is_answered() {
        let request = Request::options("/fallback/poll")
            .header(header::ORIGIN, "http://localhost:8080")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();
        let response = server().app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS],
            "POST, OPTIONS"
        );
    }

    #[tokio::test]
    async fn unusable_body_is_a_transport_error() {
        let request = Request::post("/fallback/call")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = server().app().oneshot(request).await.unwrap();
        assert_ne!(response.status(), StatusCode::OK);
    }
}
