//! Server side of the tether protocol.
//!
//! Build a [`Router`] of named handlers and hand it to a [`Server`], which
//! serves it over a WebSocket (one [`Connection`] per socket) and over the
//! HTTP fallback endpoints (one shared [`FallbackRegistry`]).
//!
//! ```no_run
//! use tether_server::{HandlerError, Output, Router, Server, ServerConfig};
//!
//! # async fn run() -> Result<(), tether_server::ServerError> {
//! let router = Router::new().method("ping", |_, _| async {
//!     Ok::<_, HandlerError>(Output::Plain(serde_json::json!("pong")))
//! });
//! Server::new(router, ServerConfig::default()).run().await
//! # }
//! ```

mod config;
mod connection;
mod error;
mod fallback;
mod http;
mod router;
mod session;
mod subscription;

pub use config::ServerConfig;
pub use connection::Connection;
pub use error::{DispatchError, HandlerError, ServerError};
pub use fallback::{E_STREAM_NOT_FOUND, FallbackRegistry};
pub use http::Server;
pub use router::{Args, CallContext, Output, Router};
pub use session::{Session, SessionHandle};
