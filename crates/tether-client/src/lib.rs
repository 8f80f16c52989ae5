//! Client side of the tether protocol.
//!
//! A [`Client`] numbers calls and turns result envelopes into plain values or
//! [`RemoteValue`]s. The bytes travel over a [`Transport`]: either a
//! [`PushTransport`] (WebSocket, server pushes changes) or a
//! [`FallbackTransport`] (HTTP, client polls for changes).

mod config;
mod dispatcher;
mod error;
mod fallback;
mod push;
mod transport;

pub use config::{ClientConfig, TransportMode};
pub use dispatcher::{Client, RemoteValue, Reply};
pub use error::ClientError;
pub use fallback::{FallbackTransport, poll_period};
pub use push::PushTransport;
pub use transport::{Transport, TransportKind};
