//! Server dashboard served over tether.
//!
//! A person logs in, lists the servers they may see, and adds new ones.
//! `listServers` returns a live value, so every open list follows additions
//! made by any caller.

pub mod handlers;
pub mod protocol;
pub mod store;

pub use handlers::router;
pub use store::Store;
