//! Core types for tether.
//!
//! This crate provides the protocol primitives shared by the client and the
//! server: the envelope codec, the reactive value used for live results, the
//! identity carried by a session, and the HTTP bodies of the fallback
//! transport. Nothing here performs I/O.

mod codec;
mod fallback;
mod identity;
mod reactive;

pub use codec::{
    CodecError, Message, MessageType, Outcome, Request, Response, StreamEvent, StreamHandle,
    Unsubscribe, ValueEnvelope, ValueType, decode, encode,
};
pub use fallback::{CallBody, FallbackReply, StreamRef};
pub use identity::Identity;
pub use reactive::{Reactive, ReactiveError, Subscription};

/// Any value that crosses the wire.
pub type Value = serde_json::Value;

/// Correlates a request with its single response. Unique per connection.
pub type RequestId = u64;

/// Names a server-side subscription. Unique per connection (push) or per
/// server (fallback).
pub type SubscriptionId = u64;

/// Message sent in place of the details of an unexpected handler failure.
pub const E_INTERNAL_SERVER_ERROR: &str = "The server encountered an internal error.";

/// Fallback reply to a poll or close naming a subscription the server does
/// not hold, for instance after its lease ran out.
pub const E_STREAM_NOT_FOUND: &str = "Event stream with the given ID not found.";
