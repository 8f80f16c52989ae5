//! Protocol messages.
//!
//! Every frame is a JSON array whose first element is a [`MessageType`] tag
//! and whose remaining elements are positional fields:
//!
//! ```text
//! [0, id, method, [args...]]     MethodRequest   client -> server
//! [1, id, message]               MethodFailure   server -> client
//! [2, id, envelope]              MethodSuccess   server -> client
//! [3, subscription]              SourceClose     client -> server
//! [4, subscription, value]       SourceNotify    server -> client
//! ```
//!
//! A result envelope is `[0, value]` for a plain value or
//! `[1, subscription, initial]` / `[1, subscription, initial, poll_ms]` for a
//! live one. Decoding never trusts its input: anything that does not match one
//! of these shapes is reported as [`CodecError::MalformedMessage`].

use crate::{RequestId, SubscriptionId, Value};
use serde_json::json;
use std::time::Duration;

/// Frame tag, the first element of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    MethodRequest = 0,
    MethodFailure = 1,
    MethodSuccess = 2,
    SourceClose = 3,
    SourceNotify = 4,
}

impl MessageType {
    fn from_tag(tag: u64) -> Option<Self> {
        match tag {
            0 => Some(Self::MethodRequest),
            1 => Some(Self::MethodFailure),
            2 => Some(Self::MethodSuccess),
            3 => Some(Self::SourceClose),
            4 => Some(Self::SourceNotify),
            _ => None,
        }
    }

    fn tag(self) -> u64 {
        self as u64
    }
}

/// Envelope tag, the first element of a result envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Plain = 0,
    Stream = 1,
}

impl ValueType {
    fn tag(self) -> u64 {
        self as u64
    }
}

/// A method call issued by a client.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub args: Vec<Value>,
}

/// The single answer to a [`Request`].
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: RequestId,
    pub outcome: Outcome,
}

impl Response {
    pub fn success(id: RequestId, envelope: ValueEnvelope) -> Self {
        Self {
            id,
            outcome: Outcome::Success(envelope),
        }
    }

    pub fn failure(id: RequestId, message: impl Into<String>) -> Self {
        Self {
            id,
            outcome: Outcome::Failure(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(ValueEnvelope),
    /// User-facing failure message.
    Failure(String),
}

/// Distinguishes a one-shot result from a live one.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueEnvelope {
    Plain(Value),
    Stream(StreamHandle),
}

/// A live result: the receiver materializes a reactive value seeded with
/// `initial` and keeps it in sync under `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamHandle {
    pub id: SubscriptionId,
    pub initial: Value,
    /// How often the server suggests polling. Only sent by the fallback
    /// transport.
    pub poll_hint: Option<Duration>,
}

/// A new value for a live result, sent after its [`StreamHandle`].
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub subscription: SubscriptionId,
    pub value: Value,
}

/// Releases a server-side subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unsubscribe {
    pub subscription: SubscriptionId,
}

/// Any frame of the protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notify(StreamEvent),
    Close(Unsubscribe),
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Self::Request(request)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

impl From<StreamEvent> for Message {
    fn from(event: StreamEvent) -> Self {
        Self::Notify(event)
    }
}

impl From<Unsubscribe> for Message {
    fn from(close: Unsubscribe) -> Self {
        Self::Close(close)
    }
}

/// Error decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("malformed message: {reason}")]
    MalformedMessage {
        reason: String,
        /// Id of the request the frame claimed to be, when it could be read.
        request_id: Option<RequestId>,
    },
}

impl CodecError {
    fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            reason: reason.into(),
            request_id: None,
        }
    }

    fn for_request(self, id: Option<RequestId>) -> Self {
        match self {
            Self::MalformedMessage { reason, .. } => Self::MalformedMessage {
                reason,
                request_id: id,
            },
        }
    }

    /// Id of the request this frame belonged to, if it could be recovered.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::MalformedMessage { request_id, .. } => *request_id,
        }
    }
}

/// Serialize a message into a text frame.
pub fn encode(message: &Message) -> String {
    message.to_json().to_string()
}

/// Parse a text frame.
pub fn decode(text: &str) -> Result<Message, CodecError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| CodecError::malformed(format!("invalid JSON: {e}")))?;
    Message::from_json(&value)
}

impl Message {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Request(r) => json!([MessageType::MethodRequest.tag(), r.id, r.method, r.args]),
            Self::Response(Response {
                id,
                outcome: Outcome::Success(envelope),
            }) => json!([MessageType::MethodSuccess.tag(), id, envelope.to_json()]),
            Self::Response(Response {
                id,
                outcome: Outcome::Failure(message),
            }) => json!([MessageType::MethodFailure.tag(), id, message]),
            Self::Notify(e) => json!([MessageType::SourceNotify.tag(), e.subscription, e.value]),
            Self::Close(c) => json!([MessageType::SourceClose.tag(), c.subscription]),
        }
    }

    pub fn from_json(value: &Value) -> Result<Self, CodecError> {
        let items = value
            .as_array()
            .ok_or_else(|| CodecError::malformed("frame is not an array"))?;
        let tag = items
            .first()
            .and_then(Value::as_u64)
            .ok_or_else(|| CodecError::malformed("frame has no integer tag"))?;
        let kind = MessageType::from_tag(tag)
            .ok_or_else(|| CodecError::malformed(format!("unknown message tag {tag}")))?;

        match kind {
            MessageType::MethodRequest => {
                let id = items.get(1).and_then(Value::as_u64);
                decode_request(items).map_err(|e| e.for_request(id))
            }
            MessageType::MethodSuccess => {
                let [_, id, envelope] = items.as_slice() else {
                    return Err(arity("MethodSuccess", 3, items.len()));
                };
                Ok(Self::Response(Response::success(
                    as_id(id, "request id")?,
                    ValueEnvelope::from_json(envelope)?,
                )))
            }
            MessageType::MethodFailure => {
                let [_, id, message] = items.as_slice() else {
                    return Err(arity("MethodFailure", 3, items.len()));
                };
                let message = message
                    .as_str()
                    .ok_or_else(|| CodecError::malformed("failure message is not a string"))?;
                Ok(Self::Response(Response::failure(
                    as_id(id, "request id")?,
                    message,
                )))
            }
            MessageType::SourceNotify => {
                let [_, subscription, value] = items.as_slice() else {
                    return Err(arity("SourceNotify", 3, items.len()));
                };
                Ok(Self::Notify(StreamEvent {
                    subscription: as_id(subscription, "subscription id")?,
                    value: value.clone(),
                }))
            }
            MessageType::SourceClose => {
                let [_, subscription] = items.as_slice() else {
                    return Err(arity("SourceClose", 2, items.len()));
                };
                Ok(Self::Close(Unsubscribe {
                    subscription: as_id(subscription, "subscription id")?,
                }))
            }
        }
    }
}

fn decode_request(items: &[Value]) -> Result<Message, CodecError> {
    let [_, id, method, args] = items else {
        return Err(arity("MethodRequest", 4, items.len()));
    };
    let method = method
        .as_str()
        .ok_or_else(|| CodecError::malformed("method name is not a string"))?;
    let args = args
        .as_array()
        .ok_or_else(|| CodecError::malformed("argument list is not an array"))?;
    Ok(Message::Request(Request {
        id: as_id(id, "request id")?,
        method: method.to_string(),
        args: args.clone(),
    }))
}

impl ValueEnvelope {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Plain(value) => json!([ValueType::Plain.tag(), value]),
            Self::Stream(StreamHandle {
                id,
                initial,
                poll_hint: None,
            }) => json!([ValueType::Stream.tag(), id, initial]),
            Self::Stream(StreamHandle {
                id,
                initial,
                poll_hint: Some(hint),
            }) => {
                let millis = u64::try_from(hint.as_millis()).unwrap_or(u64::MAX);
                json!([ValueType::Stream.tag(), id, initial, millis])
            }
        }
    }

    pub fn from_json(value: &Value) -> Result<Self, CodecError> {
        let items = value
            .as_array()
            .ok_or_else(|| CodecError::malformed("value envelope is not an array"))?;
        match items.as_slice() {
            [tag, value] if tag.as_u64() == Some(ValueType::Plain.tag()) => {
                Ok(Self::Plain(value.clone()))
            }
            [tag, id, initial, rest @ ..]
                if tag.as_u64() == Some(ValueType::Stream.tag()) && rest.len() <= 1 =>
            {
                let poll_hint = match rest.first() {
                    None | Some(Value::Null) => None,
                    Some(hint) => Some(Duration::from_millis(hint.as_u64().ok_or_else(
                        || CodecError::malformed("poll hint is not a non-negative integer"),
                    )?)),
                };
                Ok(Self::Stream(StreamHandle {
                    id: as_id(id, "subscription id")?,
                    initial: initial.clone(),
                    poll_hint,
                }))
            }
            [tag, ..] => Err(CodecError::malformed(format!(
                "unrecognised value envelope with tag {tag} and {} fields",
                items.len()
            ))),
            [] => Err(CodecError::malformed("value envelope is empty")),
        }
    }
}

fn as_id(value: &Value, what: &str) -> Result<u64, CodecError> {
    value
        .as_u64()
        .ok_or_else(|| CodecError::malformed(format!("{what} is not a non-negative integer")))
}

fn arity(kind: &str, expected: usize, got: usize) -> CodecError {
    CodecError::malformed(format!("{kind} expects {expected} fields, got {got}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_request() {
        let msg = decode(r#"[0, 7, "login", ["samvv@pm.me", "blabla"]]"#).unwrap();
        assert_eq!(
            msg,
            Message::Request(Request {
                id: 7,
                method: "login".into(),
                args: vec![json!("samvv@pm.me"), json!("blabla")],
            })
        );
    }

    #[test]
    fn encode_matches_wire_layout() {
        let frame = encode(&Response::failure(3, "nope").into());
        assert_eq!(frame, r#"[1,3,"nope"]"#);

        let frame = encode(&Unsubscribe { subscription: 9 }.into());
        assert_eq!(frame, "[3,9]");

        let frame = encode(
            &Response::success(
                4,
                ValueEnvelope::Stream(StreamHandle {
                    id: 2,
                    initial: json!([]),
                    poll_hint: None,
                }),
            )
            .into(),
        );
        assert_eq!(frame, "[2,4,[1,2,[]]]");
    }

    #[test]
    fn stream_envelope_with_poll_hint() {
        let envelope = ValueEnvelope::from_json(&json!([1, 5, {"a": 1}, 3000])).unwrap();
        assert_eq!(
            envelope,
            ValueEnvelope::Stream(StreamHandle {
                id: 5,
                initial: json!({"a": 1}),
                poll_hint: Some(Duration::from_secs(3)),
            })
        );
        assert_eq!(envelope.to_json(), json!([1, 5, {"a": 1}, 3000]));
    }

    #[test]
    fn notify_carries_subscription() {
        let msg = decode(r#"[4, 1, [{"name": "prometheus"}]]"#).unwrap();
        let Message::Notify(event) = msg else {
            panic!("expected notify, got {msg:?}");
        };
        assert_eq!(event.subscription, 1);
        assert_eq!(event.value, json!([{"name": "prometheus"}]));
    }

    #[test]
    fn rejects_non_array() {
        let err = decode(r#"{"type": "request"}"#).unwrap_err();
        assert!(err.to_string().contains("not an array"));
        assert_eq!(err.request_id(), None);
    }

    #[test]
    fn rejects_invalid_json() {
        assert!(decode("[0, 1,").is_err());
    }

    #[test]
    fn rejects_unknown_tag() {
        let err = decode("[42, 1]").unwrap_err();
        assert!(err.to_string().contains("unknown message tag 42"));
    }

    #[test]
    fn rejects_wrong_arity() {
        assert!(decode("[3]").is_err());
        assert!(decode("[4, 1]").is_err());
        assert!(decode(r#"[1, 1, "a", "b"]"#).is_err());
    }

    #[test]
    fn malformed_request_keeps_its_id() {
        let err = decode(r#"[0, 12, "login", "not-a-list"]"#).unwrap_err();
        assert_eq!(err.request_id(), Some(12));

        let err = decode(r#"[0, 13, 99, []]"#).unwrap_err();
        assert_eq!(err.request_id(), Some(13));
    }

    #[test]
    fn rejects_negative_ids() {
        assert!(decode(r#"[2, -1, [0, null]]"#).is_err());
        assert!(decode("[3, -4]").is_err());
    }

    #[test]
    fn rejects_unknown_envelope() {
        assert!(decode("[2, 1, [7, null]]").is_err());
        assert!(decode("[2, 1, []]").is_err());
        assert!(decode(r#"[2, 1, "plain"]"#).is_err());
        assert!(decode("[2, 1, [1, 0, null, 10, 11]]").is_err());
    }
}
