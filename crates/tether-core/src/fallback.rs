//! HTTP bodies of the fallback transport.
//!
//! The fallback transport exposes `call`, `poll` and `close` endpoints. Each
//! answers with a [`FallbackReply`]; for `call` the reply value is an encoded
//! [`ValueEnvelope`](crate::ValueEnvelope).

use crate::{SubscriptionId, Value};
use serde::{Deserialize, Serialize};

/// Body of a `call` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallBody {
    pub method_name: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Body of a `poll` or `close` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRef {
    pub id: SubscriptionId,
}

/// Answer of every fallback endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FallbackReply {
    Success { value: Value },
    Error { message: String },
}

impl FallbackReply {
    pub fn success(value: Value) -> Self {
        Self::Success { value }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_body_uses_camel_case() {
        let body: CallBody =
            serde_json::from_value(json!({"methodName": "listServers", "args": []})).unwrap();
        assert_eq!(body.method_name, "listServers");
        assert!(body.args.is_empty());
    }

    #[test]
    fn call_body_args_default_to_empty() {
        let body: CallBody = serde_json::from_value(json!({"methodName": "logout"})).unwrap();
        assert!(body.args.is_empty());
    }

    #[test]
    fn reply_is_tagged_by_type() {
        let reply = FallbackReply::error("Event stream with the given ID not found.");
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"type": "error", "message": "Event stream with the given ID not found."})
        );
        let reply: FallbackReply =
            serde_json::from_value(json!({"type": "success", "value": [0, 1]})).unwrap();
        assert_eq!(reply, FallbackReply::success(json!([0, 1])));
    }
}
