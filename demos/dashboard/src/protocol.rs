//! Dashboard records as they travel over the wire.

use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, Error as _};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    /// Only ever read on the server.
    #[serde(skip_serializing, default)]
    pub password: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A machine shown on the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    /// Assigned by the server when the record is added.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub owner_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<String>,
    pub status: Status,
    pub is_public: bool,
}

impl Server {
    /// Whether `viewer` may see this server.
    pub fn visible_to(&self, viewer: Option<Uuid>) -> bool {
        self.is_public || viewer == Some(self.owner_id)
    }
}

/// Power state, sent as a small integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Status {
    Online,
    Offline,
}

impl TryFrom<u8> for Status {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Online),
            1 => Ok(Self::Offline),
            other => Err(format!("unknown server status {other}")),
        }
    }
}

impl From<Status> for u8 {
    fn from(status: Status) -> u8 {
        match status {
            Status::Online => 0,
            Status::Offline => 1,
        }
    }
}

/// One step of the path to the field a diagnostic is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(u64),
    Key(String),
}

/// A user-facing problem with a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            path: None,
            message: message.into(),
        }
    }

    pub fn at(field: &str, message: impl Into<String>) -> Self {
        Self {
            path: Some(vec![PathSegment::Key(field.to_string())]),
            message: message.into(),
        }
    }
}

/// Outcome of an operation the user can get wrong.
///
/// On the wire: `{"success": true, "value": T}` or
/// `{"success": false, "value": [Diagnostic, ...]}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fallible<T> {
    Success(T),
    Failure(Vec<Diagnostic>),
}

impl<T> Fallible<T> {
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure(vec![Diagnostic::new(message)])
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn into_result(self) -> Result<T, Vec<Diagnostic>> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure(diagnostics) => Err(diagnostics),
        }
    }
}

impl<T: Serialize> Serialize for Fallible<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Fallible", 2)?;
        match self {
            Self::Success(value) => {
                state.serialize_field("success", &true)?;
                state.serialize_field("value", value)?;
            }
            Self::Failure(diagnostics) => {
                state.serialize_field("success", &false)?;
                state.serialize_field("value", diagnostics)?;
            }
        }
        state.end()
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Fallible<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Repr {
            success: bool,
            value: serde_json::Value,
        }

        let repr = Repr::deserialize(deserializer)?;
        if repr.success {
            serde_json::from_value(repr.value)
                .map(Self::Success)
                .map_err(D::Error::custom)
        } else {
            serde_json::from_value(repr.value)
                .map(Self::Failure)
                .map_err(D::Error::custom)
        }
    }
}
