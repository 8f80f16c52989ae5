use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Which transport [`Client::connect`](crate::Client::connect) uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// WebSocket, or HTTP if the WebSocket cannot be opened in time.
    #[default]
    Auto,
    Push,
    Fallback,
}

impl FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "push" => Ok(Self::Push),
            "fallback" => Ok(Self::Fallback),
            other => Err(format!(
                "unknown transport mode '{other}', expected auto, push or fallback"
            )),
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Push => f.write_str("push"),
            Self::Fallback => f.write_str("fallback"),
        }
    }
}

/// Client settings. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint of the push transport.
    pub url: String,
    /// Prefix of the fallback endpoints.
    pub fallback_url: String,
    pub connect_timeout_ms: u64,
    /// Lower bound for the poll period, whatever the server suggests.
    pub min_poll_ms: u64,
    pub mode: TransportMode,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:3000".to_string(),
            fallback_url: "http://127.0.0.1:3000/fallback".to_string(),
            connect_timeout_ms: 5000,
            min_poll_ms: 1000,
            mode: TransportMode::Auto,
        }
    }
}

impl ClientConfig {
    /// Config for a server at `host:port`, using its default paths.
    pub fn for_server(host: &str, port: u16) -> Self {
        Self {
            url: format!("ws://{host}:{port}"),
            fallback_url: format!("http://{host}:{port}/fallback"),
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn min_poll(&self) -> Duration {
        Duration::from_millis(self.min_poll_ms)
    }
}
