use crate::ServerError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server settings, usually read from a TOML file. Durations are in
/// milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Poll period suggested to fallback clients.
    pub poll_hint_ms: u64,
    /// How long an unpolled fallback stream is kept.
    pub fallback_lease_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 3000)),
            poll_hint_ms: 3000,
            fallback_lease_ms: 60_000,
            sweep_interval_ms: 5000,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let text = std::fs::read_to_string(path).map_err(|source| ServerError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ServerError> {
        Ok(toml::from_str(text)?)
    }

    pub fn poll_hint(&self) -> Duration {
        Duration::from_millis(self.poll_hint_ms)
    }

    pub fn fallback_lease(&self) -> Duration {
        Duration::from_millis(self.fallback_lease_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        assert_eq!(ServerConfig::from_toml("").unwrap(), ServerConfig::default());
    }

    #[test]
    fn overrides_are_applied() {
        let config = ServerConfig::from_toml(
            r#"
            listen = "0.0.0.0:8080"
            poll_hint_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.listen.port(), 8080);
        assert_eq!(config.poll_hint(), Duration::from_millis(500));
        assert_eq!(config.fallback_lease(), Duration::from_secs(60));
    }

    #[test]
    fn bad_address_is_rejected() {
        let err = ServerConfig::from_toml(r#"listen = "nowhere""#).unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = ServerConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }
}
