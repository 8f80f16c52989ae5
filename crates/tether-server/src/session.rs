use std::sync::Arc;
use tether_core::Identity;
use tokio::sync::RwLock;

/// State of one caller: who they are, if anyone.
///
/// A push connection keeps one session for its whole life. Every fallback
/// call gets a fresh anonymous one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    identity: Option<Identity>,
}

/// Session shared between a connection and the handlers it runs.
pub type SessionHandle = Arc<RwLock<Session>>;

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_identity(identity: Identity) -> Self {
        Self {
            identity: Some(identity),
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    pub fn authenticate(&mut self, identity: Identity) {
        tracing::debug!(%identity, "Session authenticated");
        self.identity = Some(identity);
    }

    pub fn clear(&mut self) {
        self.identity = None;
    }

    pub fn into_handle(self) -> SessionHandle {
        Arc::new(RwLock::new(self))
    }
}
