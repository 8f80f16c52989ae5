//! Who an authenticated session acts for.

use std::fmt;

/// The account a login handler vouched for.
///
/// The account id is opaque here; applications choose its format.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    account: String,
}

impl Identity {
    pub fn account(id: impl Into<String>) -> Self {
        Self { account: id.into() }
    }

    pub fn account_id(&self) -> &str {
        &self.account
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "account:{}", self.account)
    }
}
