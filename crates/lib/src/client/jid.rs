//! Recipient addressing.

use std::fmt;

/// Server part for regular user accounts.
pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";

/// Account address: `user@server`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Jid {
    pub user: String,
    pub server: String,
}

impl Jid {
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            server: server.into(),
        }
    }

    /// User JID on the default server for a phone number (normalized first).
    pub fn from_phone(phone: &str) -> Self {
        Self::new(normalize_phone(phone), DEFAULT_USER_SERVER)
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.server)
    }
}

/// Strip one leading `+`, then all spaces and hyphens. No other validation; malformed
/// numbers are left for the protocol to reject.
pub fn normalize_phone(phone: &str) -> String {
    let phone = phone.strip_prefix('+').unwrap_or(phone);
    phone.chars().filter(|c| *c != ' ' && *c != '-').collect()
}
