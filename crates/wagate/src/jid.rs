//! Account addresses and recipient normalization.

use crate::error::{GatewayError, Result};
use serde::{Serialize, Serializer};
use std::fmt;

/// Server suffix for individual user accounts.
pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";
/// Server suffix for group chats.
pub const GROUP_SERVER: &str = "g.us";

/// An address on the messaging network: `user@server`.
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

    /// A user address on the default server.
    pub fn user(user: impl Into<String>) -> Self {
        Self::new(user, DEFAULT_USER_SERVER)
    }

    /// Strict `user@server` parse. The user part may be empty here; callers
    /// that need an addressable recipient go through [`normalize_recipient`].
    pub fn parse(raw: &str) -> Result<Self> {
        let Some((user, server)) = raw.split_once('@') else {
            return Err(GatewayError::invalid_recipient(raw, "missing server part"));
        };
        if server.is_empty() || server.contains('@') || server.chars().any(char::is_whitespace) {
            return Err(GatewayError::invalid_recipient(raw, "malformed server part"));
        }
        Ok(Self::new(user, server))
    }

    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.user.is_empty() {
            write!(f, "{}", self.server)
        } else {
            write!(f, "{}@{}", self.user, self.server)
        }
    }
}

impl Serialize for Jid {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Normalize a recipient target into an addressable [`Jid`].
///
/// A leading `+` is dropped, a bare number lands on [`DEFAULT_USER_SERVER`],
/// and anything containing `@` is parsed strictly and rejected when the user
/// part is empty.
pub fn normalize_recipient(target: &str) -> Result<Jid> {
    let trimmed = target.trim();
    let arg = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if arg.is_empty() {
        return Err(GatewayError::invalid_recipient(target, "empty recipient"));
    }

    if !arg.contains('@') {
        return Ok(Jid::user(arg));
    }

    let jid = Jid::parse(arg)?;
    if jid.user.is_empty() {
        return Err(GatewayError::invalid_recipient(target, "empty user part"));
    }
    Ok(jid)
}

/// The registry key for a sender: the user part of the address.
pub fn session_key(sender: &str) -> String {
    let trimmed = sender.trim();
    let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);
    match trimmed.split_once('@') {
        Some((user, _)) => user.trim().to_string(),
        None => trimmed.to_string(),
    }
}

/// Split a comma-separated recipient list, trimming each entry.
pub fn parse_recipient_list(raw: &str) -> Result<Vec<String>> {
    if raw.trim().is_empty() {
        return Err(GatewayError::invalid_recipient(raw, "empty recipients"));
    }
    Ok(raw.split(',').map(|s| s.trim().to_string()).collect())
}
