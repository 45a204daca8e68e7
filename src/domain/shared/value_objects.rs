//! Shared value objects used across the session context

use crate::domain::shared::error::SessionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Session identifier
///
/// Generated locally for outgoing sessions, assigned by the remote party
/// for incoming ones, so it is kept as an opaque string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address-qualified destination (`user@host`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    user: String,
    host: String,
}

impl Address {
    pub fn new(user: String, host: String) -> Self {
        Self { user, host }
    }

    /// Parses `user@host`, tolerating a leading `sip:` scheme.
    pub fn parse(uri: &str) -> Result<Self, SessionError> {
        let trimmed = uri.trim();
        let without_scheme = trimmed.strip_prefix("sip:").unwrap_or(trimmed);

        let (user, host) = without_scheme
            .split_once('@')
            .ok_or_else(|| SessionError::InvalidAddress(format!("'{}' has no '@'", uri)))?;

        if user.is_empty() || host.is_empty() || host.contains('@') {
            return Err(SessionError::InvalidAddress(format!(
                "'{}' is not of the form user@host",
                uri
            )));
        }

        Ok(Self {
            user: user.to_string(),
            host: host.to_string(),
        })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.host)
    }
}

/// A party to a session: uri plus optional display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    uri: String,
    #[serde(default, rename = "displayName", skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
}

impl Identity {
    pub fn new(uri: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            uri: uri.into(),
            display_name,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display_name {
            Some(name) => write!(f, "\"{}\" <{}>", name, self.uri),
            None => f.write_str(&self.uri),
        }
    }
}
