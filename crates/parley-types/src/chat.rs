//! Chat session and exchange types.
//!
//! A chat session belongs to exactly one user and holds an append-mostly log
//! of request/response exchanges plus the request parameters used for every
//! request sent within it.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;
use crate::params::ChatSessionParameters;
use crate::user::UserId;

/// Unique identifier for a chat session, wrapping a UUID v7 (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new SessionId using UUID v7.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle state of a chat session.
///
/// Maps to the CHECK constraint in the SQLite schema:
/// `CHECK (state IN ('session-open', 'session-close'))`.
/// `Open -> Closed` is the only transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    #[serde(rename = "session-open")]
    Open,
    #[serde(rename = "session-close")]
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Open => "session-open",
            SessionState::Closed => "session-close",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session-open" => Ok(SessionState::Open),
            "session-close" => Ok(SessionState::Closed),
            other => Err(format!("invalid session state: '{other}'")),
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Open
    }
}

/// A chat session row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: SessionId,
    /// Owning user. Never changes after creation.
    pub user_id: UserId,
    pub state: SessionState,
    /// Target generation model. Kept equal to `settings.model`.
    pub model: String,
    pub settings: ChatSessionParameters,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    /// A new open session for `user_id` with default parameters for `model`.
    pub fn new(user_id: UserId, model: impl Into<String>) -> Self {
        let model = model.into();
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            user_id,
            state: SessionState::Open,
            settings: ChatSessionParameters::new(model.clone()),
            model,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }
}

/// One request and its response, recorded in a session's history.
///
/// Timestamps are supplied by the caller; listing order follows
/// `request_timestamp`, not recording order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatExchange {
    #[serde(rename = "request_ts")]
    pub request_timestamp: DateTime<Utc>,
    pub request: String,
    #[serde(rename = "response_ts")]
    pub response_timestamp: DateTime<Utc>,
    pub response: String,
}

/// Latest year a stored timestamp may carry; later years no longer fit the
/// fixed-width text form.
pub const MAX_TIMESTAMP_YEAR: i32 = 9999;

impl ChatExchange {
    /// Reject timestamps outside years `0..=9999`.
    pub fn validate(&self) -> Result<(), StoreError> {
        for (field, ts) in [
            ("request_ts", &self.request_timestamp),
            ("response_ts", &self.response_timestamp),
        ] {
            if !(0..=MAX_TIMESTAMP_YEAR).contains(&ts.year()) {
                return Err(StoreError::InvalidExchange(format!(
                    "{field} {ts} outside years 0000..={MAX_TIMESTAMP_YEAR}"
                )));
            }
        }
        Ok(())
    }
}
