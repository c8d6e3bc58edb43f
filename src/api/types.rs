//! Data types exchanged with the game server's HTTP API.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Body of `POST /auth/login` and `POST /auth/signup`.
#[derive(Debug, Clone, Serialize)]
pub struct AuthRequest<'a> {
    /// Account name.
    pub username: &'a str,
    /// Plain-text password, sent over TLS.
    pub password: &'a str,
}

/// One entry of the public room listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicGame {
    /// Room id, used with `join`.
    pub id: String,
    /// Private rooms are normally filtered out by the server.
    #[serde(default)]
    pub private: bool,
    /// Players currently in the room.
    pub players_count: u32,
    /// Player cap.
    pub max_players: u32,
    /// Whether the game is already running.
    #[serde(default)]
    pub started: bool,
}

impl PublicGame {
    /// Returns `true` if another player can join.
    pub fn has_room(&self) -> bool {
        self.players_count < self.max_players
    }
}

/// Errors returned by [`ApiClient`](super::ApiClient).
#[derive(Debug)]
pub enum ApiError {
    /// The request never produced a response (DNS, refused, timeout).
    Transport(String),
    /// The server answered with a non-success status and an error slug
    /// such as `invalid-credentials`.
    Status {
        /// HTTP status code.
        status: StatusCode,
        /// Plain-text error code from the body (may be empty).
        code: String,
    },
    /// The response body could not be decoded.
    Decode(String),
    /// Auth succeeded but no session cookie was set.
    MissingSession,
}

impl ApiError {
    /// Returns `true` for 401 responses.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status == StatusCode::UNAUTHORIZED)
    }

    /// Server error slug, if the server sent one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Status { code, .. } if !code.is_empty() => Some(code),
            _ => None,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "request failed: {msg}"),
            Self::Status { status, code } if code.is_empty() => write!(f, "server returned {status}"),
            Self::Status { status, code } => write!(f, "server returned {status}: {code}"),
            Self::Decode(msg) => write!(f, "invalid response: {msg}"),
            Self::MissingSession => write!(f, "server did not set a session cookie"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}
