//! Realtime transport boundary.
//!
//! The bootstrapper never touches a socket library directly. It asks a
//! [`Transport`] to open a [`Socket`], which is nothing more than a stream of
//! lifecycle/message events and a command sender. The production
//! implementation lives in [`crate::ws`]; tests drive the bootstrapper with a
//! scripted transport instead.
//!
//! # Event Order
//!
//! A socket emits at most one [`SocketEvent::Open`] and at most one
//! [`SocketEvent::Closed`]. [`SocketEvent::Error`] is diagnostic and is
//! expected to be followed by a close. Dropping the event sender without a
//! close is treated by consumers as an abnormal close.

use anyhow::Result;
use tokio::sync::mpsc;

use crate::constants::{CLOSE_ABNORMAL, CLOSE_NORMAL};

/// An opaque inbound or outbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl Payload {
    /// Size of the payload in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }

    /// Returns `true` if the payload carries no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Self::Binary(data)
    }
}

impl std::fmt::Display for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => write!(f, "{text}"),
            Self::Binary(data) => write!(f, "<binary {} bytes>", data.len()),
        }
    }
}

/// Close code and reason reported when a socket terminates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// WebSocket close code (1000 = normal, 1006 = abnormal).
    pub code: u16,
    /// Human-readable close reason.
    pub reason: String,
}

impl CloseInfo {
    /// Build a close record.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Close without a close frame (connection refused, stream ended).
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_ABNORMAL, reason)
    }

    /// Returns `true` for a normal (1000) closure.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.code == CLOSE_NORMAL
    }
}

impl std::fmt::Display for CloseInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.reason.is_empty() {
            write!(f, "code {}", self.code)
        } else {
            write!(f, "code {} ({})", self.code, self.reason)
        }
    }
}

/// Lifecycle and message events produced by a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// The socket is open and accepting traffic.
    Open,
    /// An inbound payload.
    Message(Payload),
    /// A transport or protocol error. Diagnostic only.
    Error(String),
    /// The socket terminated.
    Closed(CloseInfo),
}

/// Commands accepted by a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketCommand {
    /// Send a payload.
    Send(Payload),
    /// Initiate a graceful close.
    Close,
}

/// An opened socket: its event stream and command channel.
#[derive(Debug)]
pub struct Socket {
    /// Events in the order the transport observed them.
    pub events: mpsc::UnboundedReceiver<SocketEvent>,
    /// Outgoing command channel.
    pub commands: mpsc::UnboundedSender<SocketCommand>,
}

/// Something that can open realtime sockets.
pub trait Transport: Send + Sync {
    /// Create a socket for `address`.
    ///
    /// Must not wait for the socket to open: the returned [`Socket`] reports
    /// the outcome through its events. Returns an error only if the socket
    /// cannot be created at all (malformed address, no runtime).
    fn open(&self, address: &str) -> Result<Socket>;
}
