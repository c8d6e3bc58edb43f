//! gto - command-line client for the realtime drawing game.
//!
//! The core of the crate is the connection bootstrap: a room socket is
//! opened and everything it receives is buffered until a room session is
//! ready to take over, so no early game event is lost.
//!
//! # Architecture
//!
//! - **Bootstrapper** - opens the socket, captures traffic, resolves on open or close
//! - **HandoffStore** - holds the active connection and its captured backlog
//! - **RoomSession** - consumer that replays the backlog and continues live
//! - **ApiClient** - HTTP auth and room listing
//!
//! # Modules
//!
//! - [`bootstrap`] - connection bootstrap
//! - [`handoff`] - buffered handoff store
//! - [`transport`] - socket abstraction, [`ws`] - WebSocket implementation
//! - [`room`] - room session consumer
//! - [`api`] - HTTP API client
//! - [`config`] - configuration loading/saving

pub mod api;
pub mod bootstrap;
pub mod handoff;
pub mod room;
pub mod transport;
pub mod ws;

pub mod config;
pub mod constants;
pub mod credentials;
pub mod endpoints;
pub mod env;

// Re-export commonly used types
pub use api::{ApiClient, ApiError, PublicGame};
pub use bootstrap::{BootstrapError, Bootstrapper};
pub use config::Config;
pub use endpoints::{Endpoints, GameSettings};
pub use handoff::{ConnectionEvent, GameConnection, Handoff, HandoffStore, LiveFeed};
pub use room::RoomSession;
pub use transport::{CloseInfo, Payload, Transport};
pub use ws::WsTransport;
