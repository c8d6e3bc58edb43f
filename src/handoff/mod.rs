//! Buffered handoff of the active room connection.
//!
//! The bootstrapper publishes a freshly opened connection together with the
//! messages captured before anyone was listening; a consumer (a room view)
//! later picks both up and takes over.
//!
//! # Lifecycle
//!
//! ```text
//! bootstrap ──publish──▶ HandoffStore ──consume──▶ Handoff ──take_over──▶ (backlog, LiveFeed)
//!                              ▲
//!                              └── clear() on leave / logout
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let store = HandoffStore::new();
//! let bootstrapper = Bootstrapper::new(Arc::new(WsTransport::new()), store.clone());
//! bootstrapper.bootstrap(&endpoints.join_room("abc")?).await?;
//!
//! if let Some(handoff) = store.consume() {
//!     let (backlog, mut live) = handoff.take_over();
//!     for message in backlog { render(message); }
//!     while let Some(event) = live.recv().await { render_event(event); }
//! }
//! store.clear();
//! ```
//!
//! Only one connection is active at a time: publishing replaces the previous
//! connection (last bootstrap wins). A replaced connection that nobody took
//! over is closed and stops buffering.

mod connection;

pub use connection::{
    Backlog, ConnectionEvent, ConnectionId, ConnectionState, GameConnection, Inbound, LiveFeed,
};

pub(crate) use connection::next_connection_id;
#[cfg(test)]
pub(crate) use connection::test_connection;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// The published pair. Always written and read as a unit.
#[derive(Debug)]
struct Active {
    connection: GameConnection,
    backlog: Backlog,
}

/// Holder of the currently active connection and its backlog.
///
/// Cloning shares the same store; construct one per application (or per
/// test) and pass it to the bootstrapper and consumers.
#[derive(Debug, Clone, Default)]
pub struct HandoffStore {
    active: Arc<Mutex<Option<Active>>>,
}

impl HandoffStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Active>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the active connection and backlog in one step.
    ///
    /// The previous connection's captured messages are discarded, not merged.
    /// If no consumer took the previous connection over, its socket is closed
    /// and anything it still receives is dropped. A connection a consumer
    /// already owns is left to that consumer.
    pub fn publish(&self, connection: GameConnection, backlog: Backlog) {
        let mut active = self.lock();
        if let Some(previous) = active.take().filter(|p| p.connection.id() != connection.id()) {
            if let Some(dropped) = previous.backlog.discard() {
                log::info!(
                    "[handoff] Connection {} replaced {}; discarded {dropped} unconsumed message(s)",
                    connection.id(),
                    previous.connection.id()
                );
                if let Err(e) = previous.connection.close() {
                    log::debug!("[handoff] {e}");
                }
            }
        }
        log::debug!(
            "[handoff] Published connection {} ({} buffered)",
            connection.id(),
            backlog.len()
        );
        *active = Some(Active { connection, backlog });
    }

    /// Read the active connection and a snapshot of its backlog.
    ///
    /// Does not clear the store. Returns `None` when nothing is published.
    pub fn consume(&self) -> Option<Handoff> {
        let active = self.lock();
        active.as_ref().map(|a| Handoff {
            connection: a.connection.clone(),
            backlog: a.backlog.snapshot(),
        })
    }

    /// Forget the active connection and its backlog. Idempotent.
    ///
    /// Does not close the socket.
    pub fn clear(&self) {
        if let Some(previous) = self.lock().take() {
            log::debug!("[handoff] Cleared connection {}", previous.connection.id());
        }
    }

    /// Clear the store only if `id` is still the active connection.
    ///
    /// Returns `true` if the store was cleared. Lets a consumer tear down
    /// its own connection without wiping a newer one.
    pub fn clear_connection(&self, id: ConnectionId) -> bool {
        let mut active = self.lock();
        if active.as_ref().is_some_and(|a| a.connection.id() == id) {
            *active = None;
            log::debug!("[handoff] Cleared connection {id}");
            true
        } else {
            false
        }
    }

    /// Identifier of the active connection, if any.
    pub fn active_id(&self) -> Option<ConnectionId> {
        self.lock().as_ref().map(|a| a.connection.id())
    }

    /// Returns `true` if no connection is published.
    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }
}

/// A connection and the backlog captured for it, as read from the store.
#[derive(Debug, Clone)]
pub struct Handoff {
    /// The active connection.
    pub connection: GameConnection,
    /// Messages captured before the read, in arrival order.
    pub backlog: Vec<Inbound>,
}

impl Handoff {
    /// Sequence number of the newest message in the snapshot.
    pub fn last_seq(&self) -> Option<u64> {
        self.backlog.last().map(|m| m.seq)
    }

    /// Commit the handoff: returns the backlog to replay and a live feed that
    /// continues exactly where the backlog ends.
    pub fn take_over(self) -> (Vec<Inbound>, LiveFeed) {
        let live = self.connection.attach(self.last_seq());
        (self.backlog, live)
    }
}
