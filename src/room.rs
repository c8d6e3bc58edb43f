//! Room session: the consumer side of the handoff.
//!
//! Entering a room reads the published connection, replays whatever arrived
//! before the session existed, then continues with live traffic.

use std::collections::VecDeque;
use std::time::Duration;

use crate::handoff::{ConnectionEvent, GameConnection, HandoffStore, Inbound, LiveFeed};
use crate::transport::CloseInfo;

/// A taken-over room connection.
#[derive(Debug)]
pub struct RoomSession {
    store: HandoffStore,
    connection: GameConnection,
    replay: VecDeque<Inbound>,
    live: LiveFeed,
}

impl RoomSession {
    /// Take over the connection published in `store`.
    ///
    /// Returns `None` if nothing has been published.
    pub fn enter(store: &HandoffStore) -> Option<Self> {
        let handoff = store.consume()?;
        let connection = handoff.connection.clone();
        let (backlog, live) = handoff.take_over();
        log::info!(
            "[room] Entered connection {} with {} buffered message(s)",
            connection.id(),
            backlog.len()
        );
        Some(Self {
            store: store.clone(),
            connection,
            replay: backlog.into(),
            live,
        })
    }

    /// The underlying connection, for sending.
    pub fn connection(&self) -> &GameConnection {
        &self.connection
    }

    /// Buffered messages not yet returned by [`next_event`](Self::next_event).
    pub fn pending_replay(&self) -> usize {
        self.replay.len()
    }

    /// Next event: buffered messages first, then live traffic and the close.
    ///
    /// Nothing follows [`ConnectionEvent::Closed`]; stop reading there.
    /// Returns `None` if the connection was taken over by another feed.
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        if let Some(message) = self.replay.pop_front() {
            return Some(ConnectionEvent::Message(message));
        }
        self.live.recv().await
    }

    /// Leave the room: close the socket if still open and clear the store,
    /// unless a newer connection has been published since.
    ///
    /// Does not wait for the server to acknowledge the close; use
    /// [`close_and_leave`](Self::close_and_leave) for that.
    pub fn leave(self) {
        self.request_close();
        self.release();
    }

    /// Leave the room after the close handshake completes.
    ///
    /// Sends a close if the socket is still open, then waits up to `wait` for
    /// [`ConnectionEvent::Closed`]. Messages still in flight are dropped. The
    /// store is cleared either way. Returns the close the socket ended with,
    /// or `None` if it did not finish in time.
    pub async fn close_and_leave(mut self, wait: Duration) -> Option<CloseInfo> {
        if !self.connection.state().is_closed() {
            self.request_close();
            let live = &mut self.live;
            let confirmed = tokio::time::timeout(wait, async {
                while let Some(event) = live.recv().await {
                    if let ConnectionEvent::Closed(info) = event {
                        return Some(info);
                    }
                }
                None
            })
            .await;
            if confirmed.is_err() {
                log::warn!(
                    "[room] Connection {} did not confirm close within {wait:?}",
                    self.connection.id()
                );
            }
        }
        let close = self.connection.close_info();
        self.release();
        close
    }

    fn request_close(&self) {
        if !self.connection.state().is_closed() {
            if let Err(e) = self.connection.close() {
                log::debug!("[room] {e}");
            }
        }
    }

    fn release(&self) {
        if !self.store.clear_connection(self.connection.id()) {
            log::debug!(
                "[room] Connection {} already replaced in store",
                self.connection.id()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handoff::test_connection;
    use crate::transport::{CloseInfo, Payload, SocketCommand};

    #[test]
    fn test_enter_on_empty_store_returns_none() {
        assert!(RoomSession::enter(&HandoffStore::new()).is_none());
    }

    #[tokio::test]
    async fn test_replays_backlog_then_live_then_close() {
        let store = HandoffStore::new();
        let (conn, backlog, _rx) = test_connection("ws://test/room");
        backlog.mark_open();
        backlog.deliver(Payload::from("early-1"));
        backlog.deliver(Payload::from("early-2"));
        store.publish(conn, backlog.clone());

        let mut session = RoomSession::enter(&store).unwrap();
        assert_eq!(session.pending_replay(), 2);

        backlog.deliver(Payload::from("live-1"));
        backlog.finish(CloseInfo::new(4000, "game over"));

        let mut texts = Vec::new();
        let mut close = None;
        while let Some(event) = session.next_event().await {
            match event {
                ConnectionEvent::Message(m) => texts.push(m.payload.to_string()),
                ConnectionEvent::Closed(info) => {
                    close = Some(info);
                    break;
                }
            }
        }
        assert_eq!(texts, vec!["early-1", "early-2", "live-1"]);
        assert_eq!(close.unwrap().code, 4000);
        assert_eq!(session.pending_replay(), 0);
    }

    #[test]
    fn test_leave_closes_socket_and_clears_store() {
        let store = HandoffStore::new();
        let (conn, backlog, mut rx) = test_connection("ws://test/room");
        backlog.mark_open();
        store.publish(conn, backlog);

        let session = RoomSession::enter(&store).unwrap();
        session.leave();

        assert!(store.is_empty());
        assert!(matches!(rx.try_recv(), Ok(SocketCommand::Close)));
    }

    #[test]
    fn test_leave_after_close_does_not_send_close() {
        let store = HandoffStore::new();
        let (conn, backlog, mut rx) = test_connection("ws://test/room");
        backlog.mark_open();
        store.publish(conn, backlog.clone());
        let session = RoomSession::enter(&store).unwrap();

        backlog.finish(CloseInfo::new(1000, ""));
        session.leave();

        assert!(rx.try_recv().is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_leave_keeps_newer_connection() {
        let store = HandoffStore::new();
        let (old, old_backlog, _old_rx) = test_connection("ws://test/old");
        store.publish(old, old_backlog);
        let session = RoomSession::enter(&store).unwrap();

        let (new, new_backlog, _new_rx) = test_connection("ws://test/new");
        store.publish(new.clone(), new_backlog);
        session.leave();

        assert_eq!(store.active_id(), Some(new.id()));
    }

    #[tokio::test]
    async fn test_close_and_leave_waits_for_close_handshake() {
        let store = HandoffStore::new();
        let (conn, backlog, mut rx) = test_connection("ws://test/room");
        backlog.mark_open();
        store.publish(conn, backlog.clone());
        let session = RoomSession::enter(&store).unwrap();

        // Stand-in for the socket task: answer the close request.
        let socket = tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                if command == SocketCommand::Close {
                    backlog.deliver(Payload::from("in flight"));
                    backlog.finish(CloseInfo::new(1000, ""));
                }
            }
        });

        let close = session.close_and_leave(Duration::from_secs(5)).await;
        assert_eq!(close, Some(CloseInfo::new(1000, "")));
        assert!(store.is_empty());
        socket.abort();
    }

    #[tokio::test]
    async fn test_close_and_leave_gives_up_after_timeout() {
        let store = HandoffStore::new();
        let (conn, backlog, mut rx) = test_connection("ws://test/room");
        backlog.mark_open();
        store.publish(conn, backlog);
        let session = RoomSession::enter(&store).unwrap();

        let close = session.close_and_leave(Duration::from_millis(20)).await;
        assert_eq!(close, None);
        assert!(store.is_empty());
        assert_eq!(rx.try_recv().unwrap(), SocketCommand::Close);
    }

    #[tokio::test]
    async fn test_close_and_leave_on_closed_socket_returns_immediately() {
        let store = HandoffStore::new();
        let (conn, backlog, mut rx) = test_connection("ws://test/room");
        backlog.mark_open();
        store.publish(conn, backlog.clone());
        let session = RoomSession::enter(&store).unwrap();
        backlog.finish(CloseInfo::new(4000, "kicked"));

        let close = session.close_and_leave(Duration::from_secs(60)).await;
        assert_eq!(close, Some(CloseInfo::new(4000, "kicked")));
        assert!(rx.try_recv().is_err());
        assert!(store.is_empty());
    }
}
