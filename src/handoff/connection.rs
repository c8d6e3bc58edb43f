//! Connection handle, backlog, and live feed.
//!
//! Every bootstrapped socket owns one inbox. Until a consumer takes over, the
//! inbox captures inbound messages into a backlog; [`GameConnection::attach`]
//! atomically switches it to forwarding into a [`LiveFeed`]. Both the capture
//! path and the switch run under the same lock, so each message lands in
//! exactly one of the two.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use tokio::sync::mpsc;

use crate::transport::{CloseInfo, Payload, SocketCommand};

/// Identifier of one bootstrapped connection, unique within the process.
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket created, open not yet observed.
    Connecting,
    /// Socket open.
    Open,
    /// Closed with a normal (1000) close.
    ClosedClean,
    /// Closed with any other code, or without a close frame.
    ClosedError,
}

impl ConnectionState {
    /// Returns `true` once the socket has terminated.
    #[must_use]
    pub fn is_closed(self) -> bool {
        matches!(self, Self::ClosedClean | Self::ClosedError)
    }
}

/// An inbound message tagged with its arrival position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// Zero-based arrival index on this connection.
    pub seq: u64,
    /// The raw payload.
    pub payload: Payload,
}

/// What a consumer observes after taking over a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// An inbound message.
    Message(Inbound),
    /// The socket terminated. Always the last event.
    Closed(CloseInfo),
}

/// Where inbound messages currently go.
#[derive(Debug)]
enum Route {
    Capture(Vec<Inbound>),
    Live(mpsc::UnboundedSender<ConnectionEvent>),
    /// Superseded before anyone took over; inbound messages are dropped.
    Discard,
}

#[derive(Debug)]
struct InboxState {
    connection_id: ConnectionId,
    state: ConnectionState,
    next_seq: u64,
    route: Route,
    closed: Option<CloseInfo>,
}

/// The message backlog of one connection.
///
/// Cloning shares the same buffer. The backlog keeps growing until a
/// consumer attaches to the connection or a newer connection replaces it;
/// after that it is empty for good.
#[derive(Debug, Clone)]
pub struct Backlog {
    inner: Arc<Mutex<InboxState>>,
}

impl Backlog {
    pub(crate) fn new(connection_id: ConnectionId) -> Self {
        Self {
            inner: Arc::new(Mutex::new(InboxState {
                connection_id,
                state: ConnectionState::Connecting,
                next_seq: 0,
                route: Route::Capture(Vec::new()),
                closed: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, InboxState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connection this backlog belongs to.
    pub fn connection_id(&self) -> ConnectionId {
        self.lock().connection_id
    }

    /// Copy of the messages captured so far, in arrival order.
    pub fn snapshot(&self) -> Vec<Inbound> {
        match &self.lock().route {
            Route::Capture(buffer) => buffer.clone(),
            Route::Live(_) | Route::Discard => Vec::new(),
        }
    }

    /// Number of captured messages not yet handed to a consumer.
    pub fn len(&self) -> usize {
        match &self.lock().route {
            Route::Capture(buffer) => buffer.len(),
            Route::Live(_) | Route::Discard => 0,
        }
    }

    /// Returns `true` if nothing is waiting in the backlog.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record an inbound payload: buffer it, or forward it to the live feed.
    pub(crate) fn deliver(&self, payload: Payload) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let message = Inbound { seq, payload };
        match &mut inner.route {
            Route::Capture(buffer) => {
                log::debug!(
                    "[handoff] Buffering message {seq} on connection {}",
                    inner.connection_id
                );
                buffer.push(message);
            }
            Route::Live(tx) => {
                forward(tx, ConnectionEvent::Message(message), inner.connection_id);
            }
            Route::Discard => {
                log::trace!(
                    "[handoff] Dropping message {seq} on superseded connection {}",
                    inner.connection_id
                );
            }
        }
    }

    pub(crate) fn mark_open(&self) {
        self.lock().state = ConnectionState::Open;
    }

    /// Record termination and notify the live feed, if any.
    pub(crate) fn finish(&self, close: CloseInfo) {
        let mut inner = self.lock();
        if inner.state.is_closed() {
            return;
        }
        inner.state = if close.is_clean() {
            ConnectionState::ClosedClean
        } else {
            ConnectionState::ClosedError
        };
        if let Route::Live(tx) = &inner.route {
            forward(tx, ConnectionEvent::Closed(close.clone()), inner.connection_id);
        }
        inner.closed = Some(close);
    }

    /// Drop everything captured so far and stop capturing.
    ///
    /// Returns the number of dropped messages, or `None` if the connection was
    /// not capturing (a consumer already took it over, or it was discarded
    /// before).
    pub(crate) fn discard(&self) -> Option<usize> {
        let mut inner = self.lock();
        match &inner.route {
            Route::Capture(buffer) => {
                let dropped = buffer.len();
                inner.route = Route::Discard;
                Some(dropped)
            }
            Route::Live(_) | Route::Discard => None,
        }
    }

    fn attach(&self, after: Option<u64>) -> LiveFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        match std::mem::replace(&mut inner.route, Route::Live(tx.clone())) {
            Route::Capture(buffer) => {
                for message in buffer {
                    if after.map_or(true, |last| message.seq > last) {
                        forward(&tx, ConnectionEvent::Message(message), inner.connection_id);
                    }
                }
            }
            Route::Live(_) => {
                log::warn!(
                    "[handoff] Replacing live listener on connection {}",
                    inner.connection_id
                );
            }
            Route::Discard => {
                log::debug!(
                    "[handoff] Attaching to superseded connection {}; backlog was discarded",
                    inner.connection_id
                );
            }
        }
        if let Some(close) = &inner.closed {
            forward(&tx, ConnectionEvent::Closed(close.clone()), inner.connection_id);
        }
        LiveFeed { rx }
    }
}

fn forward(
    tx: &mpsc::UnboundedSender<ConnectionEvent>,
    event: ConnectionEvent,
    connection_id: ConnectionId,
) {
    if let Err(mpsc::error::SendError(event)) = tx.send(event) {
        log::debug!(
            "[handoff] Live feed of connection {connection_id} dropped, discarding {event:?}"
        );
    }
}

/// Handle to one realtime connection. Cheap to clone.
#[derive(Debug, Clone)]
pub struct GameConnection {
    id: ConnectionId,
    address: Arc<str>,
    inbox: Backlog,
    commands: mpsc::UnboundedSender<SocketCommand>,
}

impl GameConnection {
    pub(crate) fn new(
        address: &str,
        inbox: Backlog,
        commands: mpsc::UnboundedSender<SocketCommand>,
    ) -> Self {
        Self {
            id: inbox.connection_id(),
            address: Arc::from(address),
            inbox,
            commands,
        }
    }

    /// Process-unique connection identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Address the socket was opened to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inbox.lock().state
    }

    /// Close code and reason, once the socket has terminated.
    pub fn close_info(&self) -> Option<CloseInfo> {
        self.inbox.lock().closed.clone()
    }

    /// Send a text frame.
    pub fn send_text(&self, text: &str) -> Result<()> {
        self.send(Payload::Text(text.to_string()))
    }

    /// Send a binary frame.
    pub fn send_binary(&self, data: Vec<u8>) -> Result<()> {
        self.send(Payload::Binary(data))
    }

    fn send(&self, payload: Payload) -> Result<()> {
        self.commands
            .send(SocketCommand::Send(payload))
            .map_err(|e| anyhow::anyhow!("connection {} has shut down: {e}", self.id))
    }

    /// Ask the socket to close. The close itself arrives as
    /// [`ConnectionEvent::Closed`] on the live feed.
    pub fn close(&self) -> Result<()> {
        self.commands
            .send(SocketCommand::Close)
            .map_err(|e| anyhow::anyhow!("connection {} has shut down: {e}", self.id))
    }

    /// Replace the capture listener with a live feed.
    ///
    /// `after` is the sequence number of the last backlog message the caller
    /// already replayed (`None` if it replayed nothing). Captured messages
    /// newer than that are delivered first on the returned feed, followed by
    /// live traffic, then the close. Attaching again replaces the previous
    /// feed, which then ends.
    pub fn attach(&self, after: Option<u64>) -> LiveFeed {
        self.inbox.attach(after)
    }
}

/// Live message stream of a taken-over connection.
#[derive(Debug)]
pub struct LiveFeed {
    rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl LiveFeed {
    /// Next event, or `None` once the connection is gone and drained.
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.rx.recv().await
    }

    /// Next event if one is ready.
    pub fn try_recv(&mut self) -> Option<ConnectionEvent> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
pub(crate) fn test_connection(
    address: &str,
) -> (GameConnection, Backlog, mpsc::UnboundedReceiver<SocketCommand>) {
    let backlog = Backlog::new(next_connection_id());
    let (tx, rx) = mpsc::unbounded_channel();
    (GameConnection::new(address, backlog.clone(), tx), backlog, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(message: &ConnectionEvent) -> &str {
        match message {
            ConnectionEvent::Message(Inbound {
                payload: Payload::Text(t),
                ..
            }) => t,
            other => panic!("expected text message, got {other:?}"),
        }
    }

    #[test]
    fn test_deliver_assigns_arrival_sequence() {
        let (_conn, backlog, _rx) = test_connection("ws://test/a");
        backlog.deliver(Payload::from("a"));
        backlog.deliver(Payload::from("b"));

        let snapshot = backlog.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].seq, 0);
        assert_eq!(snapshot[1].seq, 1);
        assert_eq!(snapshot[1].payload, Payload::from("b"));
    }

    #[test]
    fn test_attach_skips_replayed_messages() {
        let (conn, backlog, _rx) = test_connection("ws://test/a");
        for t in ["m0", "m1", "m2"] {
            backlog.deliver(Payload::from(t));
        }

        let mut feed = conn.attach(Some(1));
        assert_eq!(text(&feed.try_recv().unwrap()), "m2");
        assert!(feed.try_recv().is_none());
        assert!(backlog.is_empty(), "backlog is drained by the takeover");
    }

    #[test]
    fn test_attach_without_replay_forwards_everything_then_live() {
        let (conn, backlog, _rx) = test_connection("ws://test/a");
        backlog.deliver(Payload::from("early"));

        let mut feed = conn.attach(None);
        backlog.deliver(Payload::from("late"));

        assert_eq!(text(&feed.try_recv().unwrap()), "early");
        assert_eq!(text(&feed.try_recv().unwrap()), "late");
    }

    #[test]
    fn test_close_while_capturing_is_delivered_after_backlog() {
        let (conn, backlog, _rx) = test_connection("ws://test/a");
        backlog.mark_open();
        backlog.deliver(Payload::from("last words"));
        backlog.finish(CloseInfo::new(4000, "kicked"));

        assert_eq!(conn.state(), ConnectionState::ClosedError);
        let mut feed = conn.attach(None);
        assert_eq!(text(&feed.try_recv().unwrap()), "last words");
        assert_eq!(
            feed.try_recv(),
            Some(ConnectionEvent::Closed(CloseInfo::new(4000, "kicked")))
        );
    }

    #[test]
    fn test_finish_only_records_first_close() {
        let (conn, backlog, _rx) = test_connection("ws://test/a");
        backlog.finish(CloseInfo::new(1000, ""));
        backlog.finish(CloseInfo::new(4000, "late"));

        assert_eq!(conn.state(), ConnectionState::ClosedClean);
        assert_eq!(conn.close_info(), Some(CloseInfo::new(1000, "")));
    }

    #[test]
    fn test_reattach_ends_previous_feed() {
        let (conn, backlog, _rx) = test_connection("ws://test/a");
        let mut first = conn.attach(None);
        let mut second = conn.attach(None);
        backlog.deliver(Payload::from("x"));

        assert!(first.try_recv().is_none());
        assert_eq!(text(&second.try_recv().unwrap()), "x");
    }

    #[test]
    fn test_discarded_backlog_stops_buffering() {
        let (conn, backlog, _rx) = test_connection("ws://test/a");
        backlog.deliver(Payload::from("before"));

        assert_eq!(backlog.discard(), Some(1));
        for i in 0..100 {
            backlog.deliver(Payload::Text(format!("after-{i}")));
        }
        assert!(backlog.is_empty());
        assert!(backlog.snapshot().is_empty());
        assert_eq!(backlog.discard(), None);

        backlog.finish(CloseInfo::new(1000, ""));
        let mut feed = conn.attach(None);
        assert_eq!(
            feed.try_recv(),
            Some(ConnectionEvent::Closed(CloseInfo::new(1000, "")))
        );
        assert!(feed.try_recv().is_none());
    }

    #[test]
    fn test_discard_after_takeover_is_a_no_op() {
        let (conn, backlog, _rx) = test_connection("ws://test/a");
        let mut feed = conn.attach(None);

        assert_eq!(backlog.discard(), None);
        backlog.deliver(Payload::from("still live"));
        assert_eq!(text(&feed.try_recv().unwrap()), "still live");
    }

    #[test]
    fn test_finish_after_feed_dropped_still_records_close() {
        let (conn, backlog, _rx) = test_connection("ws://test/a");
        drop(conn.attach(None));

        backlog.deliver(Payload::from("nobody listening"));
        backlog.finish(CloseInfo::new(4000, "kicked"));
        assert_eq!(conn.state(), ConnectionState::ClosedError);
        assert_eq!(conn.close_info(), Some(CloseInfo::new(4000, "kicked")));
    }

    #[test]
    fn test_send_and_close_forward_commands() {
        let (conn, _backlog, mut rx) = test_connection("ws://test/a");
        conn.send_text("hi").unwrap();
        conn.close().unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            SocketCommand::Send(Payload::from("hi"))
        );
        assert_eq!(rx.try_recv().unwrap(), SocketCommand::Close);
    }

    #[test]
    fn test_send_after_transport_gone_errors() {
        let (conn, _backlog, rx) = test_connection("ws://test/a");
        drop(rx);
        assert!(conn.send_text("hi").is_err());
        assert!(conn.close().is_err());
    }
}
