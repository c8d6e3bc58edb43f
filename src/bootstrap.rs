//! Connection bootstrap.
//!
//! [`Bootstrapper::bootstrap`] opens a socket, buffers everything it receives,
//! and resolves once the socket is open (publishing the connection into the
//! [`HandoffStore`]) or closes first (failure).
//!
//! # Capture
//!
//! The socket's event receiver is moved into a pump task the moment the
//! socket exists, and that task appends every message to the connection's
//! backlog. Nothing can arrive unobserved between "socket accepts traffic"
//! and "a view is listening": the pump keeps capturing after the handoff
//! until the view calls [`GameConnection::attach`].
//!
//! # Resolution
//!
//! | first terminating event | outcome                         |
//! |-------------------------|---------------------------------|
//! | open                    | `Ok(())`, connection published  |
//! | close                   | `Err(BootstrapError::Closed)`   |
//! | error                   | none; the following close wins  |
//!
//! Anything after the first terminating event is ignored by the
//! bootstrapper; closes after open reach the consumer through its feed.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::handoff::{next_connection_id, Backlog, GameConnection, HandoffStore};
use crate::transport::{CloseInfo, SocketEvent, Transport};

/// Why a bootstrap failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapError {
    /// The socket could not be created at all.
    Transport(String),
    /// The socket closed before it ever opened.
    Closed(CloseInfo),
}

impl BootstrapError {
    /// Close code, if the failure was an early close.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::Closed(info) => Some(info.code),
            Self::Transport(_) => None,
        }
    }
}

impl std::fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "Could not open socket: {msg}"),
            Self::Closed(info) => write!(f, "Socket closed before opening: {info}"),
        }
    }
}

impl std::error::Error for BootstrapError {}

/// Resolution state of one bootstrap attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    /// Waiting for open or close.
    Connecting,
    /// Open was observed first.
    ResolvedOpen,
    /// Close was observed first.
    ResolvedClosed,
}

impl BootstrapState {
    /// Move out of `Connecting`. Returns `false` (and changes nothing) if
    /// already resolved or if `to` is not a resolved state.
    pub fn resolve(&mut self, to: Self) -> bool {
        if *self != Self::Connecting || to == Self::Connecting {
            return false;
        }
        *self = to;
        true
    }

    /// Returns `true` once an outcome has been decided.
    pub fn is_resolved(self) -> bool {
        self != Self::Connecting
    }
}

/// Opens room sockets and publishes them into a [`HandoffStore`].
#[derive(Clone)]
pub struct Bootstrapper {
    transport: Arc<dyn Transport>,
    store: HandoffStore,
}

impl std::fmt::Debug for Bootstrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bootstrapper")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl Bootstrapper {
    /// Bootstrapper over `transport`, publishing into `store`.
    pub fn new(transport: Arc<dyn Transport>, store: HandoffStore) -> Self {
        Self { transport, store }
    }

    /// The store connections are published into.
    pub fn store(&self) -> &HandoffStore {
        &self.store
    }

    /// Open a socket to `address` and wait until it opens or closes.
    ///
    /// On success the connection and its backlog are the active pair in the
    /// store. Dropping the returned future does not abort the open: if the
    /// socket opens later it is still published.
    pub async fn bootstrap(&self, address: &str) -> Result<(), BootstrapError> {
        let socket = self
            .transport
            .open(address)
            .map_err(|e| BootstrapError::Transport(format!("{e:#}")))?;

        let backlog = Backlog::new(next_connection_id());
        let connection = GameConnection::new(address, backlog.clone(), socket.commands);
        log::info!(
            "[bootstrap] Opening connection {} to {address}",
            connection.id()
        );

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let pump = Pump {
            connection,
            backlog,
            store: self.store.clone(),
            state: BootstrapState::Connecting,
            outcome: Some(outcome_tx),
        };
        drop(tokio::spawn(pump.run(socket.events)));

        outcome_rx.await.unwrap_or_else(|_| {
            Err(BootstrapError::Closed(CloseInfo::abnormal(
                "bootstrap task ended",
            )))
        })
    }
}

/// Per-socket event loop: captures messages and resolves the outcome once.
struct Pump {
    connection: GameConnection,
    backlog: Backlog,
    store: HandoffStore,
    state: BootstrapState,
    outcome: Option<oneshot::Sender<Result<(), BootstrapError>>>,
}

impl Pump {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<SocketEvent>) {
        while let Some(event) = events.recv().await {
            if !self.handle(event) {
                return;
            }
        }
        self.handle(SocketEvent::Closed(CloseInfo::abnormal(
            "transport event stream ended",
        )));
    }

    /// Apply one event. Returns `false` once the socket has terminated.
    fn handle(&mut self, event: SocketEvent) -> bool {
        let id = self.connection.id();
        match event {
            SocketEvent::Message(payload) => {
                self.backlog.deliver(payload);
                true
            }
            SocketEvent::Open => {
                if self.state.resolve(BootstrapState::ResolvedOpen) {
                    self.backlog.mark_open();
                    self.store
                        .publish(self.connection.clone(), self.backlog.clone());
                    log::info!(
                        "[bootstrap] Connection {id} open ({} buffered)",
                        self.backlog.len()
                    );
                    self.resolve(Ok(()));
                } else {
                    log::debug!("[bootstrap] Ignoring repeated open on connection {id}");
                }
                true
            }
            SocketEvent::Error(message) => {
                log::warn!("[bootstrap] Socket error on connection {id}: {message}");
                true
            }
            SocketEvent::Closed(info) => {
                log::info!("[bootstrap] Connection {id} closed: {info}");
                self.backlog.finish(info.clone());
                if self.state.resolve(BootstrapState::ResolvedClosed) {
                    self.resolve(Err(BootstrapError::Closed(info)));
                }
                false
            }
        }
    }

    fn resolve(&mut self, outcome: Result<(), BootstrapError>) {
        if let Some(tx) = self.outcome.take() {
            if tx.send(outcome).is_err() {
                log::debug!(
                    "[bootstrap] Caller stopped waiting for connection {}",
                    self.connection.id()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handoff::{ConnectionEvent, ConnectionState};
    use crate::transport::testing::ScriptedTransport;
    use crate::transport::{Payload, SocketCommand};

    fn setup() -> (Arc<ScriptedTransport>, HandoffStore, Bootstrapper) {
        let transport = Arc::new(ScriptedTransport::default());
        let store = HandoffStore::new();
        let bootstrapper =
            Bootstrapper::new(Arc::clone(&transport) as Arc<dyn Transport>, store.clone());
        (transport, store, bootstrapper)
    }

    /// Replay the handoff backlog then read live messages until `count` are
    /// collected.
    async fn collect_messages(store: &HandoffStore, count: usize) -> Vec<Payload> {
        let handoff = store.consume().expect("handoff should be published");
        let (backlog, mut live) = handoff.take_over();
        let mut seen: Vec<Payload> = backlog.into_iter().map(|m| m.payload).collect();
        while seen.len() < count {
            match live.recv().await {
                Some(ConnectionEvent::Message(m)) => seen.push(m.payload),
                other => panic!("expected message, got {other:?}"),
            }
        }
        seen
    }

    #[test]
    fn test_state_resolves_only_once() {
        let mut state = BootstrapState::Connecting;
        assert!(!state.resolve(BootstrapState::Connecting));
        assert!(state.resolve(BootstrapState::ResolvedOpen));
        assert!(!state.resolve(BootstrapState::ResolvedClosed));
        assert_eq!(state, BootstrapState::ResolvedOpen);
        assert!(state.is_resolved());
    }

    #[tokio::test]
    async fn test_messages_before_and_after_open_arrive_in_order() {
        let (transport, store, bootstrapper) = setup();
        let peer = transport.push_socket();
        for t in ["m1", "m2", "m3"] {
            peer.text(t);
        }
        peer.open();
        peer.text("m4");
        peer.text("m5");

        bootstrapper.bootstrap("ws://game/join/abc").await.unwrap();

        let seen = collect_messages(&store, 5).await;
        let expected: Vec<Payload> = ["m1", "m2", "m3", "m4", "m5"]
            .into_iter()
            .map(Payload::from)
            .collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_close_before_open_fails_with_code_and_leaves_store_empty() {
        let (transport, store, bootstrapper) = setup();
        let peer = transport.push_socket();
        peer.close(4004, "room-not-found");

        let err = bootstrapper
            .bootstrap("ws://game/join/missing")
            .await
            .unwrap_err();

        assert_eq!(err.close_code(), Some(4004));
        assert_eq!(
            err,
            BootstrapError::Closed(CloseInfo::new(4004, "room-not-found"))
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_error_then_close_resolves_once_with_close() {
        let (transport, store, bootstrapper) = setup();
        let peer = transport.push_socket();
        peer.error("connection refused");
        peer.close(1006, "");
        peer.close(4000, "late");

        let err = bootstrapper.bootstrap("ws://game/create").await.unwrap_err();
        assert_eq!(err.close_code(), Some(1006));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_close_after_open_does_not_change_outcome() {
        let (transport, store, bootstrapper) = setup();
        let peer = transport.push_socket();
        peer.open();
        peer.text("hello");
        peer.close(1000, "");
        peer.close(4000, "ignored");

        bootstrapper.bootstrap("ws://game/join/abc").await.unwrap();

        let (backlog, mut live) = store.consume().unwrap().take_over();
        let mut events: Vec<ConnectionEvent> = backlog
            .into_iter()
            .map(ConnectionEvent::Message)
            .collect();
        while let Some(event) = live.recv().await {
            let closed = matches!(event, ConnectionEvent::Closed(_));
            events.push(event);
            if closed {
                break;
            }
        }

        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            ConnectionEvent::Closed(CloseInfo::new(1000, ""))
        );
        let handoff = store.consume().unwrap();
        assert_eq!(handoff.connection.state(), ConnectionState::ClosedClean);
    }

    #[tokio::test]
    async fn test_event_stream_ending_without_close_fails_abnormally() {
        let (transport, store, bootstrapper) = setup();
        let peer = transport.push_socket();
        drop(peer);

        let err = bootstrapper.bootstrap("ws://game/create").await.unwrap_err();
        assert_eq!(err.close_code(), Some(1006));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_is_reported() {
        let (_transport, store, bootstrapper) = setup();
        // No socket queued: the scripted transport refuses to open.
        let err = bootstrapper.bootstrap("ws://game/create").await.unwrap_err();
        assert!(matches!(err, BootstrapError::Transport(_)));
        assert_eq!(err.close_code(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_last_bootstrap_wins() {
        let (transport, store, bootstrapper) = setup();
        let peer_a = transport.push_socket();
        peer_a.text("a1");
        peer_a.text("a2");
        peer_a.open();
        bootstrapper.bootstrap("ws://game/join/a").await.unwrap();
        let first_id = store.active_id().unwrap();

        let peer_b = transport.push_socket();
        peer_b.text("b1");
        peer_b.open();
        bootstrapper.bootstrap("ws://game/join/b").await.unwrap();

        let handoff = store.consume().unwrap();
        assert_ne!(handoff.connection.id(), first_id);
        assert_eq!(handoff.connection.address(), "ws://game/join/b");
        let payloads: Vec<Payload> = handoff
            .backlog
            .iter()
            .map(|m| m.payload.clone())
            .collect();
        assert_eq!(payloads, vec![Payload::from("b1")]);
        assert_eq!(
            *transport.addresses.lock().unwrap(),
            vec!["ws://game/join/a".to_string(), "ws://game/join/b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_superseded_connection_is_closed_and_buffers_nothing() {
        let (transport, store, bootstrapper) = setup();
        let mut peer_a = transport.push_socket();
        peer_a.open();
        bootstrapper.bootstrap("ws://game/join/a").await.unwrap();
        let conn_a = store.consume().unwrap().connection;

        let peer_b = transport.push_socket();
        peer_b.open();
        bootstrapper.bootstrap("ws://game/join/b").await.unwrap();
        assert_eq!(peer_a.commands.recv().await, Some(SocketCommand::Close));

        // The server keeps talking on the old socket until it sees the close.
        for i in 0..1000 {
            peer_a.text(&format!("stale-{i}"));
        }
        peer_a.close(1000, "");
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !conn_a.state().is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let mut live = conn_a.attach(None);
        assert_eq!(
            live.try_recv(),
            Some(ConnectionEvent::Closed(CloseInfo::new(1000, "")))
        );
        assert!(live.try_recv().is_none());
        assert_eq!(store.consume().unwrap().connection.address(), "ws://game/join/b");
    }

    #[tokio::test]
    async fn test_connection_commands_reach_socket() {
        let (transport, store, bootstrapper) = setup();
        let mut peer = transport.push_socket();
        peer.open();
        bootstrapper.bootstrap("ws://game/join/abc").await.unwrap();

        let handoff = store.consume().unwrap();
        handoff.connection.send_text("guess:apple").unwrap();
        handoff.connection.close().unwrap();

        assert_eq!(
            peer.commands.recv().await,
            Some(SocketCommand::Send(Payload::from("guess:apple")))
        );
        assert_eq!(peer.commands.recv().await, Some(SocketCommand::Close));
    }
}
