//! Shared WebSocket transport.
//!
//! Thin wrapper around `tokio-tungstenite` providing type-isolated
//! reader/writer halves, plus [`WsTransport`], the production
//! [`Transport`] used by the bootstrapper. All WebSocket consumers in the
//! crate should use this module rather than `tokio-tungstenite` directly.
//!
//! # Architecture
//!
//! [`build_request`] handles URL→request building and header insertion.
//! [`WsTransport`] spawns one task per socket that performs the handshake,
//! splits the stream into ([`WsWriter`], [`WsReader`]) halves, and translates
//! frames into [`SocketEvent`]s and [`SocketCommand`]s into frames.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::handshake::client::Request;

use crate::constants::{CLOSE_FLUSH_TIMEOUT, CLOSE_NO_STATUS};
use crate::transport::{CloseInfo, Payload, Socket, SocketCommand, SocketEvent, Transport};

/// Concrete WebSocket stream type (avoids repeating the generic everywhere).
type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Received WebSocket message.
#[derive(Debug)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping frame with payload.
    Ping(Vec<u8>),
    /// Pong frame with payload.
    Pong(Vec<u8>),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    /// Send a UTF-8 text frame.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Text(text.to_string()))
            .await
            .context("WebSocket send_text failed")
    }

    /// Send a binary frame.
    pub async fn send_binary(&mut self, data: Vec<u8>) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Binary(data))
            .await
            .context("WebSocket send_binary failed")
    }

    /// Send a payload as a text or binary frame.
    pub async fn send_payload(&mut self, payload: Payload) -> Result<()> {
        match payload {
            Payload::Text(text) => self.send_text(&text).await,
            Payload::Binary(data) => self.send_binary(data).await,
        }
    }

    /// Send a close frame.
    pub async fn send_close(&mut self) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Close(None))
            .await
            .context("WebSocket send_close failed")
    }

    /// Write out frames tungstenite queued on its own, such as the reply to
    /// a close frame from the peer.
    pub async fn flush(&mut self) -> Result<()> {
        self.sink.flush().await.context("WebSocket flush failed")
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WsReader {
    /// Receive the next message, returning `None` when the stream ends.
    ///
    /// Raw `Frame` variants are skipped internally.
    pub async fn recv(&mut self) -> Option<Result<WsMessage>> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Some(Ok(WsMessage::Text(text)));
                }
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    return Some(Ok(WsMessage::Binary(data)));
                }
                Some(Ok(tungstenite::Message::Ping(data))) => {
                    return Some(Ok(WsMessage::Ping(data)));
                }
                Some(Ok(tungstenite::Message::Pong(data))) => {
                    return Some(Ok(WsMessage::Pong(data)));
                }
                Some(Ok(tungstenite::Message::Close(close_frame))) => {
                    let (code, reason) = close_frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((CLOSE_NO_STATUS, String::new()));
                    return Some(Ok(WsMessage::Close { code, reason }));
                }
                Some(Ok(tungstenite::Message::Frame(_))) => {
                    continue;
                }
                Some(Err(e)) => {
                    return Some(Err(anyhow::anyhow!("WebSocket read error: {e}")));
                }
                None => return None,
            }
        }
    }
}

/// Build a client handshake request from `url`, inserting each header.
pub fn build_request(url: &str, headers: &[(&str, &str)]) -> Result<Request> {
    use tungstenite::client::IntoClientRequest;

    let mut request = url
        .into_client_request()
        .with_context(|| format!("invalid WebSocket URL: {url}"))?;

    for &(name, value) in headers {
        let header_name = tungstenite::http::HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name: {name}"))?;
        let header_value = tungstenite::http::HeaderValue::from_str(value)
            .with_context(|| format!("invalid header value for {name}"))?;
        request.headers_mut().insert(header_name, header_value);
    }

    Ok(request)
}

fn split(ws_stream: WsStream) -> (WsWriter, WsReader) {
    let (sink, stream) = ws_stream.split();
    (WsWriter { sink }, WsReader { stream })
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else {
        url.replace("https://", "wss://")
            .replace("http://", "ws://")
    }
}

/// Describe a failed handshake as the close a browser would report.
///
/// Browsers surface a refused upgrade (HTTP 4xx/5xx, unreachable host) as a
/// 1006 close; the HTTP status and body are kept in the reason.
fn handshake_failure(err: &tungstenite::Error) -> CloseInfo {
    match err {
        tungstenite::Error::Http(response) => {
            let body = response
                .body()
                .as_deref()
                .and_then(|b| std::str::from_utf8(b).ok())
                .map(str::trim)
                .unwrap_or_default();
            if body.is_empty() {
                CloseInfo::abnormal(format!("HTTP {}", response.status().as_u16()))
            } else {
                CloseInfo::abnormal(format!("HTTP {}: {body}", response.status().as_u16()))
            }
        }
        other => CloseInfo::abnormal(other.to_string()),
    }
}

/// Production [`Transport`] over `tokio-tungstenite`.
///
/// Every socket gets the same handshake headers (typically the session
/// cookie the game server authenticates upgrades with).
#[derive(Debug, Clone, Default)]
pub struct WsTransport {
    headers: Vec<(String, String)>,
}

impl WsTransport {
    /// Transport without extra handshake headers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handshake header sent with every socket.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

impl Transport for WsTransport {
    fn open(&self, address: &str) -> Result<Socket> {
        let header_refs: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let request = build_request(address, &header_refs)?;
        let runtime = tokio::runtime::Handle::try_current()
            .context("WebSocket transport requires a tokio runtime")?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let label = address.to_string();
        drop(runtime.spawn(run_socket(label, request, event_tx, command_rx)));

        Ok(Socket {
            events: event_rx,
            commands: command_tx,
        })
    }
}

/// Drive one WebSocket: handshake, then pump frames and commands until close.
async fn run_socket(
    address: String,
    request: Request,
    events: mpsc::UnboundedSender<SocketEvent>,
    mut commands: mpsc::UnboundedReceiver<SocketCommand>,
) {
    let emit = |event: SocketEvent| {
        if let Err(mpsc::error::SendError(event)) = events.send(event) {
            log::debug!("[ws] Event listener for {address} gone, dropping {event:?}");
        }
    };

    let (mut writer, mut reader) = match tokio_tungstenite::connect_async(request).await {
        Ok((stream, _response)) => split(stream),
        Err(e) => {
            log::debug!("[ws] Handshake with {address} failed: {e}");
            emit(SocketEvent::Error(e.to_string()));
            emit(SocketEvent::Closed(handshake_failure(&e)));
            return;
        }
    };

    log::debug!("[ws] Connected to {address}");
    emit(SocketEvent::Open);

    let mut closing = false;
    loop {
        tokio::select! {
            frame = reader.recv() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        emit(SocketEvent::Message(Payload::Text(text)));
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        emit(SocketEvent::Message(Payload::Binary(data)));
                    }
                    Some(Ok(WsMessage::Close { code, reason })) => {
                        if !closing {
                            // tungstenite queues the close reply until the next write.
                            let flushed = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, writer.flush());
                            match flushed.await {
                                Ok(Ok(())) => {}
                                Ok(Err(e)) => log::debug!("[ws] Close reply to {address}: {e:#}"),
                                Err(_) => log::debug!("[ws] Close reply to {address} timed out"),
                            }
                        }
                        emit(SocketEvent::Closed(CloseInfo::new(code, reason)));
                        return;
                    }
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {
                        // Pings are auto-replied by tungstenite; ignore pongs
                    }
                    Some(Err(e)) => {
                        emit(SocketEvent::Error(e.to_string()));
                        emit(SocketEvent::Closed(CloseInfo::abnormal(e.to_string())));
                        return;
                    }
                    None => {
                        emit(SocketEvent::Closed(CloseInfo::abnormal("stream ended")));
                        return;
                    }
                }
            }
            command = commands.recv(), if !closing => {
                match command {
                    Some(SocketCommand::Send(payload)) => {
                        if let Err(e) = writer.send_payload(payload).await {
                            emit(SocketEvent::Error(format!("{e:#}")));
                        }
                    }
                    Some(SocketCommand::Close) | None => {
                        // Keep reading until the peer echoes the close frame.
                        closing = true;
                        if let Err(e) = writer.send_close().await {
                            log::debug!("[ws] Close to {address} failed: {e:#}");
                        }
                    }
                }
            }
        }
    }
}
