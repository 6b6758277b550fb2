//! Duplex WebSocket transport with candidate failover and reconnection.
//!
//! The bridge owns exactly one connection at a time. `connect` walks the
//! candidate endpoint list strictly in order; an unsolicited close triggers a
//! reconnect cycle with linear backoff, a deliberate `shutdown` is terminal.

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::wire::{ClientMessage, ServerMessage};

/// Connection state, owned exclusively by the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting { endpoint: String, attempt: usize },
    Connected { endpoint: String },
    Error { reason: String },
}

/// Send-path failures. These are reported to the caller, never thrown.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("all candidate endpoints failed: {reason}")]
    AllCandidatesExhausted { reason: String },
    #[error("failed to encode outbound message: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type StateCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;
pub type MessageCallback = Arc<dyn Fn(ClientMessage) + Send + Sync>;

/// Manager for the realtime duplex connection.
///
/// All fields are shared behind `Arc`, so a `clone()` hands background tasks
/// a handle onto the same bridge.
#[derive(Clone)]
pub struct TransportBridge {
    candidates: Arc<Vec<String>>,
    state: Arc<RwLock<ConnectionState>>,
    state_callbacks: Arc<RwLock<Vec<StateCallback>>>,
    message_callbacks: Arc<RwLock<Vec<MessageCallback>>>,
    outbound_tx: Arc<RwLock<Option<mpsc::UnboundedSender<Message>>>>,
    // Serializes connect cycles: candidates are never raced against each other
    connect_gate: Arc<tokio::sync::Mutex<()>>,
    reconnect_count: Arc<Mutex<usize>>,
    shutdown_flag: Arc<Mutex<bool>>,
}

impl TransportBridge {
    /// Create a bridge over an ordered list of candidate endpoints.
    pub fn new(candidates: Vec<String>) -> Self {
        Self {
            candidates: Arc::new(candidates),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            state_callbacks: Arc::new(RwLock::new(Vec::new())),
            message_callbacks: Arc::new(RwLock::new(Vec::new())),
            outbound_tx: Arc::new(RwLock::new(None)),
            connect_gate: Arc::new(tokio::sync::Mutex::new(())),
            reconnect_count: Arc::new(Mutex::new(0)),
            shutdown_flag: Arc::new(Mutex::new(false)),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.read().clone()
    }

    /// The ordered candidate list this bridge was built with.
    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Subscribe to connection-state changes.
    pub fn on_state_change(&self, callback: StateCallback) {
        self.state_callbacks.write().push(callback);
    }

    /// Subscribe to inbound messages. Delivery is in arrival order for the
    /// lifetime of the bridge.
    pub fn on_message(&self, callback: MessageCallback) {
        self.message_callbacks.write().push(callback);
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state.clone();
        for callback in self.state_callbacks.read().iter() {
            callback(state.clone());
        }
    }

    fn emit_message(&self, message: ClientMessage) {
        for callback in self.message_callbacks.read().iter() {
            callback(message.clone());
        }
    }

    /// Attempt each candidate endpoint strictly in order, waiting for each
    /// to open or fail before trying the next. On success the bridge is
    /// `Connected` to that endpoint; when every candidate fails it enters
    /// `Error` carrying the last failure.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let _gate = self.connect_gate.lock().await;

        if matches!(self.state(), ConnectionState::Connected { .. }) {
            return Ok(());
        }
        if *self.shutdown_flag.lock() {
            return Err(TransportError::NotConnected);
        }

        let mut last_failure = "no candidate endpoints configured".to_string();
        for (i, endpoint) in self.candidates.iter().enumerate() {
            self.set_state(ConnectionState::Connecting {
                endpoint: endpoint.clone(),
                attempt: i + 1,
            });
            debug!("Connecting to {} (candidate {}/{})", endpoint, i + 1, self.candidates.len());

            match connect_async(endpoint.as_str()).await {
                Ok((ws, _response)) => {
                    self.attach(ws);
                    *self.reconnect_count.lock() = 0;
                    self.set_state(ConnectionState::Connected {
                        endpoint: endpoint.clone(),
                    });
                    info!("✅ Transport connected to {}", endpoint);
                    return Ok(());
                },
                Err(e) => {
                    debug!("Candidate {} failed: {}", endpoint, e);
                    last_failure = format!("{}: {}", endpoint, e);
                },
            }
        }

        warn!("All transport candidates failed: {}", last_failure);
        self.set_state(ConnectionState::Error {
            reason: last_failure.clone(),
        });
        Err(TransportError::AllCandidatesExhausted {
            reason: last_failure,
        })
    }

    /// Wire up reader/writer tasks for an open socket.
    fn attach(&self, ws: WebSocketStream<MaybeTlsStream<TcpStream>>) {
        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        *self.outbound_tx.write() = Some(tx);

        // Writer: drains the outbound queue into the socket. A write failure
        // surfaces as a closed stream on the reader side.
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    debug!("Outbound socket write failed: {}", e);
                    break;
                }
            }
        });

        // Reader: pumps inbound frames to subscribers in arrival order.
        let bridge = self.clone();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(message) => bridge.emit_message(message),
                        Err(e) => {
                            warn!("Undecodable inbound frame: {}", e);
                            bridge.reply_error(format!("unknown message type: {}", e));
                        },
                    },
                    Ok(Message::Close(_)) => {
                        debug!("Peer closed the connection");
                        break;
                    },
                    Ok(_) => {
                        // Ping/pong/binary frames carry nothing to route
                    },
                    Err(e) => {
                        warn!("Transport read error: {}", e);
                        break;
                    },
                }
            }

            bridge.outbound_tx.write().take();

            if *bridge.shutdown_flag.lock() {
                bridge.set_state(ConnectionState::Disconnected);
                debug!("Transport closed (deliberate teardown)");
                return;
            }

            warn!("🔌 Transport stream closed");
            bridge.set_state(ConnectionState::Disconnected);
            bridge.spawn_reconnect();
        });
    }

    /// Best-effort error reply for frames that never reach the router.
    fn reply_error(&self, message: String) {
        if let Ok(json) = serde_json::to_string(&ServerMessage::Error { message }) {
            if let Some(tx) = self.outbound_tx.read().as_ref() {
                let _ = tx.send(Message::Text(json));
            }
        }
    }

    /// Queue a message for delivery. Fails with `NotConnected` when the
    /// bridge is in any state other than `Connected`; callers must not treat
    /// that as fatal and must not queue on their side.
    pub fn send(&self, message: &ServerMessage) -> Result<(), TransportError> {
        if !matches!(self.state(), ConnectionState::Connected { .. }) {
            return Err(TransportError::NotConnected);
        }
        let json = serde_json::to_string(message)?;
        match self.outbound_tx.read().as_ref() {
            Some(tx) if tx.send(Message::Text(json)).is_ok() => Ok(()),
            // Socket tore down between the state check and the enqueue
            _ => Err(TransportError::NotConnected),
        }
    }

    /// Kick off a background reconnect cycle.
    pub fn spawn_reconnect(&self) {
        let bridge = self.clone();
        tokio::spawn(async move {
            bridge.schedule_reconnect().await;
        });
    }

    /// Reconnect with linear backoff, capped at 30s between attempts. Each
    /// attempt walks the full candidate list. Returns once reconnected or
    /// shut down.
    async fn schedule_reconnect(&self) {
        loop {
            if *self.shutdown_flag.lock() {
                return;
            }

            let attempt = {
                let mut count = self.reconnect_count.lock();
                *count += 1;
                *count
            };

            let delay_ms = std::cmp::min(30_000, 1_000 * attempt as u64);
            debug!("⏳ Transport reconnect #{} in {}ms", attempt, delay_ms);
            sleep(Duration::from_millis(delay_ms)).await;

            if *self.shutdown_flag.lock() {
                return;
            }

            match self.connect().await {
                Ok(()) => {
                    info!("✅ Transport reconnection successful");
                    return;
                },
                Err(e) => {
                    debug!("Transport reconnect #{} failed: {}", attempt, e);
                },
            }
        }
    }

    /// Deliberate teardown: close the socket and stop all reconnection.
    pub fn shutdown(&self) {
        *self.shutdown_flag.lock() = true;
        if let Some(tx) = self.outbound_tx.write().take() {
            let _ = tx.send(Message::Close(None));
        }
        self.set_state(ConnectionState::Disconnected);
    }
}

/// Seam between the router and the transport, so translation logic can be
/// exercised against a recording sink.
pub trait WireSink: Send + Sync {
    fn send(&self, message: &ServerMessage) -> Result<(), TransportError>;
}

impl WireSink for TransportBridge {
    fn send(&self, message: &ServerMessage) -> Result<(), TransportError> {
        TransportBridge::send(self, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::MidiData;
    use tokio::net::TcpListener;

    /// Accept one WebSocket connection and echo nothing; optionally feed
    /// frames to the client first.
    async fn spawn_ws_server(send_frames: Vec<String>) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            for frame in send_frames {
                ws.send(Message::Text(frame)).await.unwrap();
            }
            // Keep the socket open until the client goes away
            while let Some(Ok(frame)) = ws.next().await {
                if matches!(frame, Message::Close(_)) {
                    break;
                }
            }
        });
        addr
    }

    /// A port from the reserved range nothing listens on in the test
    /// environment; connections fail fast with ECONNREFUSED.
    const DEAD_ENDPOINT: &str = "ws://127.0.0.1:9";

    #[tokio::test]
    async fn test_connect_fails_over_to_second_candidate() {
        let addr = spawn_ws_server(Vec::new()).await;
        let live = format!("ws://{}", addr);

        let bridge = TransportBridge::new(vec![DEAD_ENDPOINT.to_string(), live.clone()]);

        let states: Arc<Mutex<Vec<ConnectionState>>> = Arc::new(Mutex::new(Vec::new()));
        let states_rec = Arc::clone(&states);
        bridge.on_state_change(Arc::new(move |s| states_rec.lock().push(s)));

        bridge.connect().await.unwrap();

        assert_eq!(
            bridge.state(),
            ConnectionState::Connected {
                endpoint: live.clone()
            }
        );

        // Both candidates attempted, strictly in order, never in parallel
        let recorded = states.lock().clone();
        assert_eq!(
            recorded,
            vec![
                ConnectionState::Connecting {
                    endpoint: DEAD_ENDPOINT.to_string(),
                    attempt: 1
                },
                ConnectionState::Connecting {
                    endpoint: live.clone(),
                    attempt: 2
                },
                ConnectionState::Connected { endpoint: live },
            ]
        );

        bridge.shutdown();
    }

    #[tokio::test]
    async fn test_all_candidates_exhausted_enters_error_state() {
        let bridge = TransportBridge::new(vec![DEAD_ENDPOINT.to_string()]);

        let err = bridge.connect().await.unwrap_err();
        assert!(matches!(err, TransportError::AllCandidatesExhausted { .. }));
        assert!(matches!(bridge.state(), ConnectionState::Error { .. }));
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_reported_not_thrown() {
        let bridge = TransportBridge::new(vec![DEAD_ENDPOINT.to_string()]);
        let result = bridge.send(&ServerMessage::Midi {
            data: MidiData::ControlChange {
                control: 7,
                value: 64,
            },
        });
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_inbound_frames_reach_subscribers_in_order() {
        let addr = spawn_ws_server(vec![
            r#"{"type":"osc","address":"/channel/1/fader","args":[0.25]}"#.to_string(),
            r#"{"type":"midi","data":{"type":"control_change","control":7,"value":64}}"#
                .to_string(),
        ])
        .await;

        let bridge = TransportBridge::new(vec![format!("ws://{}", addr)]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        bridge.on_message(Arc::new(move |msg| {
            let _ = tx.send(msg);
        }));

        bridge.connect().await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(
            first,
            ClientMessage::Osc {
                address: "/channel/1/fader".to_string(),
                args: vec![0.25],
            }
        );
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, ClientMessage::Midi { .. }));

        bridge.shutdown();
    }

    #[tokio::test]
    async fn test_send_after_connect_reaches_the_wire() {
        // Server that forwards everything it receives back to a channel
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(frame)) = ws.next().await {
                match frame {
                    Message::Text(text) => {
                        let _ = seen_tx.send(text);
                    },
                    Message::Close(_) => break,
                    _ => {},
                }
            }
        });

        let bridge = TransportBridge::new(vec![format!("ws://{}", addr)]);
        bridge.connect().await.unwrap();

        bridge
            .send(&ServerMessage::UiUpdate {
                channel: 1,
                event: crate::mapping::ControlKind::Fader,
                value: 0.5,
            })
            .unwrap();

        let text = seen_rx.recv().await.unwrap();
        assert_eq!(
            text,
            r#"{"type":"ui_update","channel":1,"event":"fader","value":0.5}"#
        );

        bridge.shutdown();
    }
}
