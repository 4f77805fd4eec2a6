//! Mock feed server for integration tests.
//!
//! Speaks the dashboard wire protocol:
//! - Answers `{"action": "authenticate"}` with an auth result
//! - Records every received message
//! - Can push market_data frames to connected clients
//! - Can drop connections abruptly to exercise reconnection

use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

#[derive(Debug, Clone)]
enum ServerCmd {
    /// Push a text frame to every connected client.
    Send(String),
    /// Drop every connection without a close frame.
    Kill,
}

/// A mock feed server for testing.
pub struct MockFeedServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    messages: Arc<Mutex<VecDeque<String>>>,
    connections: Arc<Mutex<u32>>,
    auth_succeeds: Arc<AtomicBool>,
    cmd_tx: broadcast::Sender<ServerCmd>,
}

impl MockFeedServer {
    /// Start a new mock feed server on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let messages: Arc<Mutex<VecDeque<String>>> = Arc::new(Mutex::new(VecDeque::new()));
        let connections: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
        let auth_succeeds = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (cmd_tx, _) = broadcast::channel::<ServerCmd>(32);

        let messages_clone = messages.clone();
        let connections_clone = connections.clone();
        let auth_clone = auth_succeeds.clone();
        let cmd_clone = cmd_tx.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        let messages = messages_clone.clone();
                        let connections = connections_clone.clone();
                        let auth = auth_clone.clone();
                        let cmd_rx = cmd_clone.subscribe();
                        tokio::spawn(handle_connection(stream, messages, connections, auth, cmd_rx));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            messages,
            connections,
            auth_succeeds,
            cmd_tx,
        }
    }

    /// Get the server's WebSocket URL.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Get the number of connections received.
    pub async fn connection_count(&self) -> u32 {
        *self.connections.lock().await
    }

    /// Get all received messages.
    pub async fn received_messages(&self) -> Vec<String> {
        self.messages.lock().await.iter().cloned().collect()
    }

    /// Count received subscribe requests mentioning `symbol`.
    pub async fn subscribe_count(&self, symbol: &str) -> usize {
        self.received_messages()
            .await
            .iter()
            .filter(|m| m.contains(r#""action":"subscribe""#) && m.contains(symbol))
            .count()
    }

    /// Configure whether authentication succeeds.
    pub fn set_auth_succeeds(&self, ok: bool) {
        self.auth_succeeds.store(ok, Ordering::SeqCst);
    }

    /// Push a text frame to every connected client.
    pub fn push(&self, text: String) {
        let _ = self.cmd_tx.send(ServerCmd::Send(text));
    }

    /// Drop every connection abruptly (no close frame).
    pub fn kill_connections(&self) {
        let _ = self.cmd_tx.send(ServerCmd::Kill);
    }

    /// Shutdown the server.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    messages: Arc<Mutex<VecDeque<String>>>,
    connections: Arc<Mutex<u32>>,
    auth_succeeds: Arc<AtomicBool>,
    mut cmd_rx: broadcast::Receiver<ServerCmd>,
) {
    {
        let mut count = connections.lock().await;
        *count += 1;
    }

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        {
                            let mut msgs = messages.lock().await;
                            msgs.push_back(text.clone());
                        }

                        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&text) {
                            if parsed.get("action") == Some(&serde_json::json!("authenticate")) {
                                let status = if auth_succeeds.load(Ordering::SeqCst) {
                                    "success"
                                } else {
                                    "invalid_token"
                                };
                                let response = serde_json::json!({
                                    "type": "auth",
                                    "status": status
                                });
                                let _ = write.send(Message::Text(response.to_string())).await;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => break,
                    Some(Err(_)) => break,
                    None => break,
                    _ => {}
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Ok(ServerCmd::Send(text)) => {
                        let _ = write.send(Message::Text(text)).await;
                    }
                    // Drop the socket without a close frame.
                    Ok(ServerCmd::Kill) => return,
                    Err(_) => break,
                }
            }
        }
    }
}
