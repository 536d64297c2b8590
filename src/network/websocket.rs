//! WebSocket connector for the bidirectional streaming endpoint
//!
//! One I/O task per connection owns both halves of the socket and
//! multiplexes the outbound queue, inbound frames and shutdown with
//! `tokio::select!`.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::Credentials;
use crate::constants::{INBOUND_QUEUE_CAPACITY, OUTBOUND_QUEUE_CAPACITY};
use crate::error::TransportError;
use crate::network::transport::{Connector, DuplexLink, Inbound};
use crate::protocol::{ClientMessage, ServerMessage};

/// Connects over `wss://` with the API key as a query parameter
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    outbound_capacity: usize,
    inbound_capacity: usize,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(OUTBOUND_QUEUE_CAPACITY)
    }
}

impl WebSocketConnector {
    pub fn new(outbound_capacity: usize) -> Self {
        Self {
            outbound_capacity: outbound_capacity.max(1),
            inbound_capacity: INBOUND_QUEUE_CAPACITY,
        }
    }
}

/// Endpoint URL carrying the key
fn build_ws_url(endpoint: &str, credentials: &Credentials) -> Result<Url, TransportError> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| TransportError::ConnectionFailed(format!("invalid endpoint: {}", e)))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(TransportError::ConnectionFailed(format!(
                "unsupported scheme: {}",
                other
            )))
        }
    }
    url.query_pairs_mut().append_pair("key", credentials.api_key());
    Ok(url)
}

/// Classify a handshake failure
fn handshake_error(e: tungstenite::Error) -> TransportError {
    match e {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                TransportError::Authentication(format!("handshake rejected with {}", status))
            } else {
                TransportError::ConnectionFailed(format!("handshake rejected with {}", status))
            }
        }
        other => TransportError::ConnectionFailed(other.to_string()),
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(
        &self,
        endpoint: &str,
        credentials: &Credentials,
    ) -> Result<DuplexLink, TransportError> {
        credentials.validate()?;
        let url = build_ws_url(endpoint, credentials)?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(handshake_error)?;

        info!("Connected to {}", endpoint);

        let (outbound_tx, outbound_rx) = mpsc::channel::<ClientMessage>(self.outbound_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel::<Inbound>(self.inbound_capacity);
        let shutdown = CancellationToken::new();

        tokio::spawn(run_io(ws_stream, outbound_rx, inbound_tx, shutdown.clone()));

        Ok(DuplexLink::new(outbound_tx, inbound_rx, shutdown))
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn run_io(
    ws: WsStream,
    mut outbound_rx: mpsc::Receiver<ClientMessage>,
    inbound_tx: mpsc::Sender<Inbound>,
    shutdown: CancellationToken,
) {
    let (mut ws_sink, mut ws_stream) = ws.split();

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                debug!("Closing WebSocket on request");
                let _ = ws_sink.send(Message::Close(None)).await;
                let _ = ws_sink.close().await;
                break;
            }

            // Handle outgoing messages
            message = outbound_rx.recv() => {
                let Some(message) = message else {
                    debug!("Outbound queue dropped; closing WebSocket");
                    let _ = ws_sink.close().await;
                    break;
                };

                let json = match message.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to serialize outbound message: {}", e);
                        continue;
                    }
                };

                if let Err(e) = ws_sink.send(Message::Text(json)).await {
                    error!("Failed to send WebSocket message: {}", e);
                    let _ = inbound_tx
                        .send(Inbound::Error(TransportError::SendFailed(e.to_string())))
                        .await;
                    break;
                }
            }

            // Handle incoming messages
            frame = ws_stream.next() => {
                let parsed = match frame {
                    Some(Ok(Message::Text(text))) => ServerMessage::from_json(&text),
                    Some(Ok(Message::Binary(bytes))) => ServerMessage::from_slice(&bytes),
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                            warn!("Failed to send pong: {}", e);
                        }
                        continue;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(frame) => (Some(u16::from(frame.code)), frame.reason.to_string()),
                            None => (None, String::new()),
                        };
                        info!("WebSocket closed by server (code {:?}): {}", code, reason);
                        let _ = inbound_tx.send(Inbound::Closed { code, reason }).await;
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        let _ = inbound_tx
                            .send(Inbound::Error(TransportError::ConnectionFailed(e.to_string())))
                            .await;
                        break;
                    }
                    None => {
                        let _ = inbound_tx
                            .send(Inbound::Closed {
                                code: None,
                                reason: "stream ended".to_string(),
                            })
                            .await;
                        break;
                    }
                };

                match parsed {
                    Ok(message) => {
                        if inbound_tx.send(Inbound::Message(message)).await.is_err() {
                            debug!("Inbound queue dropped; closing WebSocket");
                            let _ = ws_sink.close().await;
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to parse server message: {}", e),
                }
            }
        }
    }

    debug!("WebSocket I/O task finished");
}
