//! Duplex link to the remote service
//!
//! A [`Connector`] turns an endpoint plus credentials into a [`DuplexLink`]:
//! a bounded outbound queue of client messages, an inbound queue of server
//! messages and close/error notifications, and a shutdown token that tears
//! the underlying connection down.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Credentials;
use crate::error::TransportError;
use crate::protocol::{ClientMessage, ServerMessage};

/// Something received from the remote side
#[derive(Debug)]
pub enum Inbound {
    Message(ServerMessage),
    /// Remote closed the connection
    Closed { code: Option<u16>, reason: String },
    /// Connection broke
    Error(TransportError),
}

/// Non-blocking handle for queueing outbound messages
#[derive(Debug, Clone)]
pub struct LinkSender {
    tx: mpsc::Sender<ClientMessage>,
}

impl LinkSender {
    pub fn new(tx: mpsc::Sender<ClientMessage>) -> Self {
        Self { tx }
    }

    /// Queue without waiting; a full queue drops the message
    pub fn try_send(&self, message: ClientMessage) -> Result<(), TransportError> {
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                TransportError::SendFailed("outbound queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                TransportError::Closed("outbound queue closed".to_string())
            }
        })
    }

    /// Queue, waiting for room
    pub async fn send(&self, message: ClientMessage) -> Result<(), TransportError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| TransportError::Closed("outbound queue closed".to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// An established duplex connection
pub struct DuplexLink {
    sender: LinkSender,
    inbound: mpsc::Receiver<Inbound>,
    shutdown: CancellationToken,
}

impl DuplexLink {
    pub fn new(
        outbound: mpsc::Sender<ClientMessage>,
        inbound: mpsc::Receiver<Inbound>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            sender: LinkSender::new(outbound),
            inbound,
            shutdown,
        }
    }

    pub fn sender(&self) -> LinkSender {
        self.sender.clone()
    }

    pub async fn recv(&mut self) -> Option<Inbound> {
        self.inbound.recv().await
    }

    /// Shut the connection down. Idempotent.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Token that closes the connection when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn into_parts(self) -> (LinkSender, mpsc::Receiver<Inbound>, CancellationToken) {
        (self.sender, self.inbound, self.shutdown)
    }
}

/// Opens duplex links to the remote service
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &str,
        credentials: &Credentials,
    ) -> Result<DuplexLink, TransportError>;
}
