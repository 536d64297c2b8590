//! Network subsystem for the duplex session transport

pub mod transport;
pub mod websocket;

pub use transport::{Connector, DuplexLink, Inbound, LinkSender};
pub use websocket::WebSocketConnector;
