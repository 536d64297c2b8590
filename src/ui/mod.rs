//! Local control panel
//!
//! Drives mute, video and disconnect on the session and streams its events.

pub mod handlers;
pub mod server;
pub mod websocket;

pub use server::{AppState, WebServer};
