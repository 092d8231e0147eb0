//! Venue stream connections - WebSocket transport

pub mod ws_client;

pub use ws_client::{WsClient, WsTransport};
