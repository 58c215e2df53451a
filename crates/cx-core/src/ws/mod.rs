//! WebSocket transport.

pub mod client;

pub use client::{NetworkErrorKind, WsCallbacks, WsClient, WsConfig, WsSender};
