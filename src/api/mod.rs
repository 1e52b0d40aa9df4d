//! API module for the relay's HTTP and WebSocket endpoints

pub mod http;
pub mod websocket;
