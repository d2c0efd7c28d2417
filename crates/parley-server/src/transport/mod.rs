//! Server-side transport adapters.

pub mod websocket;

pub use websocket::{split_socket, WsFrameSink, WsFrameSource};
