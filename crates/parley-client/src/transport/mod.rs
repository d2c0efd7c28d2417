//! Client-side transports.

pub mod websocket;

pub use websocket::{connect, WsReader, WsWriter};
