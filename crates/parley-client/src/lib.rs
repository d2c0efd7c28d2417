//! parley-client: Rust client library for the parley chat service.
//!
//! Logs in over HTTP, redeems the one-time ticket on the WebSocket endpoint,
//! and exchanges CBOR packets with the server.
//!
//! # Quick Start
//!
//! ```no_run
//! use parley_client::ChatClient;
//!
//! # async fn example() -> parley_core::ParleyResult<()> {
//! let client = ChatClient::new("127.0.0.1", 3000)?;
//! let mut conn = client.join("alice", "wonderland").await?;
//! conn.broadcast("hello, room").await?;
//!
//! let packet = conn.recv().await?;
//! println!("{}: {}", packet.kind, packet.payload_text().unwrap_or_default());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod transport;

pub use client::{ChatClient, Connection, ServerStatus, GUEST_LOGIN};
pub use transport::{WsReader, WsWriter};

// Re-export parley-core error types for convenience.
pub use parley_core::{ParleyError, ParleyResult};
