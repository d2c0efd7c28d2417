//! parley-server: realtime chat server library.
//!
//! Issues one-time tickets over HTTP, upgrades ticket holders to WebSocket
//! sessions, and fans packets out across the peer registry.

pub mod api;
pub mod auth;
pub mod config;
pub mod otp;
pub mod relay;
pub mod server;
pub mod session;
pub mod store;
pub mod tasks;
pub mod transport;

pub use config::{Overrides, ServerConfig};
pub use server::{AppState, ParleyServer};
