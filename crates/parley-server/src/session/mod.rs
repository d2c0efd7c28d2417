//! Per-connection session lifecycle.
//!
//! The ticket is checked by [`authorize_upgrade`] before the protocol
//! upgrade; a rejected request never produces a [`Session`]. Once the peer
//! is in the registry the receive loop runs until the transport goes away or
//! the peer is evicted, then the peer is removed exactly once.

pub mod handler;

pub use handler::{Session, SessionEnd};

use crate::auth::Principal;
use crate::otp::OtpStore;
use parley_core::{ParleyError, ParleyResult};
use tracing::info;

/// Lifecycle of one registered realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Registered,
    Closed,
}

/// Validate the ticket presented with an upgrade request.
///
/// Redeems at most once. Missing, unknown, expired and already-used tickets
/// all yield the same `Unauthorized` error.
pub async fn authorize_upgrade(otp: &OtpStore, ticket: Option<&str>) -> ParleyResult<Principal> {
    let Some(ticket) = ticket.filter(|t| !t.is_empty()) else {
        info!("upgrade rejected: no ticket");
        return Err(ParleyError::Unauthorized("missing ticket".into()));
    };
    match otp.redeem(ticket).await {
        Some(principal) => Ok(principal),
        None => {
            info!("upgrade rejected: invalid ticket");
            Err(ParleyError::Unauthorized("invalid ticket".into()))
        }
    }
}
