//! One-time tickets bridging an HTTP login to a realtime upgrade.
//!
//! A ticket is issued after a successful credential check and is redeemable
//! exactly once within its TTL. Redemption and the expiry sweep both run
//! under the store's lock, so for any ticket exactly one of them removes it.

use crate::auth::Principal;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Ticket length in characters (~143 bits over the alphanumeric alphabet).
const TICKET_LEN: usize = 24;

#[derive(Debug)]
struct Ticket {
    created: Instant,
    principal: Principal,
}

impl Ticket {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.duration_since(self.created) > ttl
    }
}

/// Store of outstanding one-time tickets.
#[derive(Debug)]
pub struct OtpStore {
    tickets: Mutex<HashMap<String, Ticket>>,
    ttl: Duration,
}

impl OtpStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            tickets: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Issue a fresh ticket bound to `principal` and return its value.
    pub async fn issue(&self, principal: Principal) -> String {
        let value = generate_ticket();
        let ticket = Ticket {
            created: Instant::now(),
            principal,
        };
        debug!(user = %ticket.principal.username, "issued one-time ticket");
        self.tickets.lock().await.insert(value.clone(), ticket);
        value
    }

    /// Redeem a ticket.
    ///
    /// Returns the bound principal if the ticket exists and has not expired,
    /// removing it in the same critical section. Otherwise returns `None`
    /// and leaves the store untouched.
    pub async fn redeem(&self, value: &str) -> Option<Principal> {
        let mut tickets = self.tickets.lock().await;
        let now = Instant::now();
        match tickets.get(value) {
            Some(ticket) if !ticket.is_expired(now, self.ttl) => {
                tickets.remove(value).map(|t| t.principal)
            }
            _ => None,
        }
    }

    /// Remove every expired ticket; returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let mut tickets = self.tickets.lock().await;
        let now = Instant::now();
        let before = tickets.len();
        tickets.retain(|_, t| !t.is_expired(now, self.ttl));
        before - tickets.len()
    }

    /// Number of outstanding tickets.
    pub async fn len(&self) -> usize {
        self.tickets.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn generate_ticket() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TICKET_LEN)
        .map(char::from)
        .collect()
}
