//! Session identities and the capabilities they carry.

use rand::Rng;
use serde::Serialize;

/// Reserved login name for guest access.
pub const GUEST_LOGIN: &str = "guest";

/// Who a realtime session belongs to. Bound to an OTP at issue time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub username: String,
    pub guest: bool,
}

impl Principal {
    pub fn user(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            guest: false,
        }
    }

    /// A guest with a generated name (`guestNNNNN`).
    pub fn guest() -> Self {
        let n: u32 = rand::thread_rng().gen_range(0..100_000);
        Self {
            username: format!("{GUEST_LOGIN}{n:05}"),
            guest: true,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        if self.guest {
            Capabilities::guest()
        } else {
            Capabilities::full()
        }
    }
}

/// What a session is allowed to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub can_direct_message: bool,
    pub can_broadcast: bool,
}

impl Capabilities {
    /// Authenticated users.
    pub fn full() -> Self {
        Self {
            can_direct_message: true,
            can_broadcast: true,
        }
    }

    /// Guests may talk in the room but not message users directly.
    pub fn guest() -> Self {
        Self {
            can_direct_message: false,
            can_broadcast: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_names_are_prefixed() {
        let g = Principal::guest();
        assert!(g.guest);
        assert!(g.username.starts_with(GUEST_LOGIN));
        assert_eq!(g.username.len(), GUEST_LOGIN.len() + 5);
    }

    #[test]
    fn capabilities_follow_principal() {
        assert_eq!(Principal::user("alice").capabilities(), Capabilities::full());
        let caps = Principal::guest().capabilities();
        assert!(caps.can_broadcast);
        assert!(!caps.can_direct_message);
    }
}
