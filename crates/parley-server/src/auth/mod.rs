//! Authentication and authorization modules.

pub mod credentials;
pub mod permissions;
pub mod rate_limit;

pub use credentials::{basic_credentials, bearer_token};
pub use permissions::{Capabilities, Principal};
pub use rate_limit::RateLimiter;
