//! HMAC bearer tokens for the REST surface.
//!
//! Tokens are stateless: they bind a username to an expiry time and are
//! HMAC-signed with a server secret.
//! Format (hex encoded): `[8-byte expiry][32-byte HMAC-SHA256][username]`

use crate::error::{ParleyError, ParleyResult};
use ring::hmac;
use std::time::{SystemTime, UNIX_EPOCH};

const EXPIRY_LEN: usize = 8;
const TAG_LEN: usize = 32;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn signed_data(expiry: u64, username: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(EXPIRY_LEN + username.len());
    data.extend_from_slice(&expiry.to_be_bytes());
    data.extend_from_slice(username.as_bytes());
    data
}

/// Create a bearer token for `username`, valid for `ttl_secs`.
pub fn create_token(secret: &[u8], username: &str, ttl_secs: u64) -> String {
    create_token_at(secret, username, unix_now().saturating_add(ttl_secs))
}

fn create_token_at(secret: &[u8], username: &str, expiry: u64) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    let tag = hmac::sign(&key, &signed_data(expiry, username));

    let mut token = Vec::with_capacity(EXPIRY_LEN + TAG_LEN + username.len());
    token.extend_from_slice(&expiry.to_be_bytes());
    token.extend_from_slice(tag.as_ref());
    token.extend_from_slice(username.as_bytes());
    hex::encode(token)
}

/// Verify a bearer token and return the username it was issued to.
pub fn verify_token(secret: &[u8], token: &str) -> ParleyResult<String> {
    let raw = hex::decode(token).map_err(|_| ParleyError::Token("token is not hex".into()))?;
    if raw.len() <= EXPIRY_LEN + TAG_LEN {
        return Err(ParleyError::Token(format!(
            "invalid token length: {}",
            raw.len()
        )));
    }

    let (expiry_bytes, rest) = raw.split_at(EXPIRY_LEN);
    let (tag, user_bytes) = rest.split_at(TAG_LEN);

    let mut expiry_buf = [0u8; EXPIRY_LEN];
    expiry_buf.copy_from_slice(expiry_bytes);
    let expiry = u64::from_be_bytes(expiry_buf);

    let username = std::str::from_utf8(user_bytes)
        .map_err(|_| ParleyError::Token("invalid username encoding".into()))?;

    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    hmac::verify(&key, &signed_data(expiry, username), tag)
        .map_err(|_| ParleyError::Token("invalid token signature".into()))?;

    if unix_now() > expiry {
        return Err(ParleyError::Token("token expired".into()));
    }

    Ok(username.to_string())
}

/// Generate a random server secret (32 bytes).
pub fn generate_secret() -> ParleyResult<Vec<u8>> {
    use ring::rand::{SecureRandom, SystemRandom};
    let mut secret = vec![0u8; 32];
    SystemRandom::new()
        .fill(&mut secret)
        .map_err(|_| ParleyError::Internal("system RNG failure".into()))?;
    Ok(secret)
}
