//! `parley gen-password`: Print a salted password verifier.
//!
//! The output is the JSON form stored in the server's users file.

use anyhow::{Context, Result};
use parley_core::PasswordHash;

use super::password_or_prompt;

pub fn run(password: Option<String>, iterations: u32) -> Result<()> {
    let password = password_or_prompt(password, "Password", true)?;
    let hash = PasswordHash::generate(&password, iterations).context("failed to hash password")?;
    let json = serde_json::to_string_pretty(&hash).context("failed to encode verifier")?;
    println!("{json}");
    Ok(())
}
