//! CLI subcommand implementations.

pub mod connect;
pub mod gen_password;
pub mod register;
pub mod token;

use anyhow::{Context, Result};

/// Use the given password or prompt for one without echo.
pub(crate) fn password_or_prompt(given: Option<String>, prompt: &str, confirm: bool) -> Result<String> {
    if let Some(password) = given {
        return Ok(password);
    }
    let mut input = dialoguer::Password::new().with_prompt(prompt);
    if confirm {
        input = input.with_confirmation("Repeat password", "passwords do not match");
    }
    input.interact().context("failed to read password")
}
