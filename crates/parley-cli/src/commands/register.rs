//! `parley register <user>`: Create an account on the server.

use anyhow::{Context, Result};
use parley_client::ChatClient;
use tracing::info;

use super::password_or_prompt;

pub async fn run(client: &ChatClient, user: &str, password: Option<String>) -> Result<()> {
    let password = password_or_prompt(password, "New password", true)?;
    client
        .register(user, &password)
        .await
        .with_context(|| format!("failed to register '{user}'"))?;

    info!(user, "registered");
    println!("Registered '{user}' on {}", client.base_url());
    Ok(())
}
