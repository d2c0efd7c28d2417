//! `parley token <user>`: Obtain a bearer token for the REST API.

use anyhow::{Context, Result};
use parley_client::ChatClient;

use super::password_or_prompt;

pub async fn run(client: &ChatClient, user: &str, password: Option<String>) -> Result<()> {
    let password = password_or_prompt(password, "Password", false)?;
    let token = client
        .create_token(user, &password)
        .await
        .context("failed to obtain token")?;

    let status = client.status(&token).await.context("token was not accepted")?;
    println!("{token}");
    eprintln!("server {} ({} connected)", status.status, status.clients);
    Ok(())
}
