//! `parley connect [user]`: Interactive chat session.
//!
//! Logs in, redeems the ticket, then reads lines from stdin:
//! `!text` or plain text broadcasts, `@user text` sends a direct message,
//! `QUIT` / `Q` leaves. Incoming packets are printed as they arrive.

use anyhow::{Context, Result};
use parley_client::ChatClient;
use parley_core::codec::{decode_payload, encode_payload};
use parley_core::{read_packet, write_packet, DirectMessage, FrameSink, Packet, PacketKind};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::password_or_prompt;

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Broadcast(String),
    Direct { to: String, body: String },
    Quit,
    Empty,
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("q") {
        return Input::Quit;
    }
    if let Some(text) = line.strip_prefix('!') {
        let text = text.trim();
        return if text.is_empty() {
            Input::Empty
        } else {
            Input::Broadcast(text.to_string())
        };
    }
    if let Some(rest) = line.strip_prefix('@') {
        if let Some((to, body)) = rest.split_once(char::is_whitespace) {
            let body = body.trim();
            if !to.is_empty() && !body.is_empty() {
                return Input::Direct {
                    to: to.to_string(),
                    body: body.to_string(),
                };
            }
        }
    }
    Input::Broadcast(line.to_string())
}

/// Render an incoming packet for the terminal; `None` means print nothing.
pub fn render(packet: &Packet) -> Option<String> {
    match &packet.kind {
        PacketKind::Broadcast => packet.payload_text().map(str::to_string),
        PacketKind::Message => match decode_payload::<DirectMessage>(&packet.payload) {
            Ok(dm) => Some(format!(
                "[dm] {}: {}",
                dm.from.as_deref().unwrap_or("?"),
                dm.body
            )),
            Err(e) => {
                debug!(error = %e, "undecodable direct message");
                None
            }
        },
        PacketKind::Error => Some(format!(
            "error: {}",
            packet.payload_text().unwrap_or("(binary)")
        )),
        other => {
            debug!(kind = %other, "not displayed");
            None
        }
    }
}

pub async fn run(
    client: &ChatClient,
    user: &str,
    password: Option<String>,
    guest: bool,
) -> Result<()> {
    let otp = if guest {
        client.login_guest().await.context("guest login failed")?
    } else {
        let password = password_or_prompt(password, "Password", false)?;
        client.login(user, &password).await.context("login failed")?
    };

    let conn = client.connect(&otp).await.context("failed to open session")?;
    info!(name = %conn.name(), "connected");
    println!("Connected as {}. `!text` or text to broadcast, `@user text` to message, `QUIT` to leave.", conn.name());

    let (mut reader, mut writer) = conn.split();
    let (ack_tx, mut ack_rx) = mpsc::channel::<()>(8);

    let mut reader_task = tokio::spawn(async move {
        loop {
            match read_packet(&mut reader).await {
                Ok(packet) if packet.kind == PacketKind::Heartbeat => {
                    if ack_tx.send(()).await.is_err() {
                        break;
                    }
                }
                Ok(packet) => {
                    if let Some(line) = render(&packet) {
                        println!("{line}");
                    }
                }
                Err(e) => {
                    if !e.is_disconnect() {
                        eprintln!("parley: {e}");
                    }
                    break;
                }
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                let packet = match parse_input(&line) {
                    Input::Quit => break,
                    Input::Empty => continue,
                    Input::Broadcast(text) => Packet::text(PacketKind::Broadcast, &text),
                    Input::Direct { to, body } => {
                        let dm = DirectMessage { from: None, to, body };
                        Packet::new(PacketKind::Message, encode_payload(&dm)?)
                    }
                };
                write_packet(&mut writer, &packet).await.context("send failed")?;
            }
            Some(()) = ack_rx.recv() => {
                write_packet(&mut writer, &Packet::heartbeat_ack())
                    .await
                    .context("send failed")?;
            }
            _ = &mut reader_task => {
                println!("Connection closed by server.");
                writer.close().await.ok();
                return Ok(());
            }
        }
    }

    writer.close().await.ok();
    reader_task.abort();
    println!("Bye.");
    Ok(())
}
