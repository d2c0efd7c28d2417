//! The parley client.
//!
//! `ChatClient` wraps the HTTP side (login, registration, tokens) and opens
//! realtime [`Connection`]s with the tickets it obtains.

use crate::transport::{self, WsReader, WsWriter};
use parley_core::codec::encode_payload;
use parley_core::{
    read_packet, write_packet, DirectMessage, FrameSink, Packet, PacketKind, ParleyError,
    ParleyResult,
};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Login name that requests a guest ticket.
pub const GUEST_LOGIN: &str = "guest";

/// HTTP + WebSocket client for one parley server.
#[derive(Debug, Clone)]
pub struct ChatClient {
    base: Url,
    http: reqwest::Client,
}

/// Response of `GET /api/v1/status`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerStatus {
    pub status: String,
    pub clients: usize,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

impl ChatClient {
    /// Client for `http://host:port`.
    pub fn new(host: &str, port: u16) -> ParleyResult<Self> {
        Self::from_url(&format!("http://{host}:{port}"))
    }

    pub fn from_url(base: &str) -> ParleyResult<Self> {
        let base = Url::parse(base).map_err(|e| ParleyError::Config(format!("invalid server url: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ParleyError::Internal(format!("http client: {e}")))?;
        Ok(Self { base, http })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Exchange credentials for a one-time ticket.
    pub async fn login(&self, username: &str, password: &str) -> ParleyResult<String> {
        let response = self
            .http
            .get(self.endpoint("/login")?)
            .basic_auth(username, Some(password))
            .send()
            .await
            .map_err(http_error)?;
        let response = check_status(response).await?;
        response.text().await.map_err(http_error)
    }

    /// Ticket for an anonymous guest session.
    pub async fn login_guest(&self) -> ParleyResult<String> {
        self.login(GUEST_LOGIN, "").await
    }

    /// Redeem `otp` and open the realtime connection.
    pub async fn connect(&self, otp: &str) -> ParleyResult<Connection> {
        let url = self.ws_url(otp)?;
        let (reader, writer) = transport::connect(url.as_str()).await?;
        let mut conn = Connection {
            reader,
            writer,
            name: String::new(),
        };

        let ready = conn.recv().await?;
        if ready.kind != PacketKind::Ready {
            return Err(ParleyError::MalformedPacket(format!(
                "expected ready, got {}",
                ready.kind
            )));
        }
        conn.name = ready.payload_text().unwrap_or_default().to_string();
        debug!(name = %conn.name, "session ready");
        Ok(conn)
    }

    /// `login` followed by `connect`.
    pub async fn join(&self, username: &str, password: &str) -> ParleyResult<Connection> {
        let otp = self.login(username, password).await?;
        self.connect(&otp).await
    }

    pub async fn register(&self, username: &str, password: &str) -> ParleyResult<()> {
        let response = self
            .http
            .post(self.endpoint("/api/v1/register")?)
            .json(&json!({ "user": username, "pass": password }))
            .send()
            .await
            .map_err(http_error)?;
        check_status(response).await?;
        Ok(())
    }

    /// Obtain a bearer token for the REST API.
    pub async fn create_token(&self, username: &str, password: &str) -> ParleyResult<String> {
        let response = self
            .http
            .post(self.endpoint("/api/v1/users/token")?)
            .basic_auth(username, Some(password))
            .send()
            .await
            .map_err(http_error)?;
        let body: TokenResponse = check_status(response).await?.json().await.map_err(http_error)?;
        Ok(body.token)
    }

    pub async fn status(&self, token: &str) -> ParleyResult<ServerStatus> {
        let response = self
            .http
            .get(self.endpoint("/api/v1/status")?)
            .bearer_auth(token)
            .send()
            .await
            .map_err(http_error)?;
        check_status(response).await?.json().await.map_err(http_error)
    }

    fn endpoint(&self, path: &str) -> ParleyResult<Url> {
        self.base
            .join(path)
            .map_err(|e| ParleyError::Config(format!("invalid endpoint {path}: {e}")))
    }

    fn ws_url(&self, otp: &str) -> ParleyResult<Url> {
        let mut url = self.endpoint("/ws")?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| ParleyError::Config(format!("cannot use {scheme} with {}", self.base)))?;
        url.query_pairs_mut().append_pair("otp", otp);
        Ok(url)
    }
}

fn http_error(e: reqwest::Error) -> ParleyError {
    if e.is_timeout() {
        ParleyError::Timeout
    } else {
        ParleyError::Transport(format!("http request failed: {e}"))
    }
}

async fn check_status(response: reqwest::Response) -> ParleyResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let detail = response
        .json::<ErrorBody>()
        .await
        .map(|b| b.error)
        .unwrap_or_else(|_| status.to_string());
    Err(match status {
        StatusCode::UNAUTHORIZED => ParleyError::Unauthorized(detail),
        StatusCode::FORBIDDEN => ParleyError::PermissionDenied(detail),
        StatusCode::TOO_MANY_REQUESTS => ParleyError::PermissionDenied(detail),
        _ => ParleyError::Internal(format!("{status}: {detail}")),
    })
}

/// A live realtime session.
pub struct Connection {
    reader: WsReader,
    writer: WsWriter,
    name: String,
}

impl Connection {
    /// Display name assigned by the server (`user@addr`).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn send(&mut self, packet: &Packet) -> ParleyResult<()> {
        write_packet(&mut self.writer, packet).await
    }

    pub async fn broadcast(&mut self, text: &str) -> ParleyResult<()> {
        self.send(&Packet::text(PacketKind::Broadcast, text)).await
    }

    pub async fn direct_message(&mut self, to: &str, body: &str) -> ParleyResult<()> {
        let message = DirectMessage {
            from: None,
            to: to.to_string(),
            body: body.to_string(),
        };
        self.send(&Packet::new(PacketKind::Message, encode_payload(&message)?))
            .await
    }

    /// Next packet other than a heartbeat. Heartbeats are acknowledged on
    /// the way through.
    pub async fn recv(&mut self) -> ParleyResult<Packet> {
        loop {
            let packet = read_packet(&mut self.reader).await?;
            if packet.kind == PacketKind::Heartbeat {
                write_packet(&mut self.writer, &Packet::heartbeat_ack()).await?;
                continue;
            }
            return Ok(packet);
        }
    }

    /// Split into independent halves for a reader task and a writer.
    pub fn split(self) -> (WsReader, WsWriter) {
        (self.reader, self.writer)
    }

    pub async fn close(mut self) -> ParleyResult<()> {
        self.writer.close().await
    }
}
