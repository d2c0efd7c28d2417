//! Server assembly: shared state, routes, realtime upgrade, lifecycle.

use crate::api;
use crate::auth::{Principal, RateLimiter};
use crate::config::ServerConfig;
use crate::otp::OtpStore;
use crate::relay::PeerRegistry;
use crate::session::{authorize_upgrade, Session};
use crate::store::UserStore;
use crate::tasks;
use crate::transport::split_socket;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::header::ORIGIN;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use parley_core::{generate_secret, ParleyError, ParleyResult};
use serde::Deserialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

/// State shared by every handler and background loop.
pub struct AppState {
    pub config: ServerConfig,
    pub otp: Arc<OtpStore>,
    pub registry: Arc<PeerRegistry>,
    pub users: Arc<UserStore>,
    /// HMAC key for bearer tokens; regenerated on every start.
    pub secret: Vec<u8>,
    pub login_limiter: Arc<Mutex<RateLimiter>>,
}

/// The chat server.
pub struct ParleyServer {
    state: Arc<AppState>,
    /// Broadcast sender for server shutdown notification.
    shutdown_tx: broadcast::Sender<()>,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    otp: Option<String>,
}

impl ParleyServer {
    /// Build the server, opening the user store if one is configured.
    pub async fn new(config: ServerConfig) -> ParleyResult<Self> {
        let users = match &config.users_file {
            Some(path) => UserStore::open(path.clone(), config.hash_iterations)
                .await
                .map_err(|e| ParleyError::Config(e.to_string()))?,
            None => UserStore::in_memory(config.hash_iterations),
        };

        let state = AppState {
            otp: Arc::new(OtpStore::new(config.otp_ttl)),
            registry: Arc::new(PeerRegistry::new(config.write_timeout)),
            users: Arc::new(users),
            secret: generate_secret()?,
            login_limiter: Arc::new(Mutex::new(RateLimiter::per_minute(
                config.login_attempts_per_minute,
            ))),
            config,
        };

        Ok(Self {
            state: Arc::new(state),
            shutdown_tx: broadcast::channel(1).0,
        })
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub fn router(&self) -> Router {
        let v1 = Router::new()
            .route("/register", post(api::register))
            .route(
                "/users/token",
                post(api::create_user_token).get(api::check_user_token),
            )
            .route("/status", get(api::status))
            .route("/users", get(api::list_users))
            .route("/users/{user_id}", get(api::user_info));

        Router::new()
            .route("/", get(api::root))
            .route("/login", get(api::login))
            .route("/ws", get(ws_upgrade))
            .nest("/api/v1", v1)
            .with_state(self.state.clone())
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> ParleyResult<TcpListener> {
        let addr = SocketAddr::new(self.state.config.bind, self.state.config.port);
        TcpListener::bind(addr)
            .await
            .map_err(|e| ParleyError::Transport(format!("bind {addr} failed: {e}")))
    }

    /// Serve until `shutdown` resolves, then stop the background loops.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> ParleyResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let config = &self.state.config;
        let heartbeat = tasks::spawn_heartbeat(
            self.state.registry.clone(),
            config.heartbeat_interval,
            self.shutdown_tx.subscribe(),
        );
        let sweep = tasks::spawn_sweep(
            self.state.otp.clone(),
            self.state.login_limiter.clone(),
            config.sweep_interval,
            self.shutdown_tx.subscribe(),
        );

        let local = listener.local_addr()?;
        info!(
            addr = %local,
            guests = config.allow_guests,
            heartbeat_secs = config.heartbeat_interval.as_secs(),
            "parley-server ready"
        );

        let app = self.router();
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        info!("listener closed, stopping background loops");
        let _ = self.shutdown_tx.send(());
        for task in [heartbeat, sweep] {
            if let Err(e) = task.await {
                warn!(error = %e, "background loop panicked");
            }
        }

        result.map_err(ParleyError::from)
    }
}

/// `GET /ws?otp=<ticket>`: redeem the ticket, then upgrade.
async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    if !origin_allowed(&state.config.allowed_origins, &headers) {
        info!(remote = %remote, "upgrade rejected: origin not allowed");
        return StatusCode::FORBIDDEN.into_response();
    }

    let principal = match authorize_upgrade(&state.otp, query.otp.as_deref()).await {
        Ok(principal) => principal,
        Err(_) => return StatusCode::UNAUTHORIZED.into_response(),
    };

    ws.max_message_size(state.config.max_frame_size)
        .on_upgrade(move |socket| run_socket(state, principal, remote, socket))
}

async fn run_socket(state: Arc<AppState>, principal: Principal, remote: SocketAddr, socket: WebSocket) {
    let (source, sink) = split_socket(socket, state.config.max_frame_size);
    let session = match Session::register(
        state.registry.clone(),
        principal,
        remote,
        Box::new(sink),
        state.config.read_timeout,
    )
    .await
    {
        Ok(session) => session,
        Err(e) => {
            warn!(remote = %remote, error = %e, "registration failed");
            return;
        }
    };
    session.run(source).await;
}

/// An absent `Origin` (non-browser client) is always accepted.
fn origin_allowed(allowed: &[String], headers: &HeaderMap) -> bool {
    if allowed.is_empty() {
        return true;
    }
    match headers.get(ORIGIN).and_then(|v| v.to_str().ok()) {
        Some(origin) => allowed.iter().any(|a| a == origin),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn with_origin(origin: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ORIGIN, HeaderValue::from_str(origin).unwrap());
        headers
    }

    #[test]
    fn origin_policy() {
        let allowed = vec!["https://chat.example".to_string()];
        assert!(origin_allowed(&[], &with_origin("https://evil.example")));
        assert!(origin_allowed(&allowed, &with_origin("https://chat.example")));
        assert!(!origin_allowed(&allowed, &with_origin("https://evil.example")));
        assert!(origin_allowed(&allowed, &HeaderMap::new()));
    }

    #[tokio::test]
    async fn new_server_starts_empty() {
        let server = ParleyServer::new(ServerConfig::default()).await.unwrap();
        assert_eq!(server.state().registry.count().await, 0);
        assert!(server.state().otp.is_empty().await);
        assert!(!server.state().secret.is_empty());
    }
}
