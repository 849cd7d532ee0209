//! WebSocket Round Gateway
//!
//! Async WebSocket server in front of the round engine. Handles token
//! authentication, dispatches requests to the engine, and forwards round
//! events to clients that subscribed to them.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::config::env_u64;
use crate::core::ids::{ParticipantId, RoundId};
use crate::engine::engine::RoundEngine;
use crate::engine::error::EngineError;
use crate::network::auth::{validate_token, AuthConfig};
use crate::network::protocol::{AuthResult, ClientMessage, ErrorCode, ServerError, ServerMessage};
use crate::round::events::RoundEvent;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Connections silent for longer than this are dropped.
    pub idle_timeout: Duration,
    /// How often idle connections are swept.
    pub cleanup_interval: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(60),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Defaults with `BIND_ADDR`, `MAX_CONNECTIONS` and `IDLE_TIMEOUT_SECS`
    /// overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("BIND_ADDR") {
            match raw.parse() {
                Ok(addr) => config.bind_addr = addr,
                Err(_) => warn!("Ignoring BIND_ADDR={:?}: not a socket address", raw),
            }
        }
        if let Some(max) = env_u64("MAX_CONNECTIONS") {
            config.max_connections = max as usize;
        }
        if let Some(secs) = env_u64("IDLE_TIMEOUT_SECS") {
            config.idle_timeout = Duration::from_secs(secs);
        }
        config
    }
}

/// Gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// Connected client state.
struct ConnectedClient {
    /// Participant (after auth).
    participant_id: Option<ParticipantId>,
    /// Rounds whose events this client receives.
    subscriptions: BTreeSet<RoundId>,
    /// Connection time.
    connected_at: Instant,
    /// Last activity.
    last_activity: Instant,
    /// Outbound queue.
    sender: mpsc::Sender<ServerMessage>,
    /// Fired to make the connection task hang up.
    close_tx: Option<oneshot::Sender<()>>,
}

type ClientMap = Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>;

/// State shared by the accept loop and every connection task.
struct Shared {
    config: ServerConfig,
    auth: AuthConfig,
    engine: Arc<RoundEngine>,
    clients: ClientMap,
}

/// The round gateway.
pub struct RoundServer {
    shared: Arc<Shared>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl RoundServer {
    /// Create a gateway in front of `engine`.
    pub fn new(config: ServerConfig, auth: AuthConfig, engine: Arc<RoundEngine>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        if !auth.is_configured() {
            warn!("No AUTH_SECRET or AUTH_PUBLIC_KEY_PEM set; every auth request will fail");
        }

        Self {
            shared: Arc::new(Shared {
                config,
                auth,
                engine,
                clients: Arc::new(RwLock::new(BTreeMap::new())),
            }),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), GatewayError> {
        let listener = TcpListener::bind(&self.shared.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GatewayError> {
        info!("Round gateway listening on {}", listener.local_addr()?);

        let fanout = tokio::spawn(Self::run_event_fanout(
            self.shared.clone(),
            self.shared.engine.subscribe(),
            self.shutdown_tx.subscribe(),
        ));
        let cleanup = tokio::spawn(Self::run_cleanup_loop(
            self.shared.clone(),
            self.shutdown_tx.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.shared.clients.read().await.len();
                            if clients_count >= self.shared.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                tokio::spawn(Self::reject_overloaded(stream, addr));
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        fanout.abort();
        cleanup.abort();
        Ok(())
    }

    /// Complete the handshake only to tell the client the server is full.
    async fn reject_overloaded(stream: TcpStream, addr: SocketAddr) {
        let mut ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                debug!("Handshake with rejected client {} failed: {}", addr, e);
                return;
            }
        };

        let notice = ServerMessage::error(ErrorCode::ServerOverloaded, "Connection limit reached");
        if let Ok(text) = notice.to_json() {
            let _ = ws_stream.send(Message::Text(text)).await;
        }
        let _ = ws_stream.close(None).await;
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let shared = self.shared.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);
            let (close_tx, mut close_rx) = oneshot::channel::<()>();

            {
                let mut clients = shared.clients.write().await;
                clients.insert(addr, ConnectedClient {
                    participant_id: None,
                    subscriptions: BTreeSet::new(),
                    connected_at: Instant::now(),
                    last_activity: Instant::now(),
                    sender: msg_tx.clone(),
                    close_tx: Some(close_tx),
                });
            }

            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                shared.touch(addr).await;

                                let reply = match ClientMessage::from_json(&text) {
                                    Ok(client_msg) => shared.handle_client_message(addr, client_msg).await,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        Some(ServerMessage::error(ErrorCode::InvalidInput, "Invalid message format"))
                                    }
                                };
                                if let Some(reply) = reply {
                                    let _ = msg_tx.send(reply).await;
                                }
                            }
                            Some(Ok(Message::Binary(_))) => {
                                let _ = msg_tx
                                    .send(ServerMessage::error(ErrorCode::InvalidInput, "Binary frames are not supported"))
                                    .await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            // Ping/pong frames are answered by tungstenite
                            _ => {
                                shared.touch(addr).await;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                    _ = &mut close_rx => {
                        debug!("Closing idle connection {}", addr);
                        break;
                    }
                }
            }

            // Let queued replies (including the shutdown notice) drain
            drop(msg_tx);
            if let Some(client) = shared.clients.write().await.remove(&addr) {
                debug!(
                    "Client {} was connected for {:?}",
                    addr,
                    client.connected_at.elapsed()
                );
            }
            let _ = tokio::time::timeout(Duration::from_secs(1), sender_task).await;

            info!("Client {} cleaned up", addr);
        });
    }

    /// Forward engine events to subscribed clients.
    async fn run_event_fanout(
        shared: Arc<Shared>,
        mut events: broadcast::Receiver<RoundEvent>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                received = events.recv() => {
                    match received {
                        Ok(event) => shared.forward_event(event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Event fan-out lagged, {} events dropped", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    }

    /// Drop connections that have gone quiet.
    async fn run_cleanup_loop(shared: Arc<Shared>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut interval = interval(shared.config.cleanup_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown_rx.recv() => break,
            }

            let now = Instant::now();
            let idle_timeout = shared.config.idle_timeout;

            let mut clients = shared.clients.write().await;
            let before = clients.len();
            clients.retain(|addr, client| {
                let keep = now.duration_since(client.last_activity) <= idle_timeout;
                if !keep {
                    info!("Removed idle client {}", addr);
                    if let Some(close_tx) = client.close_tx.take() {
                        let _ = close_tx.send(());
                    }
                }
                keep
            });
            if clients.len() < before {
                debug!("{} idle clients removed", before - clients.len());
            }
        }
    }

    /// Signal every loop and connection to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Receiver that fires on [`RoundServer::shutdown`].
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.shared.clients.read().await.len()
    }
}

// =============================================================================
// REQUEST HANDLING
// =============================================================================

impl Shared {
    async fn touch(&self, addr: SocketAddr) {
        if let Some(client) = self.clients.write().await.get_mut(&addr) {
            client.last_activity = Instant::now();
        }
    }

    async fn participant(&self, addr: SocketAddr) -> Option<ParticipantId> {
        self.clients.read().await.get(&addr).and_then(|c| c.participant_id)
    }

    /// Handle one client message, returning the direct reply if any.
    async fn handle_client_message(&self, addr: SocketAddr, msg: ClientMessage) -> Option<ServerMessage> {
        let participant = self.participant(addr).await;
        if participant.is_none() && !msg.is_public() {
            return Some(ServerMessage::error(ErrorCode::NotAuthenticated, "Authenticate first"));
        }

        let reply = match msg {
            ClientMessage::Auth { token } => self.handle_auth(addr, &token).await,
            ClientMessage::Register { round_id } => match participant {
                Some(p) => self
                    .engine
                    .register(round_id, p)
                    .await
                    .map(|round| ServerMessage::Snapshot { round })
                    .unwrap_or_else(|e| engine_error(addr, &e)),
                None => return None,
            },
            ClientMessage::Guess { round_id, submission } => match participant {
                Some(p) => self
                    .engine
                    .submit_guess(round_id, p, &submission)
                    .await
                    .map(|verdict| ServerMessage::Verdict { round_id, verdict })
                    .unwrap_or_else(|e| engine_error(addr, &e)),
                None => return None,
            },
            ClientMessage::Snapshot { round_id } => self
                .engine
                .snapshot(round_id)
                .await
                .map(|round| ServerMessage::Snapshot { round })
                .unwrap_or_else(|e| engine_error(addr, &e)),
            ClientMessage::ListRounds => self
                .engine
                .open_rounds()
                .await
                .map(|rounds| ServerMessage::Rounds { rounds })
                .unwrap_or_else(|e| engine_error(addr, &e)),
            ClientMessage::Subscribe { round_id } => match self.engine.snapshot(round_id).await {
                Ok(_) => {
                    if let Some(client) = self.clients.write().await.get_mut(&addr) {
                        client.subscriptions.insert(round_id);
                    }
                    ServerMessage::Subscribed { round_id }
                }
                Err(e) => engine_error(addr, &e),
            },
            ClientMessage::Unsubscribe { round_id } => {
                if let Some(client) = self.clients.write().await.get_mut(&addr) {
                    client.subscriptions.remove(&round_id);
                }
                return None;
            }
            ClientMessage::Ping { timestamp } => ServerMessage::Pong {
                timestamp,
                server_time: Utc::now().timestamp_millis().max(0) as u64,
            },
        };

        Some(reply)
    }

    async fn handle_auth(&self, addr: SocketAddr, token: &str) -> ServerMessage {
        match validate_token(token, &self.auth) {
            Ok(claims) => {
                let participant_id = claims.participant_id();
                if let Some(client) = self.clients.write().await.get_mut(&addr) {
                    client.participant_id = Some(participant_id);
                }
                debug!("Client {} authenticated as {}", addr, participant_id.short());

                ServerMessage::AuthResult(AuthResult {
                    success: true,
                    participant_id: Some(participant_id),
                    error: None,
                    server_version: self.config.version.clone(),
                })
            }
            Err(e) => {
                debug!("Auth failed for {}: {}", addr, e);
                let error = ServerError::from(&e);
                ServerMessage::AuthResult(AuthResult {
                    success: false,
                    participant_id: None,
                    error: Some(error.message),
                    server_version: self.config.version.clone(),
                })
            }
        }
    }

    async fn forward_event(&self, event: RoundEvent) {
        let round_id = event.round_id();
        // Rejections are private to the guesser
        let only_to = match &event {
            RoundEvent::GuessRejected { participant_id, .. } => Some(*participant_id),
            _ => None,
        };

        let targets: Vec<mpsc::Sender<ServerMessage>> = self
            .clients
            .read()
            .await
            .values()
            .filter(|c| c.subscriptions.contains(&round_id))
            .filter(|c| only_to.is_none() || c.participant_id == only_to)
            .map(|c| c.sender.clone())
            .collect();

        for target in targets {
            if target.try_send(ServerMessage::Event { event: event.clone() }).is_err() {
                debug!("Dropped event for slow client on round {}", round_id.short());
            }
        }

        if event.is_terminal() {
            debug!("Round {} closed, subscribers notified", round_id.short());
        }
    }
}

fn engine_error(addr: SocketAddr, err: &EngineError) -> ServerMessage {
    if err.is_transient() {
        warn!("Request from {} failed: {}", addr, err);
    } else {
        debug!("Request from {} rejected: {}", addr, err);
    }
    ServerMessage::Error(ServerError::from(err))
}
