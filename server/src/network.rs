//! Server network layer: HTTP/WebSocket transport and the broker event loop

use crate::broker::{Broker, BrokerError};
use crate::config::ServerConfig;
use crate::fanout::Outbound;
use crate::BoxError;
use axum::body::Bytes;
use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{ClientEvent, ServerEvent, SessionId, EVENT_PATH};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, interval_at, Instant};
use tower_http::services::ServeDir;

/// Messages sent from connection tasks to the event loop
#[derive(Debug)]
pub enum ServerMessage {
    Connect {
        addr: SocketAddr,
        outbound: Outbound,
        reply: oneshot::Sender<Result<SessionId, BrokerError>>,
    },
    Event {
        client_id: SessionId,
        event: ClientEvent,
    },
    /// Any inbound frame that is not an event, e.g. a pong.
    Activity {
        client_id: SessionId,
    },
    Disconnect {
        client_id: SessionId,
    },
    Shutdown,
}

/// Cloneable handle for stopping a running server.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    server_tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        if self.server_tx.send(ServerMessage::Shutdown).is_err() {
            debug!("Shutdown requested after server stopped");
        }
    }
}

#[derive(Clone)]
struct AppState {
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    heartbeat_interval: Duration,
}

/// Relay server owning the broker and its event loop
pub struct Server {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    config: ServerConfig,
    broker: Broker,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, BoxError> {
        let broker = Broker::from_config(&config);
        Self::with_broker(config, broker).await
    }

    /// Binds the listener with a caller-supplied broker.
    pub async fn with_broker(config: ServerConfig, broker: Broker) -> Result<Self, BoxError> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener: Some(listener),
            local_addr,
            config,
            broker,
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            server_tx: self.server_tx.clone(),
        }
    }

    fn router(&self) -> Router {
        let state = AppState {
            server_tx: self.server_tx.clone(),
            heartbeat_interval: self.config.heartbeat_interval(),
        };

        let app = Router::new()
            .route(EVENT_PATH, get(ws_upgrade))
            .with_state(state);

        serve_static(app, &self.config.public_dir)
    }

    /// Processes one message from a connection task.
    ///
    /// Returns false once the loop should stop.
    fn handle_message(&mut self, message: ServerMessage) -> bool {
        match message {
            ServerMessage::Connect {
                addr,
                outbound,
                reply,
            } => {
                let result = self
                    .broker
                    .on_connect(addr, outbound)
                    .map(|session| session.player_id);

                if let Err(e) = &result {
                    warn!("Refusing connection from {}: {}", addr, e);
                }

                if let Err(Ok(client_id)) = reply.send(result) {
                    // The connection went away before it could be told its id.
                    self.broker.on_disconnect(client_id);
                }
            }
            ServerMessage::Event { client_id, event } => {
                self.broker.touch(client_id);
                self.broker.dispatch(client_id, event);
            }
            ServerMessage::Activity { client_id } => {
                self.broker.touch(client_id);
            }
            ServerMessage::Disconnect { client_id } => {
                self.broker.on_disconnect(client_id);
            }
            ServerMessage::Shutdown => {
                info!("Server shutting down");
                return false;
            }
        }
        true
    }

    /// Serves HTTP and runs the event loop until shutdown or a transport failure.
    pub async fn run(mut self) -> Result<(), BoxError> {
        let listener = self.listener.take().ok_or("server is already running")?;
        let app = self.router();

        let mut serve_task = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
        });

        let idle_timeout = self.config.idle_timeout;
        let sweep_period = idle_timeout
            .map(|timeout| timeout.min(Duration::from_secs(1)))
            .unwrap_or(Duration::from_secs(1));
        let mut sweep = interval(sweep_period);

        info!("Server started successfully");

        let result: Result<(), BoxError> = loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(message) => {
                            if !self.handle_message(message) {
                                break Ok(());
                            }
                        }
                        None => break Ok(()),
                    }
                },

                _ = sweep.tick(), if idle_timeout.is_some() => {
                    if let Some(timeout) = idle_timeout {
                        let expired = self.broker.expire_idle(timeout);
                        if !expired.is_empty() {
                            debug!("Expired {} idle connection(s)", expired.len());
                        }
                    }
                },

                served = &mut serve_task => {
                    break match served {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => {
                            error!("HTTP server failed: {}", e);
                            Err(e.into())
                        }
                        Err(e) => {
                            error!("HTTP server task panicked: {}", e);
                            Err(e.into())
                        }
                    };
                },
            }
        };

        serve_task.abort();
        result
    }
}

fn serve_static(app: Router, public_dir: &Path) -> Router {
    if public_dir.exists() {
        info!("Serving static assets from {:?}", public_dir);
        app.fallback_service(ServeDir::new(public_dir))
    } else {
        warn!(
            "Public directory {:?} does not exist, skipping static file serving",
            public_dir
        );
        app
    }
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, addr, state))
}

type WsSink = SplitSink<WebSocket, Message>;

async fn send_event(ws_tx: &mut WsSink, event: &ServerEvent) -> Result<(), axum::Error> {
    match event.encode() {
        Ok(text) => ws_tx.send(Message::Text(text.into())).await,
        Err(e) => {
            error!("Failed to encode {}: {}", event.name(), e);
            Ok(())
        }
    }
}

/// Drives one WebSocket connection until either side closes it.
///
/// Inbound frames are decoded and forwarded to the event loop; queued
/// outbound events are written in order; a ping goes out every heartbeat
/// so that live clients keep answering.
async fn handle_socket(socket: WebSocket, addr: SocketAddr, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = oneshot::channel();

    let connect = ServerMessage::Connect {
        addr,
        outbound: outbound_tx,
        reply: reply_tx,
    };
    if state.server_tx.send(connect).is_err() {
        return;
    }

    let client_id = match reply_rx.await {
        Ok(Ok(client_id)) => client_id,
        Ok(Err(BrokerError::ServerFull { .. })) => {
            let frame = CloseFrame {
                code: close_code::AGAIN,
                reason: Utf8Bytes::from_static("Server full"),
            };
            let _ = ws_tx.send(Message::Close(Some(frame))).await;
            return;
        }
        Err(_) => return,
    };

    let handshake = ServerEvent::Connect {
        player_id: client_id,
    };
    if send_event(&mut ws_tx, &handshake).await.is_ok() {
        pump(client_id, &mut ws_tx, &mut ws_rx, &mut outbound_rx, &state).await;
    }

    if state
        .server_tx
        .send(ServerMessage::Disconnect { client_id })
        .is_err()
    {
        debug!("Event loop gone before client {} disconnected", client_id);
    }
}

async fn pump(
    client_id: SessionId,
    ws_tx: &mut WsSink,
    ws_rx: &mut SplitStream<WebSocket>,
    outbound_rx: &mut mpsc::UnboundedReceiver<ServerEvent>,
    state: &AppState,
) {
    let period = state.heartbeat_interval;
    let mut heartbeat = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let message = match frame {
                    Some(Ok(Message::Text(text))) => match ClientEvent::decode(text.as_str()) {
                        Ok(event) => ServerMessage::Event { client_id, event },
                        Err(e) => {
                            warn!("Dropping frame from client {}: {}", client_id, e);
                            ServerMessage::Activity { client_id }
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => ServerMessage::Activity { client_id },
                    Some(Err(e)) => {
                        debug!("Connection error on client {}: {}", client_id, e);
                        break;
                    }
                };

                if state.server_tx.send(message).is_err() {
                    break;
                }
            },

            event = outbound_rx.recv() => {
                match event {
                    Some(event) => {
                        if let Err(e) = send_event(ws_tx, &event).await {
                            debug!("Failed to write to client {}: {}", client_id, e);
                            break;
                        }
                    }
                    None => {
                        // Detached by the broker, e.g. after an idle timeout.
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            },

            _ = heartbeat.tick() => {
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            },
        }
    }
}
