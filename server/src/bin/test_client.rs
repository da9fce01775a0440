//! Headless client for poking at a running relay.
//!
//! Joins the relay, logs every event it receives and, if asked, walks back
//! and forth along a fixed path sending `playerMovement` events.

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use log::{info, warn};
use shared::{ClientEvent, MovementPayload, ServerEvent, SessionId, EVENT_PATH};
use std::time::Duration;
use tokio::time::interval;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8081")]
    server: String,

    /// Number of movement events to send (0 only listens)
    #[arg(short = 'm', long, default_value = "0")]
    moves: u32,

    /// Delay between movement events in milliseconds
    #[arg(short = 'i', long, default_value = "50")]
    interval_ms: u64,
}

/// Horizontal walk between two posts, turning around at each end.
struct Walker {
    x: f64,
    y: f64,
    step: f64,
}

impl Walker {
    const LEFT: f64 = 100.0;
    const RIGHT: f64 = 700.0;

    fn next(&mut self) -> MovementPayload {
        self.x = (self.x + self.step).clamp(Self::LEFT, Self::RIGHT);
        let at_post = (self.step > 0.0 && self.x >= Self::RIGHT)
            || (self.step < 0.0 && self.x <= Self::LEFT);
        if at_post {
            self.step = -self.step;
        }
        MovementPayload::new(self.x, self.y, self.step < 0.0)
    }
}

fn describe(event: &ServerEvent) -> String {
    match event {
        ServerEvent::Connect { player_id } => format!("connected as {}", player_id),
        ServerEvent::CurrentPlayers(players) => format!("{} player(s) online", players.len()),
        ServerEvent::NewPlayer(session) => format!(
            "player {} joined team {:?} at ({}, {})",
            session.player_id, session.team, session.x, session.y
        ),
        ServerEvent::PlayerMoved(session) => format!(
            "player {} moved to ({}, {}) flip={}",
            session.player_id, session.x, session.y, session.flip_x
        ),
        ServerEvent::PlayerDisconnect(id) => format!("player {} left", id),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let url = format!("ws://{}{}", args.server, EVENT_PATH);

    info!("Connecting to {}", url);
    let (socket, _) = connect_async(url.as_str()).await?;
    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut walker = Walker {
        x: 0.0,
        y: 0.0,
        step: 10.0,
    };
    let mut own_id: Option<SessionId> = None;
    let mut spawned = false;
    let mut remaining = args.moves;
    let mut ticker = interval(Duration::from_millis(args.interval_ms.max(1)));

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => match ServerEvent::decode(text.as_str()) {
                        Ok(event) => {
                            match &event {
                                ServerEvent::Connect { player_id } => own_id = Some(*player_id),
                                ServerEvent::CurrentPlayers(players) => {
                                    if let Some(own) = own_id.and_then(|id| players.get(&id)) {
                                        info!(
                                            "Spawned on team {:?} at ({}, {})",
                                            own.team, own.x, own.y
                                        );
                                        walker.x = own.x;
                                        walker.y = own.y;
                                        spawned = true;
                                    }
                                }
                                _ => {}
                            }
                            info!("{}", describe(&event));
                        }
                        Err(e) => warn!("Undecodable event: {}", e),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        info!("Server closed the connection: {:?}", frame);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => break,
                }
            }

            _ = ticker.tick(), if spawned && remaining > 0 => {
                let text = ClientEvent::PlayerMovement(walker.next()).encode()?;
                ws_tx.send(Message::Text(text.into())).await?;
                remaining -= 1;
                if remaining == 0 {
                    info!("Sent {} movement event(s)", args.moves);
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Disconnecting");
                ws_tx.send(Message::Close(None)).await?;
                break;
            }
        }
    }

    Ok(())
}
