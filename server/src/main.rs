use clap::Parser;
use log::{error, info};
use server::config::{MovementPolicy, ServerConfig};
use server::network::Server;
use std::path::PathBuf;
use tokio::task::JoinError;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port serving both static assets and the event channel
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Directory of static presentation assets
    #[arg(long, default_value = "public")]
    public_dir: PathBuf,

    /// Maximum number of concurrent players
    #[arg(short, long, default_value = "32", value_parser = clap::value_parser!(u16).range(1..))]
    max_players: u16,

    /// Seconds of silence before a connection is dropped (0 disables)
    #[arg(long, default_value = "30")]
    idle_timeout: u64,

    /// How to handle movement payloads with missing fields
    #[arg(long, value_enum, default_value_t = MovementPolicy::Reject)]
    movement_policy: MovementPolicy,
}

#[tokio::main]
async fn main() -> Result<(), server::BoxError> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        public_dir: args.public_dir,
        max_players: args.max_players as usize,
        idle_timeout: ServerConfig::idle_timeout_from_secs(args.idle_timeout),
        movement_policy: args.movement_policy,
    };

    info!(
        "Starting relay: max {} players, idle timeout {:?}, {:?} movement policy",
        config.max_players, config.idle_timeout, config.movement_policy
    );

    let server = Server::new(config).await?;
    let handle = server.handle();
    let mut server_task = tokio::spawn(server.run());

    let result = tokio::select! {
        result = &mut server_task => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            handle.shutdown();
            server_task.await
        }
    };

    report_exit(result)
}

/// Logs how the server task ended and turns failures into the process error.
fn report_exit(
    result: Result<Result<(), server::BoxError>, JoinError>,
) -> Result<(), server::BoxError> {
    match result {
        Ok(Ok(())) => {
            info!("Server stopped");
            Ok(())
        }
        Ok(Err(e)) => {
            error!("Server stopped with error: {}", e);
            Err(e)
        }
        Err(e) => {
            error!("Server task panicked: {}", e);
            Err(e.into())
        }
    }
}
