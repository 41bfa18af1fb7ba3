use clap::Parser;
use log::{error, info};
use server::{Server, ServerConfig};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Snapshot broadcasts per second
    #[arg(short, long, default_value = "20")]
    tick_rate: u32,

    /// Maximum number of concurrent players
    #[arg(short, long, default_value = "4")]
    max_clients: usize,

    /// Seconds of silence before a player is dropped
    #[arg(long, default_value = "10")]
    heartbeat_timeout: u64,

    /// Grid width in cells
    #[arg(long, default_value_t = shared::DEFAULT_GRID_WIDTH)]
    grid_width: u8,

    /// Grid height in cells
    #[arg(long, default_value_t = shared::DEFAULT_GRID_HEIGHT)]
    grid_height: u8,

    /// Do not claim the spawn cell when a player joins
    #[arg(long)]
    no_spawn_claim: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let bind_address: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;

    let config = ServerConfig {
        bind_address,
        tick_rate_hz: args.tick_rate,
        max_clients: args.max_clients,
        heartbeat_timeout: Duration::from_secs(args.heartbeat_timeout),
        grid_width: args.grid_width,
        grid_height: args.grid_height,
        claim_spawn_cell: !args.no_spawn_claim,
        ..ServerConfig::default()
    };

    info!("Starting server on {}", config.bind_address);
    let mut server = Server::new(config).await?;
    let handle = server.handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            handle.shutdown();
        }
    });

    if let Err(e) = server.run().await {
        error!("Server stopped with error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
