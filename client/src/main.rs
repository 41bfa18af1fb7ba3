use clap::Parser;
use client::config::ClientConfig;
use client::network::Client;
use client::ClientError;
use log::{info, warn};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:12000")]
    server: String,

    /// Stop after this many seconds (runs until Ctrl+C when omitted)
    #[arg(short = 'd', long)]
    duration: Option<u64>,

    /// Only watch snapshots, never claim cells
    #[arg(long)]
    no_bot: bool,

    /// Request a new game after each game over
    #[arg(long)]
    auto_restart: bool,

    /// Heartbeat interval in milliseconds
    #[arg(long, default_value = "1000")]
    heartbeat_ms: u64,

    /// Latency samples kept for metrics
    #[arg(long, default_value = "256")]
    history: usize,

    /// Give up after this many CLIENT_INIT attempts
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Grid width in cells, must match the server
    #[arg(long, default_value_t = shared::DEFAULT_GRID_WIDTH)]
    grid_width: u8,

    /// Grid height in cells, must match the server
    #[arg(long, default_value_t = shared::DEFAULT_GRID_HEIGHT)]
    grid_height: u8,

    /// Shortest wait between bot claims in milliseconds
    #[arg(long, default_value = "50")]
    bot_min_ms: u64,

    /// Longest wait between bot claims in milliseconds
    #[arg(long, default_value = "200")]
    bot_max_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut config = ClientConfig {
        server_address: args.server.parse()?,
        heartbeat_interval: Duration::from_millis(args.heartbeat_ms),
        history_capacity: args.history,
        grid_width: args.grid_width,
        grid_height: args.grid_height,
        bot_enabled: !args.no_bot,
        bot_min_interval: Duration::from_millis(args.bot_min_ms),
        bot_max_interval: Duration::from_millis(args.bot_max_ms),
        auto_restart: args.auto_restart,
        ..ClientConfig::default()
    };
    config.backoff.max_attempts = args.max_attempts;

    info!("Starting client...");
    info!("Connecting to: {}", config.server_address);

    let mut client = Client::new(config).await?;

    tokio::select! {
        result = client.run(args.duration.map(Duration::from_secs)) => {
            match result {
                Err(ClientError::GameAlreadyOver { winner }) => {
                    warn!("Joined after the game ended (winner: {:?})", winner);
                }
                other => other?,
            }
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        },
    }

    let report = client.metrics_report();
    info!("Final metrics: {:?}", report);

    Ok(())
}
