use clap::Parser;
use coordinator::network::Server;
use log::info;
use shared::{Coord, GameConfig};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the RPC listener to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8081")]
    port: u16,

    /// Grid width in cells
    #[arg(long, default_value = "10")]
    width: i32,

    /// Grid height in cells
    #[arg(long, default_value = "10")]
    height: i32,

    /// Prey position as x,y
    #[arg(long, default_value = "5,5", value_parser = parse_coord)]
    prey: Coord,

    /// Node heartbeat interval in milliseconds
    #[arg(long, default_value = "1000")]
    heartbeat_ms: u64,

    /// Drop nodes silent for this many milliseconds
    #[arg(long, default_value = "5000")]
    node_timeout_ms: u64,
}

fn parse_coord(s: &str) -> Result<Coord, String> {
    let (x, y) = s.split_once(',').ok_or("expected x,y")?;
    let x = x.trim().parse().map_err(|e| format!("bad x: {}", e))?;
    let y = y.trim().parse().map_err(|e| format!("bad y: {}", e))?;
    Ok(Coord::new(x, y))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = GameConfig {
        width: args.width,
        height: args.height,
        prey_position: args.prey,
        heartbeat_interval_ms: args.heartbeat_ms,
        ..GameConfig::default()
    };
    info!(
        "Serving a {}x{} grid, prey at {}",
        config.width, config.height, config.prey_position
    );

    let address = format!("{}:{}", args.host, args.port);
    let server = Server::new(&address, config, Duration::from_millis(args.node_timeout_ms))
        .await
        .map_err(|e| e.to_string())?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
