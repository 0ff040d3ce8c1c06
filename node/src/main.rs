use clap::Parser;
use log::{error, info};
use node::membership::TcpCoordinator;
use node::node::{NodeError, NodeSettings, PlayerNode};
use node::state::GameStateReplica;
use shared::Ed25519Crypto;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Coordinator address to register with
    #[arg(short = 's', long, default_value = "127.0.0.1:8081")]
    server: String,

    /// UDP address to listen for peers on
    #[arg(short = 'l', long, default_value = "127.0.0.1:0")]
    listen: String,

    /// How often to print the board, in milliseconds
    #[arg(short = 'r', long, default_value = "1000")]
    render_ms: u64,

    /// Timeout for coordinator calls in milliseconds
    #[arg(long, default_value = "2000")]
    rpc_timeout_ms: u64,
}

fn print_snapshot(snapshot: &GameStateReplica) {
    let mut players: Vec<_> = snapshot.player_locations.iter().collect();
    players.sort_by(|a, b| a.0.cmp(b.0));
    let line: Vec<String> = players
        .into_iter()
        .map(|(id, coord)| {
            let score = snapshot.scores.get(id).copied().unwrap_or(0);
            format!("{} @ {} [{}]", id, coord, score)
        })
        .collect();
    println!("prey @ {}  {}", snapshot.prey_position, line.join("  "));
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting node...");
    info!("Registering with: {}", args.server);
    info!("Controls: up/down/left/right to move, quit to leave");

    let settings = NodeSettings {
        listen_addr: args.listen,
        render_interval: Duration::from_millis(args.render_ms),
    };
    let coordinator = TcpCoordinator::new(args.server, Duration::from_millis(args.rpc_timeout_ms));

    let node = match PlayerNode::start(settings, coordinator, Arc::new(Ed25519Crypto::generate())).await {
        Ok(node) => node,
        Err(NodeError::Membership(e)) if e.is_identity_error() => {
            error!("Registration rejected: {}", e);
            std::process::exit(2);
        }
        Err(e) => return Err(e.into()),
    };

    let (input_tx, input_rx) = mpsc::channel(32);
    let (snapshot_tx, mut snapshot_rx) = mpsc::channel(4);

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if input_tx.send(line).await.is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(snapshot) = snapshot_rx.recv().await {
            print_snapshot(&snapshot);
        }
    });

    tokio::select! {
        _ = node.run(input_rx, snapshot_tx) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    node.stop().await;
    Ok(())
}
