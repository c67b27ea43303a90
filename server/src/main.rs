use clap::Parser;
use log::{error, info};
use server::broadcast::default_workers;
use server::network::{Server, ServerConfig};
use shared::WorldConfig;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Multiplayer slither arena server")]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "12345")]
    port: u16,
    /// Simulation ticks per second
    #[clap(short, long, default_value = "60")]
    fps: u32,
    /// Publish a snapshot every N ticks
    #[clap(long, default_value = "1")]
    broadcast_every: u32,
    /// Passkey clients must present to join
    #[clap(long, default_value = "slither")]
    passkey: String,
    /// Maximum concurrent players
    #[clap(short, long, default_value = "200")]
    max_players: usize,
    /// Ambient resources kept on the map
    #[clap(long, default_value = "4000")]
    resource_floor: usize,
    /// Width and height of the square map
    #[clap(long, default_value = "3000")]
    map_size: i32,
    /// Send every player the full world instead of their visible part
    #[clap(long)]
    no_culling: bool,
    /// Receive timeout in milliseconds
    #[clap(long, default_value = "10000")]
    recv_timeout_ms: u64,
    /// Per-send timeout in milliseconds
    #[clap(long, default_value = "1000")]
    send_timeout_ms: u64,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            bind_addr: format!("{}:{}", self.host, self.port),
            fps: self.fps,
            broadcast_every: self.broadcast_every,
            passkey: self.passkey,
            max_players: self.max_players,
            recv_timeout: Duration::from_millis(self.recv_timeout_ms),
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            cull_snapshots: !self.no_culling,
            broadcast_workers: default_workers(self.max_players),
            world: WorldConfig {
                map_width: self.map_size,
                map_height: self.map_size,
                resource_floor: self.resource_floor,
                ..WorldConfig::default()
            },
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let config = args.into_config();
    info!(
        "Starting arena at {} fps, up to {} players, culling {}",
        config.fps,
        config.max_players,
        if config.cull_snapshots { "on" } else { "off" }
    );

    let server = Server::bind(config).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
