use clap::Parser;
use log::{info, warn};
use server::framing::{read_message, write_message, ConnectionError};
use shared::{Message, SPEED_BOOST, SPEED_NORMAL};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{interval, MissedTickBehavior};

/// Headless player that joins an arena and circles until it dies
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Address of the arena server
    #[clap(short, long, default_value = "127.0.0.1:12345")]
    server: String,
    /// Passkey to present on connect
    #[clap(long, default_value = "slither")]
    passkey: String,
    /// Ask for boosted speed
    #[clap(long)]
    boost: bool,
    /// Degrees added to the heading on every input
    #[clap(long, default_value = "3.0")]
    turn_rate: f32,
    /// Inputs sent per second
    #[clap(long, default_value = "30")]
    input_rate: u32,
}

const READ_TIMEOUT: Duration = Duration::from_secs(10);
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let stream = TcpStream::connect(&args.server).await?;
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();
    info!("Connected to {}", args.server);

    write_message(&mut writer, &Message::Passkey(args.passkey.clone()), WRITE_TIMEOUT).await?;

    let identity = match read_message(&mut reader, READ_TIMEOUT).await? {
        Message::Identity(identity) => identity,
        other => return Err(format!("expected identity, got message type {}", other.msg_type()).into()),
    };
    info!("Playing as {}", identity);

    let speed = (if args.boost { SPEED_BOOST } else { SPEED_NORMAL }) as f32;
    let turn_rate = args.turn_rate;
    let input_rate = args.input_rate.max(1);
    let inputs = tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs_f64(1.0 / input_rate as f64));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut heading = 0.0f32;
        loop {
            ticker.tick().await;
            heading = (heading + turn_rate).rem_euclid(360.0);
            let input = Message::Input { heading, speed };
            if let Err(e) = write_message(&mut writer, &input, WRITE_TIMEOUT).await {
                warn!("Stopped sending input: {}", e);
                break;
            }
        }
    });

    let mut snapshots: u64 = 0;
    loop {
        match read_message(&mut reader, READ_TIMEOUT).await {
            Ok(Message::WorldSnapshot(snapshot)) => {
                snapshots += 1;
                if snapshots % 60 == 0 {
                    match snapshot.agent(&identity) {
                        Some(me) => info!(
                            "Tick {}: length {:.1}, {} agents and {} resources in view",
                            snapshot.tick,
                            me.length,
                            snapshot.agents.len(),
                            snapshot.resources.len()
                        ),
                        None => info!("Tick {}: not in view", snapshot.tick),
                    }
                }
            }
            Ok(Message::DeathNotice) => {
                info!("{} died after {} snapshots", identity, snapshots);
                break;
            }
            Ok(other) => warn!("Unexpected message type {}", other.msg_type()),
            Err(ConnectionError::Protocol(e)) if e.is_recoverable() => warn!("Skipping frame: {}", e),
            Err(e) => {
                warn!("Connection lost: {}", e);
                break;
            }
        }
    }

    inputs.abort();
    Ok(())
}
