use clap::{Parser, Subcommand};
use roomcall::peer::{RtcTransportFactory, SyntheticMediaSource};
use roomcall::signaling::relay::RelayServer;
use roomcall::{logger, Coordinator, CoordinatorConfig, LogUiSink, RoomId, SocketChannel};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "roomcall")]
#[command(about = "Room-based peer-to-peer calls over WebRTC", long_about = None)]
struct Args {
    /// JSON coordinator config; environment defaults apply when absent
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Signaling relay URL
    #[arg(long, global = true)]
    signaling: Option<String>,

    /// Send an audio track only
    #[arg(long, global = true)]
    audio_only: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the signaling relay
    Relay {
        #[arg(long, env = "ROOMCALL_RELAY_ADDR", default_value = "127.0.0.1:8765")]
        listen: String,
    },
    /// Create a room and wait for the other side
    Start,
    /// Answer the offer waiting in ROOM
    Join { room: String },
}

fn load_config(args: &Args) -> Result<CoordinatorConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => CoordinatorConfig::from_json_str(&std::fs::read_to_string(path)?)?,
        None => CoordinatorConfig::from_env(),
    };
    if let Some(url) = &args.signaling {
        config.signaling_url = url.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    logger::init();
    let args = Args::parse();

    let join_room = match &args.command {
        Command::Relay { listen } => {
            let server = RelayServer::bind(listen).await?;
            tokio::select! {
                res = server.run() => res?,
                _ = tokio::signal::ctrl_c() => info!("Relay shutting down"),
            }
            return Ok(());
        }
        Command::Start => None,
        Command::Join { room } => Some(RoomId::new(room.clone())),
    };

    let config = load_config(&args)?;
    let channel = SocketChannel::connect(&config.signaling_url).await?;
    let media = SyntheticMediaSource {
        audio: true,
        video: !args.audio_only,
    };
    let coordinator = Coordinator::new(
        config,
        Arc::new(channel),
        Arc::new(RtcTransportFactory::new()?),
        Arc::new(media),
        Arc::new(LogUiSink),
    );
    let (handle, task) = coordinator.spawn();

    match join_room {
        None => {
            let room = handle.start_call().await?;
            println!("Room: {}", room);
        }
        Some(room) => handle.join_call(room).await?,
    }

    tokio::signal::ctrl_c().await?;
    handle.hangup().await?;
    drop(handle);
    task.await?;
    Ok(())
}
