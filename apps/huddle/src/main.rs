use anyhow::{anyhow, Context};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use huddle::capture::{MediaConstraints, SyntheticCapture, VideoConstraints};
use huddle::negotiation::webrtc::WebRtcFactory;
use huddle::telemetry::logging::{self, LogConfig, LogLevel};
use huddle::{acquire_local_media, LogPresenter, Mesh, MeshError, PeerConfig, RelayLink};

#[derive(Parser, Debug)]
#[command(name = "huddle")]
#[command(about = "Join a full-mesh video call through a huddle relay")]
struct Cli {
    /// Relay address, e.g. ws://127.0.0.1:8080 or relay.example.com
    #[arg(long, env = "HUDDLE_RELAY_URL")]
    relay: Option<String>,

    /// Name shown to the other participants
    #[arg(short, long, env = "HUDDLE_NAME")]
    name: Option<String>,

    /// STUN/TURN server URL; repeat for several
    #[arg(long = "stun")]
    stun: Vec<String>,

    /// Also capture audio
    #[arg(long)]
    audio: bool,

    /// Join without sending video
    #[arg(long)]
    no_video: bool,

    #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, mut config: PeerConfig) -> PeerConfig {
        if let Some(relay) = &self.relay {
            config.relay = relay.clone();
        }
        if let Some(name) = self.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            config.display_name = Some(name.to_owned());
        }
        if !self.stun.is_empty() {
            config.ice_servers = self.stun.clone();
        }
        config.constraints = MediaConstraints {
            video: (!self.no_video).then(VideoConstraints::default),
            audio: self.audio,
        };
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&LogConfig {
        level: cli.log_level,
        file: cli.log_file.clone(),
    })?;

    let config = cli.apply(PeerConfig::from_env());
    let display_name = config
        .display_name
        .clone()
        .ok_or_else(|| anyhow!("a display name is required (--name or HUDDLE_NAME)"))?;
    let relay_url = config.relay_url()?;

    let presenter = Arc::new(LogPresenter);
    let local_media = if config.constraints.requests_media() {
        acquire_local_media(
            &SyntheticCapture::default(),
            &config.constraints,
            presenter.as_ref(),
        )
        .await
    } else {
        None
    };
    let factory = Arc::new(
        WebRtcFactory::new(&config.ice_servers).context("failed to initialise media stack")?,
    );

    let mut link = RelayLink::connect(&relay_url).await?;
    let mesh = Mesh::builder(display_name)
        .local_media(local_media)
        .build(factory, presenter, link.sender());
    info!(id = %mesh.local_id(), relay = %relay_url, "joining call");

    let outcome = mesh
        .run(&mut link, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;
    link.close().await;

    match outcome {
        Ok(()) => Ok(()),
        Err(MeshError::RelayClosed) => {
            error!("relay connection lost");
            eprintln!("huddle: lost connection to the relay");
            std::process::exit(1);
        }
        Err(err) => Err(err.into()),
    }
}
