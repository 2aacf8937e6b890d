mod config;
mod logging;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use meshcall_mesh::{HttpSignalingClient, ParticipantId, Session, SessionEvent, WebRtcBackend};

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "meshcall")]
#[command(about = "Full-mesh audio/video call participant", long_about = None)]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, short, env = "MESHCALL_CONFIG")]
    config: Option<String>,

    /// Participant name (random when not configured)
    #[arg(long, env = "MESHCALL_NAME")]
    name: Option<String>,

    /// Signaling relay base URL
    #[arg(long, env = "MESHCALL_SERVER")]
    server: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Join without sending audio
    #[arg(long)]
    no_audio: bool,

    /// Join without sending video
    #[arg(long)]
    no_video: bool,

    /// Accept self-signed relay certificates
    #[arg(long)]
    insecure: bool,
}

impl Args {
    /// Command line flags win over file and environment configuration
    fn apply(&self, config: &mut Config) {
        if let Some(name) = &self.name {
            config.participant = Some(name.clone());
        }
        if let Some(server) = &self.server {
            config.mesh.signaling.base_url = server.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.no_audio {
            config.mesh.audio = false;
        }
        if self.no_video {
            config.mesh.video = false;
        }
        if self.insecure {
            config.mesh.signaling.accept_invalid_certs = true;
        }
    }
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::ParticipantRemoved { participant, reason } => {
            warn!(participant = %participant, reason = ?reason, "Participant left");
        }
        SessionEvent::ConnectFailed { participant, error } => {
            warn!(participant = %participant, error = %error, "Connection attempt failed");
        }
        other => info!(event = ?other, "Session event"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration
    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);

    // 1.5. Validate configuration (fail fast on misconfigurations)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Meshcall starting...");

    let name = config
        .participant
        .clone()
        .unwrap_or_else(|| format!("user-{}", nanoid::nanoid!(8)));
    let participant = ParticipantId::new(name)?;
    info!(
        participant = %participant,
        relay = %config.mesh.signaling.base_url,
        audio = config.mesh.audio,
        video = config.mesh.video,
        "Configuration loaded"
    );

    // 3. Build relay client and media backend
    let signaling = Arc::new(HttpSignalingClient::new(&config.mesh.signaling)?);
    let backend = Arc::new(WebRtcBackend::new(&config.mesh)?);
    let session = Session::new(config.mesh.clone(), signaling, backend.clone(), backend);

    let mut events = session.subscribe();
    let event_logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log lagging behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // 4. Join and stay until interrupted
    let joined = session.join(participant).await?;
    info!(
        peers = ?joined.peers,
        relay_connected = joined.relay_connected,
        "Joined session, press Ctrl+C to leave"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    session.leave().await?;
    event_logger.abort();
    info!("Meshcall stopped");
    Ok(())
}
