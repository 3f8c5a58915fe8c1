use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use relayshare::{
    config::Settings,
    service::{EventReceiver, SessionEngine, SessionEvent, SessionState},
    utils::format_file_size,
};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "relayshare")]
#[command(about = "Relay-brokered peer sessions and file transfer")]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stay online, log presence and save incoming files until interrupted
    Run {
        /// Peer to link with once connected
        #[arg(long)]
        connect: Option<String>,
    },
    /// Link with a peer and send it one file
    Send {
        /// Target participant id
        #[arg(long)]
        to: String,

        file: PathBuf,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("relayshare={}", log_level).into()),
        )
        .init();

    let settings = Settings::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Config => {
            print!("{}", toml::to_string_pretty(&settings)?);
            Ok(())
        }
        Command::Run { connect } => run(settings, connect).await,
        Command::Send { to, file } => send(settings, &to, &file).await,
    }
}

async fn run(settings: Settings, connect: Option<String>) -> anyhow::Result<()> {
    info!("Starting relayshare v{}", env!("CARGO_PKG_VERSION"));
    let auto_reconnect = settings.network.auto_reconnect;
    let reconnect_delay = settings.reconnect_delay();

    let engine = SessionEngine::from_settings(settings)?;
    let mut lifecycle = engine.subscribe();
    tokio::spawn(log_events(engine.subscribe()));
    info!("🆔 Participant id: {}", engine.participant_id());

    if let Err(e) = go_online(&engine, connect.as_deref()).await {
        if !auto_reconnect {
            return Err(e);
        }
        warn!("⚠️ Initial connection failed: {}", e);
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let event = tokio::select! {
            result = &mut shutdown => {
                result?;
                info!("Shutdown signal received, stopping session...");
                break;
            }
            event = lifecycle.recv() => event,
        };

        match event {
            Some(SessionEvent::StateChanged(SessionState::Disconnected)) if auto_reconnect => {
                info!("⏳ Reconnecting in {:?}...", reconnect_delay);
                tokio::select! {
                    result = &mut shutdown => {
                        result?;
                        info!("Shutdown signal received, stopping session...");
                        break;
                    }
                    _ = tokio::time::sleep(reconnect_delay) => {}
                }
                if let Err(e) = go_online(&engine, connect.as_deref()).await {
                    warn!("⚠️ Reconnect failed: {}", e);
                }
            }
            Some(_) => {}
            None => {
                warn!("Event stream ended");
                break;
            }
        }
    }

    engine.dispose().await;
    info!("relayshare stopped");
    Ok(())
}

async fn go_online(engine: &SessionEngine, peer: Option<&str>) -> anyhow::Result<()> {
    engine.start().await?;
    if let Some(peer) = peer {
        engine.connect_to(peer).await?;
    }
    Ok(())
}

async fn send(settings: Settings, to: &str, file: &Path) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let file_name = file
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .context("file path has no file name")?;
    let wait = settings.request_timeout();

    let engine = SessionEngine::from_settings(settings)?;
    let mut events = engine.subscribe();
    engine.start().await?;
    engine.connect_to(to).await?;

    let accepted = tokio::time::timeout(wait, wait_for_link(&mut events, to)).await;
    match accepted {
        Ok(true) => info!("🔗 Linked with {}", to),
        Ok(false) => {
            engine.dispose().await;
            bail!("{} rejected the connection", to);
        }
        Err(_) => {
            engine.dispose().await;
            bail!("no answer from {} within {:?}", to, wait);
        }
    }

    let progress = tokio::spawn(log_events(events));
    let result = engine.send_file(to, &bytes, &file_name).await;
    engine.dispose().await;
    progress.abort();

    let report = result?;
    info!(
        "✅ Sent '{}' ({}) in {} chunks",
        report.file_name,
        format_file_size(report.bytes_sent),
        report.chunks
    );
    Ok(())
}

/// Returns whether `peer` accepted. A closed event stream counts as refusal.
async fn wait_for_link(events: &mut EventReceiver, peer: &str) -> bool {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::ConnectionStatusChanged {
                peer_id: Some(id),
                accepted,
            } if id == peer => return accepted,
            SessionEvent::SessionFailed(reason) => {
                error!("❌ Session failed: {}", reason);
                return false;
            }
            _ => {}
        }
    }
    false
}

async fn log_events(mut events: EventReceiver) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::StateChanged(state) => info!("Session state: {:?}", state),
            SessionEvent::ConnectionStatusChanged { peer_id, accepted } => info!(
                "Peer link {}: {}",
                peer_id.as_deref().unwrap_or("-"),
                if accepted { "accepted" } else { "closed" }
            ),
            SessionEvent::RosterChanged => info!("📋 Roster changed"),
            SessionEvent::InstanceInfo(Some(name)) => info!("Relay instance: {}", name),
            SessionEvent::InstanceInfo(None) => {}
            SessionEvent::UploadProgress(percent) => info!("📤 Upload {}%", percent),
            SessionEvent::FileReceived { from, path, bytes } => info!(
                "📥 {} from {} saved to {}",
                format_file_size(bytes),
                from.as_deref().unwrap_or("unknown sender"),
                path.display()
            ),
            SessionEvent::SessionFailed(reason) => error!("❌ Session failed: {}", reason),
        }
    }
}

async fn shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal;

    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
    }

    Ok(())
}
