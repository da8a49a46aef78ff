use std::sync::Arc;

use chat_presence::auth::StaticAuth;
use chat_presence::relay::{self, RelayState};
use chat_presence::transport::local::LocalBroker;
use chat_presence::transport::ws::WsTransport;
use chat_presence::{LifecycleSignal, PresenceConfig, PresenceError, PresenceSession};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("presence error: {0}")]
    Presence(#[from] PresenceError),
    #[error("failed to bind port {port}: {source}")]
    Bind { port: u16, source: std::io::Error },
    #[error("relay server failed: {0}")]
    Serve(std::io::Error),
    #[error("no signed-in user; pass --user or set PRESENCE_USER_ID")]
    SignedOut,
}

#[derive(Parser, Debug)]
#[command(name = "presence", about = "Chat presence relay and watcher")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the websocket presence relay.
    Serve {
        #[arg(long, env = "PORT", default_value_t = 4000)]
        port: u16,
    },
    /// Join presence as a user and log every change in the merged view.
    Watch {
        #[arg(long, env = "PRESENCE_USER_ID")]
        user: Option<Uuid>,
        #[arg(long)]
        conversation: Option<Uuid>,
        #[arg(long, env = "PRESENCE_RELAY_URL")]
        relay_url: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let dotenv = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    if let Ok(path) = &dotenv {
        tracing::debug!(path = %path.display(), "loaded environment file");
    }

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "presence command failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = PresenceConfig::from_env()?;
    match cli.command {
        Command::Serve { port } => serve(port, &config).await,
        Command::Watch { user, conversation, relay_url } => {
            let relay_url = relay_url.unwrap_or_else(|| config.relay_url.clone());
            watch(user, conversation, &relay_url, &config).await
        }
    }
}

async fn serve(port: u16, config: &PresenceConfig) -> Result<(), CliError> {
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .map_err(|source| CliError::Bind { port, source })?;
    let state = RelayState::new(LocalBroker::new(), config.naming.clone(), config.event_queue_capacity);
    relay::serve(listener, state).await.map_err(CliError::Serve)
}

async fn watch(
    user: Option<Uuid>,
    conversation: Option<Uuid>,
    relay_url: &str,
    config: &PresenceConfig,
) -> Result<(), CliError> {
    let auth = user.map_or_else(StaticAuth::signed_out, StaticAuth::signed_in);
    let transport = Arc::new(WsTransport::new(relay_url));
    let Some(session) = PresenceSession::start_for_current_user(&auth, transport, config).await? else {
        return Err(CliError::SignedOut);
    };
    if !session.signals().notify(LifecycleSignal::Foregrounded) {
        tracing::warn!("initial foreground signal not delivered");
    }
    if let Err(e) = session.set_active_conversation(conversation).await {
        session.shutdown().await;
        return Err(e.into());
    }

    let mut changes = session.store().subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let online = session.store().online_participants();
                tracing::info!(revision = *changes.borrow_and_update(), online = ?online, "presence changed");
            }
        }
    }

    session.shutdown().await;
    Ok(())
}
