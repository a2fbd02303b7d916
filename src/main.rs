//! Drone Combat host - headless authoritative session
//!
//! Runs one host simulation with scripted pilots and in-process spectator
//! clients, then prints the session summary as JSON.

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use drone_combat::config::Config;
use drone_combat::session::{HostSession, SessionHandle};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level, config.log_json);

    info!("Starting Drone Combat host");
    info!(
        seed = config.session_seed,
        bots_per_team = config.bots_per_team,
        spectators = config.spectators,
        ticks = config.session_ticks,
        "session configuration"
    );

    let (session, handle) = HostSession::new(&config)?;
    info!(session_id = %session.id(), "session created");

    tokio::spawn(stop_on_signal(handle));

    let summary = session.run_with_spectators().await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    info!("Host shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}

/// Stop the session on Ctrl+C or SIGTERM
async fn stop_on_signal(handle: SessionHandle) {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(%error, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping session");
        }
        _ = terminate => {
            info!("Received terminate signal, stopping session");
        }
    }
    handle.stop();
}
