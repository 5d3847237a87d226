use anyhow::Context;
use clap::Parser;
use log::info;
use simplelog::{ColorChoice, Config as LogConfig, TermLogger, TerminalMode};

use callbridge_signaling_server::config::Config;
use callbridge_signaling_server::invites::InviteRegistry;
use callbridge_signaling_server::presence::PresenceRegistry;
use callbridge_signaling_server::relay::Relay;
use callbridge_signaling_server::rooms::RoomRegistry;
use callbridge_signaling_server::router::{self, ServerState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    TermLogger::init(
        config.log_level,
        LogConfig::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context("failed to initialize logging")?;

    let relay = Relay::new(
        PresenceRegistry::default(),
        RoomRegistry::default(),
        InviteRegistry::default(),
    );
    let app = router::create(ServerState::new(relay));

    info!("listening on {}", config.address);
    axum::Server::try_bind(&config.address)
        .with_context(|| format!("failed to bind {}", config.address))?
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            log::error!("failed to listen for ctrl-c: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                log::error!("failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping");
}
