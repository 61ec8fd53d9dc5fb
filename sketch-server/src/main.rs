use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, error, info, warn};

use sketch_core::WordBank;
use sketch_persistence::{DatabaseManager, connection::connect_and_migrate};
use sketch_server::{
    change_feed::ChangeFeed, config::Config, create_routes, session_manager::SessionManager,
    websocket::ConnectionManager,
};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    info!("Starting sketch server...");

    let config = Config::new();

    info!("Loading words from directory: {}", config.words_directory);
    let words = match WordBank::from_directory(&config.words_directory) {
        Ok(words) => words,
        Err(e) => {
            error!(
                "Failed to load words from directory '{}': {}",
                config.words_directory, e
            );
            error!("Set WORDS_DIRECTORY to a directory containing .txt word files.");
            std::process::exit(1);
        }
    };

    let db = match connect_and_migrate(&config.database_url).await {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to connect to database and run migrations: {}", e);
            std::process::exit(1);
        }
    };

    let feed = Arc::new(ChangeFeed::new());
    let connection_manager = Arc::new(ConnectionManager::new());
    let session_manager = Arc::new(SessionManager::new(
        DatabaseManager::from_connection(db),
        feed.clone(),
        words,
        config.session.clone(),
    ));

    let routes = create_routes(connection_manager.clone(), session_manager.clone());

    // The host is one more peer running timers for every watched session.
    let tick_session_manager = session_manager.clone();
    let tick_interval = Duration::from_millis(config.tick_interval_ms.max(50));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_interval);
        loop {
            interval.tick().await;
            let applied = tick_session_manager.tick_active(Utc::now()).await;
            if applied > 0 {
                debug!("Ticker applied {} transition(s)", applied);
            }
        }
    });

    // Start cleanup task
    let cleanup_connection_manager = connection_manager.clone();
    let cleanup_session_manager = session_manager.clone();
    let connection_timeout = Duration::from_secs(config.connection_timeout_seconds);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;

            let seats = cleanup_connection_manager
                .cleanup_inactive_connections(connection_timeout)
                .await;
            for seat in seats {
                if cleanup_connection_manager.has_seat(seat).await {
                    continue;
                }
                if let Err(e) = cleanup_session_manager
                    .disconnect(seat.session_id, seat.user_id)
                    .await
                {
                    warn!("Failed to mark {} offline: {}", seat.user_id, e);
                }
            }
            feed.prune_idle();
        }
    });

    let ip = match config.host.parse::<std::net::IpAddr>() {
        Ok(ip) => ip,
        Err(e) => {
            error!("Invalid HOST '{}': {}", config.host, e);
            std::process::exit(1);
        }
    };
    info!("Server starting on {}:{}", ip, config.port);

    let (addr, server) =
        warp::serve(routes).bind_with_graceful_shutdown((ip, config.port), shutdown_signal());

    info!(
        "Server started successfully on {}. Press Ctrl+C to stop.",
        addr
    );
    server.await;
    info!("Server shutdown complete.");
}

/// Resolves on SIGINT or SIGTERM (Ctrl+C elsewhere).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let (mut sigint, mut sigterm) = match (
            signal::unix::signal(signal::unix::SignalKind::interrupt()),
            signal::unix::signal(signal::unix::SignalKind::terminate()),
        ) {
            (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
            _ => {
                error!("Failed to install signal handlers; stop the process externally");
                std::future::pending::<()>().await;
                return;
            }
        };

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down gracefully...");
    }
}
