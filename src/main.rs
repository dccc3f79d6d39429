//! # Realtime Relay - Server Entry Point
//!
//! Starts the Actix-web server that pairs every browser/voice-client socket
//! with a socket to the realtime speech service.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: the server and every relay run on the async runtime
//! - **Result<T, E>**: startup failures bubble up through `anyhow::Result`
//! - **static AtomicBool**: a process-wide shutdown flag set by signal handlers
//!
//! ## Application Architecture:
//! - **config**: defaults, `config.toml`, `APP_*` and the special `HOST`/`PORT`/`OPENAI_API_KEY`
//! - **state**: shared configuration and relay counters
//! - **server**: routes, CORS and port binding with retry
//! - **websocket** / **upstream**: the two halves of each relay

use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use realtime_relay::config::AppConfig;
use realtime_relay::middleware;
use realtime_relay::server;
use realtime_relay::state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set by the signal handlers; polled by [`wait_for_shutdown`].
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The server entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from `.env`, `config.toml` and the environment
/// 2. **Sets up logging**
/// 3. **Binds a port**, moving to the next one while the port is in use
/// 4. **Runs the HTTP server** with CORS, logging and metrics middleware
/// 5. **Shuts down gracefully** on SIGINT/SIGTERM
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;
    realtime_relay::install_crypto_provider();

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting realtime-relay v{}", env!("CARGO_PKG_VERSION"));
    if config.upstream.api_key.is_none() {
        warn!("OPENAI_API_KEY is not set; /api/key and /ws will report an error");
    }

    let (listener, port) = server::bind_with_port_retry(
        &config.server.host,
        config.server.port,
        config.server.port_retry_limit,
    )?;
    info!("Server running on http://{}:{}", config.server.host, port);

    let app_state = AppState::new(config.clone());
    setup_signal_handlers();

    let server = HttpServer::new(move || {
        let config = app_state.config();
        let cors = server::build_cors(&config.cors);
        let static_dir = config.server.static_dir.clone();

        // Middleware runs in reverse registration order on the way in.
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .configure(|cfg| server::configure_routes(cfg, &static_dir))
    })
    .listen(listener)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize tracing.
///
/// `RUST_LOG` controls verbosity; the default is
/// `realtime_relay=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "realtime_relay=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM and SIGINT and raise the shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
