//! # Audio Ingest Backend - Main Application Entry Point
//!
//! An Actix-web service that receives an audio recording as a sequence of
//! numbered binary chunks, appends them into one continuous stream file per
//! upload session, and transcodes the assembled stream into a single
//! playable audio file with ffmpeg.
//!
//! ## Application Architecture:
//! - **config**: Application configuration (TOML files + environment variables)
//! - **state**: Shared application state and request metrics
//! - **health**: Liveness and metrics endpoints
//! - **middleware**: Request logging and per-endpoint metrics collection
//! - **handlers**: HTTP adapters for the upload protocol
//! - **upload**: The core pipeline (session store, stream assembly,
//!   stability detection, encoder invocation, deferred cleanup)
//! - **error**: Error taxonomy and HTTP error responses

mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod state;
mod upload;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upload::{FfmpegEncoder, UploadService};

/// Global shutdown signal, set by the SIGTERM/SIGINT handlers and polled by
/// the main task so the server can stop gracefully.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## What this function does:
/// 1. Loads and validates configuration
/// 2. Sets up structured logging
/// 3. Builds the upload pipeline (storage roots, encoder, cleanup worker)
/// 4. Configures the HTTP server with middleware and routes
/// 5. Handles graceful shutdown on system signals
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting audio-ingest-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Storage roots: uploads={} tmp={}",
        config.storage.upload_root, config.storage.tmp_root
    );

    // Build the pipeline once at startup: this creates both storage roots
    // and spawns the single deferred-cleanup worker.
    let encoder = Arc::new(FfmpegEncoder::new(config.encoder.clone()));
    let uploads = Arc::new(UploadService::new(&config, encoder)?);

    let app_state = AppState::new(config.clone(), uploads);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/upload/session", web::post().to(handlers::create_session))
                    .route("/upload/chunk", web::post().to(handlers::upload_chunk))
                    .route("/upload/finalize", web::post().to(handlers::finalize_upload)),
            )
            // Health check at root level for load balancers
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Race the server against the shutdown signal
    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
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

/// Initialize tracing for console output, honoring `RUST_LOG` and falling
/// back to a sensible per-crate default.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audio_ingest_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Install SIGTERM/SIGINT handlers that flip the global shutdown flag so the
/// server can finish in-flight requests before exiting.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll the shutdown flag every 100 ms until it is set.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
