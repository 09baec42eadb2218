//! # Azumi Backend - Main Application Entry Point
//!
//! Runs the companion core behind a small local API for the avatar renderer
//! and the configuration panel.
//!
//! ## Application Architecture:
//! - **config**: application configuration (TOML file + environment variables)
//! - **audio**: PCM codec, frame sources, capture pipeline, playback scheduler
//! - **live**: wire protocol and WebSocket transport to the speech service
//! - **companion**: the orchestrator task (emotion, transcripts, memory)
//! - **state**: shared application state and request metrics
//! - **health**: health and metrics endpoints
//! - **handlers**: HTTP handlers for config and session control
//! - **websocket**: the `/ws/avatar` state feed
//! - **middleware**: request metrics
//! - **error**: error types and HTTP error responses

mod audio;
mod companion;
mod config;
mod error;
mod handlers;
mod health;
mod live;
mod middleware;
mod state;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use companion::memory::FileMemoryStore;
use companion::orchestrator::CompanionParts;
use config::AppConfig;
use live::transport::WsConnector;
use state::AppState;
use std::sync::Arc;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    // a missing .env file is fine
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting azumi-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    info!(
        input = %config.audio.input,
        output = %config.audio.output,
        model = %config.live.model,
        "Audio and live settings"
    );
    if config.live.api_key.is_empty() {
        info!("No API key configured, sessions will likely be rejected by the service");
    }

    // The orchestrator runs on the actix system runtime, next to the server.
    let parts = CompanionParts {
        connector: Box::new(WsConnector),
        store: Box::new(FileMemoryStore::new(&config.memory.path)),
        transcript_capacity: config.memory.transcript_capacity,
    };
    let audio_config = config.audio.clone();
    let (companion, companion_task) = companion::spawn_companion(
        parts,
        Arc::new(audio::open_frame_source),
        config.audio.sensitivity,
        move |on_complete| audio::open_output(&audio_config, on_complete),
    )?;

    let app_state = AppState::new(config.clone(), companion.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        // The renderer is served from another origin during development.
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(TracingLogger::default())
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/session/start", web::post().to(handlers::start_session))
                    .route("/session/stop", web::post().to(handlers::stop_session))
                    .route("/state", web::get().to(handlers::get_state))
                    .route("/avatar", web::get().to(handlers::get_avatar))
                    .route("/transcripts", web::get().to(handlers::get_transcripts))
                    .route("/memory", web::get().to(handlers::get_memory)),
            )
            .route("/ws/avatar", web::get().to(websocket::avatar_websocket))
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
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
        signal = wait_for_shutdown() => {
            if let Err(e) = signal {
                error!("Signal handler failed: {}", e);
            }
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    // closes the live session and silences playback
    companion.shutdown();
    if let Err(e) = companion_task.await {
        error!("Companion task ended abnormally: {}", e);
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Structured console logging. `RUST_LOG` overrides the default filter
/// `azumi_backend=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "azumi_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolves on SIGTERM or SIGINT (Ctrl+C).
#[cfg(unix)]
async fn wait_for_shutdown() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    Ok(())
}
