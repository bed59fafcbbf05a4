//! Cruise Guide back-office service
//!
//! Main entry point. This service provides:
//! - the JSON HTTP API used by the admin console, the chat-bot and the passport form
//! - a background housekeeping task for sessions and finished trips

use cruise_guide_backend::config::AppConfig;
use cruise_guide_backend::database::{create_pool, run_migrations};
use cruise_guide_backend::error::{AppError, AppResult};
use cruise_guide_backend::housekeeping::Housekeeper;
use cruise_guide_backend::{http, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "cruise_guide_backend={},sqlx=warn,tower_http=info",
            config.log_level
        )
        .into()
    });

    if config.log_format == "json" {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, shutting down gracefully...");
}

#[tokio::main]
async fn main() -> AppResult<()> {
    // Load environment variables first
    dotenv::dotenv().ok();

    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        AppError::Config(e)
    })?;

    init_tracing(&config);

    info!("Cruise Guide back office starting");
    info!("Environment: {}", config.environment);
    info!("Log level: {}", config.log_level);
    info!("HTTP port: {}", config.http_port);

    // =========================================================================
    // DATABASE SETUP
    // =========================================================================
    info!("Connecting to database...");

    let pool = create_pool(&config.database).await.map_err(|e| {
        error!("Failed to create database pool: {}", e);
        AppError::Database(e)
    })?;

    info!("Database connection pool created (max connections: {})", config.database.max_connections);

    info!("Running database migrations from {}...", config.migrations_path);
    run_migrations(&pool, Some(config.migrations_path.as_str()))
        .await
        .map_err(|e| {
            error!("Database migration failed: {}", e);
            AppError::Database(e)
        })?;
    info!("Database migrations completed successfully");

    // =========================================================================
    // SERVICES
    // =========================================================================
    if let Err(e) = tokio::fs::create_dir_all(&config.passport.upload_dir).await {
        warn!(
            "Could not create upload directory {}: {}",
            config.passport.upload_dir.display(),
            e
        );
    }

    let http_port = config.http_port;
    let housekeeping_interval = config.housekeeping_interval();
    let app_state = Arc::new(AppState::new(pool, config));

    if app_state.sms_client.is_simulation() {
        warn!("ALIGO_API_KEY not set - SMS gateway running in simulation mode");
    }

    // =========================================================================
    // BACKGROUND TASKS
    // =========================================================================
    let housekeeper = Housekeeper::new(app_state.user_service.clone(), housekeeping_interval);
    let housekeeping_handle = tokio::spawn(async move {
        housekeeper.start().await;
    });
    info!("Housekeeping task started ({:?} interval)", housekeeping_interval);

    // =========================================================================
    // HTTP SERVER
    // =========================================================================
    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Message(format!("Failed to bind HTTP server on {}: {}", addr, e)))?;

    info!("HTTP server listening on {}", addr);

    let app = http::router(app_state);
    let server = async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
    };

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!("HTTP server error: {}", e);
                return Err(AppError::Io(e));
            }
        }
        _ = housekeeping_handle => {
            error!("Housekeeping task exited unexpectedly");
        }
    }

    info!("Cruise Guide back office shutdown complete");
    Ok(())
}
