//! Contact Identity Daemon
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults (port 3000, production database)
//! contact-identity
//!
//! # Start with custom config
//! contact-identity --config /path/to/config.toml
//!
//! # Use the test database
//! APP_ENV=test contact-identity
//!
//! # Explicit database file and port
//! contact-identity --database-path ./contacts.db --http-port 8080
//! ```
//!
//! ## HTTP API
//!
//! - `GET /` - Liveness banner
//! - `GET /health` - Health check
//! - `POST /identify` - Resolve an email/phone pair

use clap::Parser;
use contact_identity::services::spawn_logging_listener;
use contact_identity::{Config, ContactDb, Environment, HttpServer, Services};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "contact-identity")]
#[command(about = "Contact identity resolution service")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "IDENTITY_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Explicit contacts database file
    #[arg(long, env = "DATABASE_PATH")]
    database_path: Option<PathBuf>,

    /// HTTP API port
    #[arg(long, env = "PORT")]
    http_port: Option<u16>,

    /// Deployment environment (selects the database file)
    #[arg(long, env = "APP_ENV", value_enum)]
    environment: Option<Environment>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Load `.env`, or `.env.test` when APP_ENV=test, before reading arguments
fn load_dotenv() {
    let environment = match std::env::var("APP_ENV").as_deref() {
        Ok("test") => Environment::Test,
        _ => Environment::Production,
    };
    let _ = dotenvy::from_filename(environment.dotenv_file());
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    load_dotenv();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("contact_identity={},info", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(path) = args.database_path {
        config.database_path = Some(path);
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    if let Some(environment) = args.environment {
        config.environment = environment;
    }

    info!(
        storage_dir = %config.storage_dir.display(),
        environment = ?config.environment,
        http_port = config.http_port,
        "Starting contact-identity"
    );

    // Ensure storage directory exists
    tokio::fs::create_dir_all(&config.storage_dir).await?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if args.config.is_none() && !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let contact_db = Arc::new(ContactDb::open(
        &config.database_path(),
        Duration::from_millis(config.busy_timeout_ms),
    )?);

    let services = Services::new(Arc::clone(&contact_db));
    let listener_handle = spawn_logging_listener(Arc::clone(&services.events));

    let http_addr = config.http_addr();
    let http_server = Arc::new(
        HttpServer::new(Arc::clone(&services.identify), http_addr)
            .with_max_body_bytes(config.max_body_bytes),
    );

    info!("HTTP API available at http://{}", http_addr);
    info!("Endpoints:");
    info!("  GET  /          - Liveness banner");
    info!("  GET  /health    - Health check");
    info!("  POST /identify  - Resolve contact identity");
    info!("Press Ctrl+C to stop.");

    // Handle shutdown signal
    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    };

    tokio::select! {
        result = http_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown => {}
    }

    listener_handle.abort();

    if let Ok(stats) = contact_db.stats() {
        info!(
            contacts = stats.contacts,
            primaries = stats.primaries,
            secondaries = stats.secondaries,
            "Final contact stats"
        );
    }

    Ok(())
}
