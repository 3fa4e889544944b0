/// Restwright server entry point
///
/// Initializes configuration from the environment and starts the HTTP server.

use restwright::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Automation management API at /console/*
/// - Every live automation endpoint at its declared base path
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration (defaults to 0.0.0.0:8000 and data/automations)
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
