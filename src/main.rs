use ridehail_reconciler::{bootstrap, config::Settings, server};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,ridehail_reconciler=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {:?}", e);
    }
    info!("🛑 Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    dotenv::dotenv().ok();

    // Initialize tracing
    init_tracing();

    info!("🚀 Starting Ridehail Trip Reconciliation Engine");

    let settings = Settings::load()?;
    let app = bootstrap::initialize_application(&settings).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_handle = app.scheduler.clone().start(shutdown_rx);

    // Create HTTP server
    let router = server::create_app(app.state);

    // Run the Server
    server::run_server(router, &settings.bind_address, shutdown_signal()).await?;

    // Let the in-flight cycle finish before exiting
    shutdown_tx.send(true).ok();
    if let Err(e) = scheduler_handle.await {
        error!("Scheduler task ended abnormally: {:?}", e);
    }

    info!("👋 Reconciliation engine stopped");
    Ok(())
}
