// src/main.rs
use stow_it_now::api;
use stow_it_now::config::AppConfig;
use stow_it_now::engine::Warehouse;
use stow_it_now::persistence::InMemoryStore;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    if let Err(err) = dotenvy::dotenv() {
        if !matches!(err, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            tracing::warn!(error = %err, "Could not load .env");
        }
    }

    let app_config = AppConfig::from_env();

    let store = if app_config.store.seed_demo_data() {
        InMemoryStore::with_demo_data()
    } else {
        InMemoryStore::new()
    };

    tracing::info!("Warehouse service starting...");
    let warehouse = match Warehouse::open(store, app_config.engine) {
        Ok(warehouse) => warehouse.into_shared(),
        Err(err) => {
            tracing::error!(error = %err, "Could not open warehouse");
            return;
        }
    };

    let addr = app_config.api.socket_addr();
    if let Err(err) = api::start_api_server(app_config.api, warehouse).await {
        tracing::error!(%addr, error = %err, "API server terminated with an error");
    }
}
