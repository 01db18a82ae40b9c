use std::sync::Arc;

use dotenvy::dotenv;
use log::{error, info};

use botforge::config::AppConfig;
use botforge::gateway::discord::DiscordGateway;
use botforge::manager::BotLifecycleManager;
use botforge::relay::StatusRelay;
use botforge::shared::models::StatusEvent;
use botforge::shared::state::AppState;
use botforge::shared::utils::create_conn;
use botforge::storage::DatabaseStorage;
use botforge::{api, storage};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .write_style(env_logger::WriteStyle::Always)
        .init();

    let config = Arc::new(AppConfig::from_env()?);

    let pool = create_conn(&config.database_url)?;
    let database = DatabaseStorage::new(pool);
    if let Err(e) = database.seed_templates() {
        error!("Failed to seed template catalog: {}", e);
    }
    let storage: Arc<dyn storage::BotStore> = Arc::new(database);

    let gateway = Arc::new(DiscordGateway::new());
    let manager = Arc::new(BotLifecycleManager::new(storage.clone(), gateway));
    let relay = Arc::new(StatusRelay::new());

    let relay_for_events = relay.clone();
    manager.on_status_change(move |bot_id, status, data| {
        relay_for_events.broadcast(&StatusEvent::bot_status_change(bot_id, status, data));
    });

    let state = AppState::new(config.clone(), storage, manager, relay);
    let app = api::router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
