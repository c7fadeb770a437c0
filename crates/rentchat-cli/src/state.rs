//! Application state wiring the engine to concrete infrastructure.

use anyhow::Context;

use rentchat_core::session::SessionEngine;
use rentchat_infra::config::load_config;
use rentchat_infra::filesystem::{database_url, resolve_data_dir};
use rentchat_infra::gateway::HttpReservationGateway;
use rentchat_infra::sqlite::session::SqliteSessionStore;
use rentchat_types::config::ChatConfig;

/// The engine pinned to the SQLite store and the HTTP gateway.
pub type ConcreteEngine = SessionEngine<HttpReservationGateway, SqliteSessionStore>;

pub struct AppState {
    pub engine: ConcreteEngine,
    pub config: ChatConfig,
}

impl AppState {
    /// Resolve the data directory, load config, open the database and build
    /// the engine. Persisted sessions are hydrated before returning.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let config = load_config(&data_dir).await;

        let store = SqliteSessionStore::connect(&database_url(&data_dir))
            .await
            .context("Failed to open session database")?;
        let gateway =
            HttpReservationGateway::new(&config).context("Failed to build reservation gateway")?;

        let engine = SessionEngine::new(gateway, store, config.sync.clone());
        engine.hydrate().await;

        Ok(Self { engine, config })
    }
}
