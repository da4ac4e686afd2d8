//! Cardsync sync server
//!
//! Serves a card database to replicating clients.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cardsync::api::{create_router, AppState};
use cardsync::cards::CardStore;
use cardsync::config::Config;
use cardsync::db::DocumentStore;
use cardsync::lookup::CardIndex;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting cardsync server");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Index path: {:?}", config.index_path);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (CARDSYNC_API_PSK). Authentication is disabled!");
    }

    let store = DocumentStore::open(&config.db_path).await?;
    tracing::info!("Serving database {}", store.instance_id());

    // Keep a card index next to the database, fed by the change feed.
    let cards = CardStore::new(store.clone());
    let index = CardIndex::open(&config.index_path)?;
    index.rebuild(&cards.get_cards().await?).await?;
    let mut events = cards.subscribe();
    tokio::spawn(async move {
        loop {
            match index.follow(&mut events).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => tracing::warn!("Card index update failed: {}", err),
            }
        }
    });

    let state = AppState {
        store,
        config: Arc::new(config.clone()),
    };
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
