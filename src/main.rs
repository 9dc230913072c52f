use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use learnhub::{
    config::{Config, StorageBackend},
    db::{self, PgStore},
    memory::InMemoryStore,
    shutdown::shutdown_signal,
    store::SharedStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store: SharedStore = match (config.storage, config.database_url.as_deref()) {
        (StorageBackend::Postgres, Some(url)) => {
            let pool = db::connect(url, config.db_max_connections).await?;
            let pg = PgStore::new(pool);
            pg.migrate().await?;
            Arc::new(pg)
        }
        (StorageBackend::Postgres, None) => anyhow::bail!("DATABASE_URL not set"),
        (StorageBackend::Memory, _) => {
            tracing::warn!("using in-memory storage; data is lost on exit");
            Arc::new(InMemoryStore::new())
        }
    };

    let app = learnhub::app(store, &config);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
