//! OpenAcademy API server

use std::sync::Arc;

use academy_api::clock::SystemClock;
use academy_api::mail::build_mailer;
use academy_api::state::AppState;
use academy_api::store::{MemoryStore, PgStore, Stores};
use academy_api::create_router;
use academy_core::{AppConfig, LogFormat, LoggingConfig};
use anyhow::Context;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("loading configuration")?;
    init_tracing(&config.logging);
    config.validate().context("validating configuration")?;
    if config.auth.uses_development_key() {
        tracing::error!("JWT_SECRET not set, signing sessions with the public development key");
    }

    let stores = match &config.database.url {
        Some(url) => {
            let store = PgStore::connect(url, config.database.pool_size)
                .await
                .context("connecting to database")?;
            store.migrate().await.context("running migrations")?;
            tracing::info!("Connected to PostgreSQL");
            Stores::from_backend(Arc::new(store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store; data is lost on exit");
            Stores::from_backend(Arc::new(MemoryStore::new()))
        }
    };

    let mailer = build_mailer(&config.mail).context("configuring mail transport")?;
    let addr = config.bind_address();

    let state = Arc::new(
        AppState::new(config, stores, mailer, Arc::new(SystemClock))
            .context("building application state")?,
    );
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("OpenAcademy API starting on http://{}", addr);
    tracing::info!("OpenAPI document at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}
