use axum::{extract::DefaultBodyLimit, routing::get, Router};
use std::env;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::{Any, CorsLayer}, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use visualclass::{
    config::Config,
    db,
    grading::{Gradebook, HttpGradebook, MemoryGradebook},
    routes,
    store::{MemoryStore, PgStore, Store},
    uploads::FsDraftArea,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "visualclass=info,axum=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => Arc::new(PgStore::new(db::connect(url).await?)),
        None => {
            tracing::warn!("DATABASE_URL not set, records are kept in memory");
            Arc::new(MemoryStore::new())
        }
    };
    let gradebook: Arc<dyn Gradebook> = match &config.gradebook_url {
        Some(url) => Arc::new(HttpGradebook::new(url.clone())),
        None => {
            tracing::warn!("GRADEBOOK_URL not set, grades are only logged");
            Arc::new(MemoryGradebook::new())
        }
    };

    std::fs::create_dir_all(&config.data_dir)?;
    std::fs::create_dir_all(&config.www_dir)?;

    let state = AppState {
        store,
        gradebook,
        drafts: Arc::new(FsDraftArea::new(config.drafts_dir())),
        files: Arc::new(config.project_files()),
    };

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(routes::router(state))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
