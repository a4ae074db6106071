mod product;

use axum::{Router, extract::DefaultBodyLimit, routing::get};
use catalog::{
    config::AppConfig,
    database::{Database, connect},
    image::ImagePolicy,
    storage::{BlobStore, LocalStorage},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub storage: Arc<dyn BlobStore>,
    pub policy: ImagePolicy,
}

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route(
            "/api/product",
            get(product::get_products).post(product::post_product),
        )
        .route(
            "/api/product/{id}",
            get(product::get_product)
                .put(product::put_product)
                .patch(product::put_product)
                .delete(product::delete_product),
        )
        .route("/storage/{*key}", get(product::get_storage))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;

    let db = Database::with_migration(connect(&config.database_url).await?).await?;
    let storage = LocalStorage::new(config.storage_root.clone());

    let state = AppState {
        db: Arc::new(db),
        storage: Arc::new(storage),
        policy: ImagePolicy::from(&config),
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, router(state, config.max_body_bytes)).await?;

    Ok(())
}
