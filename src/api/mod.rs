mod handlers;

use std::future::Future;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::contracts::{DocumentStore, ObjectStore};

pub use handlers::{
    AddStockRequest, ApiError, AppState, ErrorResponse, LastNumberResponse, Metrics,
    NoopObjectStore, PurchaseResponse, DEFAULT_MAX_UPLOAD_BYTES, MISSING_PURCHASE_DATA,
    PURCHASE_OK,
};

/// Creates the API router.
pub fn create_router<D: DocumentStore + 'static, O: ObjectStore + 'static>(
    state: Arc<AppState<D, O>>,
) -> Router {
    let max_upload_bytes = state.max_upload_bytes;

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/stats", get(handlers::get_stats::<D, O>))
        // Purchases
        .route("/comprar", post(handlers::comprar::<D, O>))
        .route("/compras", get(handlers::list_compras::<D, O>))
        .route("/buscar", get(handlers::buscar::<D, O>))
        .route("/descargar-csv", get(handlers::descargar_csv::<D, O>))
        // Inventory
        .route("/agregar-stock", post(handlers::agregar_stock::<D, O>))
        .route("/dijes", get(handlers::list_dijes::<D, O>))
        // Order numbers
        .route("/ultimo-numero", get(handlers::ultimo_numero::<D, O>))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3001,
        }
    }
}

/// Starts the HTTP server.
pub async fn start_server<D, O, F>(
    config: ServerConfig,
    state: Arc<AppState<D, O>>,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    D: DocumentStore + 'static,
    O: ObjectStore + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state);
    let addr = format!("{}:{}", config.host, config.port);

    tracing::info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
