use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use backon::Retryable;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::contracts::{
    image_object_key, DocumentStore, ObjectStore, ObjectStoreInfo, PurchaseRecord,
    SequenceAllocator, SequenceError, StockItem, StorageError,
};
use crate::storage::{purchases_to_csv, RetryConfig, TransactionalSequenceAllocator};

/// Message returned when a purchase form is incomplete.
pub const MISSING_PURCHASE_DATA: &str = "Faltan datos necesarios para realizar la compra";
/// Message returned when a purchase is stored.
pub const PURCHASE_OK: &str = "Compra realizada con éxito";

/// Server metrics for monitoring.
#[derive(Default)]
pub struct Metrics {
    pub purchases_total: AtomicU64,
    pub purchase_bytes: AtomicU64,
    pub allocations_total: AtomicU64,
    pub allocation_failures_total: AtomicU64,
    pub reads_total: AtomicU64,
    pub stock_updates_total: AtomicU64,
    pub errors_total: AtomicU64,
    pub purchase_latency_sum_us: AtomicU64,
    pub start_time: std::sync::OnceLock<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        let m = Self::default();
        let _ = m.start_time.set(Instant::now());
        m
    }

    pub fn record_purchase(&self, bytes: u64, latency_us: u64) {
        self.purchases_total.fetch_add(1, Ordering::Relaxed);
        self.purchase_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.purchase_latency_sum_us
            .fetch_add(latency_us, Ordering::Relaxed);
    }

    pub fn record_allocation(&self, ok: bool) {
        if ok {
            self.allocations_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.allocation_failures_total
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_read(&self) {
        self.reads_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }
}

/// Default request body cap, sized for one image upload.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Application state shared across handlers.
pub struct AppState<D: DocumentStore, O: ObjectStore = NoopObjectStore> {
    pub documents: Arc<D>,
    pub objects: Option<Arc<O>>,
    pub allocator: TransactionalSequenceAllocator<D>,
    pub metrics: Arc<Metrics>,
    /// Backoff used when a stock update loses a transaction race
    pub retry_config: RetryConfig,
    pub max_upload_bytes: usize,
}

impl<D: DocumentStore, O: ObjectStore> AppState<D, O> {
    pub fn new(
        documents: Arc<D>,
        objects: Option<Arc<O>>,
        metrics: Arc<Metrics>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            allocator: TransactionalSequenceAllocator::new(
                Arc::clone(&documents),
                retry_config.clone(),
            ),
            documents,
            objects,
            metrics,
            retry_config,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_max_upload_bytes(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }
}

/// No-op object storage for when S3 is not configured.
pub struct NoopObjectStore;

impl ObjectStore for NoopObjectStore {
    async fn put_object(
        &self,
        _key: &str,
        _body: Bytes,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        Err(StorageError::ObjectStoreNotConfigured)
    }

    fn storage_info(&self) -> ObjectStoreInfo {
        ObjectStoreInfo {
            storage_type: "none".into(),
            bucket: String::new(),
            public_url_base: String::new(),
        }
    }
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    Storage(StorageError),
    Sequence(SequenceError),
    BadRequest(String),
    PayloadTooLarge(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_response) = match self {
            ApiError::Storage(StorageError::InvalidInput(msg)) | ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: msg,
                    code: "BAD_REQUEST".into(),
                },
            ),
            ApiError::PayloadTooLarge(msg) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                ErrorResponse {
                    error: msg,
                    code: "PAYLOAD_TOO_LARGE".into(),
                },
            ),
            ApiError::Storage(StorageError::Conflict(msg)) => (
                StatusCode::CONFLICT,
                ErrorResponse {
                    error: format!("Concurrent update, try again: {}", msg),
                    code: "CONFLICT".into(),
                },
            ),
            ApiError::Storage(StorageError::ObjectStoreNotConfigured) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse {
                    error: "Image storage is not configured".into(),
                    code: "OBJECT_STORE_NOT_CONFIGURED".into(),
                },
            ),
            ApiError::Storage(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: e.to_string(),
                    code: "STORAGE_ERROR".into(),
                },
            ),
            ApiError::Sequence(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse {
                    error: format!("Could not allocate an order number: {}", e),
                    code: "SEQUENCE_UNAVAILABLE".into(),
                },
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        ApiError::Storage(e)
    }
}

impl From<SequenceError> for ApiError {
    fn from(e: SequenceError) -> Self {
        ApiError::Sequence(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        rejection_error(rejection.status(), rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        rejection_error(rejection.status(), rejection.body_text())
    }
}

/// Keeps the body limit distinguishable from malformed input.
fn rejection_error(status: StatusCode, msg: String) -> ApiError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(msg)
    } else {
        ApiError::BadRequest(msg)
    }
}

fn multipart_error(context: &str, e: MultipartError) -> ApiError {
    rejection_error(e.status(), format!("{}: {}", context, e.body_text()))
}

/// Response for a stored purchase.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseResponse {
    pub message: String,
    pub id: String,
    pub numero_pedido: u64,
    pub image_url: String,
}

/// Uploaded image part of a purchase form.
struct ImageUpload {
    file_name: String,
    content_type: String,
    data: Bytes,
}

/// Fields collected from the purchase multipart form.
#[derive(Default)]
struct PurchaseForm {
    usuario: Option<String>,
    email: Option<String>,
    contacto: Option<String>,
    nombre: Option<String>,
    image: Option<ImageUpload>,
}

impl PurchaseForm {
    async fn from_multipart(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| multipart_error("Invalid multipart body", e))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "image" => {
                    let file_name = field.file_name().unwrap_or("image").to_string();
                    let content_type = field
                        .content_type()
                        .unwrap_or("application/octet-stream")
                        .to_string();
                    let data = field
                        .bytes()
                        .await
                        .map_err(|e| multipart_error("Invalid image upload", e))?;
                    form.image = Some(ImageUpload {
                        file_name,
                        content_type,
                        data,
                    });
                }
                "usuario" | "email" | "contacto" | "nombre" => {
                    let value = field
                        .text()
                        .await
                        .map_err(|e| multipart_error(&format!("Invalid field {}", name), e))?;
                    let value = Some(value.trim().to_string()).filter(|v| !v.is_empty());
                    match name.as_str() {
                        "usuario" => form.usuario = value,
                        "email" => form.email = value,
                        "contacto" => form.contacto = value,
                        _ => form.nombre = value,
                    }
                }
                _ => {}
            }
        }

        Ok(form)
    }
}

/// POST /comprar
/// Accepts a multipart purchase form, allocates an order number, stores the
/// image and persists the purchase.
///
/// The order number is allocated before any write, so a failed allocation
/// leaves nothing behind. A failed upload or document write after allocation
/// leaves a gap in the numbering.
pub async fn comprar<D: DocumentStore, O: ObjectStore>(
    State(state): State<Arc<AppState<D, O>>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<PurchaseResponse>), ApiError> {
    let start = Instant::now();

    let multipart = multipart.inspect_err(|_| state.metrics.record_error())?;
    let form = PurchaseForm::from_multipart(multipart)
        .await
        .inspect_err(|_| state.metrics.record_error())?;

    let (Some(usuario), Some(email), Some(contacto), Some(nombre), Some(image)) = (
        form.usuario,
        form.email,
        form.contacto,
        form.nombre,
        form.image.filter(|i| !i.data.is_empty()),
    ) else {
        state.metrics.record_error();
        return Err(ApiError::BadRequest(MISSING_PURCHASE_DATA.into()));
    };

    let objects = state.objects.as_ref().ok_or_else(|| {
        state.metrics.record_error();
        ApiError::Storage(StorageError::ObjectStoreNotConfigured)
    })?;

    let numero_pedido = state.allocator.allocate_next().await.map_err(|e| {
        state.metrics.record_allocation(false);
        state.metrics.record_error();
        tracing::error!(error = %e, "Purchase rejected: no order number");
        ApiError::from(e)
    })?;
    state.metrics.record_allocation(true);

    let id = uuid::Uuid::new_v4().to_string();
    let key = image_object_key(&id, &image.file_name);
    let image_bytes = image.data.len() as u64;

    let image_url = objects
        .put_object(&key, image.data, &image.content_type)
        .await
        .map_err(|e| {
            state.metrics.record_error();
            tracing::error!(numero_pedido, key = %key, error = %e, "Image upload failed");
            ApiError::from(e)
        })?;

    let purchase = PurchaseRecord {
        id: id.clone(),
        numero_pedido,
        usuario,
        email,
        contacto,
        nombre,
        image_url: image_url.clone(),
        created_at_ms: current_timestamp_ms(),
    };

    state.documents.add_purchase(&purchase).map_err(|e| {
        state.metrics.record_error();
        tracing::error!(numero_pedido, id = %id, error = %e, "Purchase write failed");
        ApiError::from(e)
    })?;

    let latency_us = start.elapsed().as_micros() as u64;
    state.metrics.record_purchase(image_bytes, latency_us);
    tracing::info!(numero_pedido, id = %id, "Purchase stored");

    Ok((
        StatusCode::CREATED,
        Json(PurchaseResponse {
            message: PURCHASE_OK.into(),
            id,
            numero_pedido,
            image_url,
        }),
    ))
}

/// GET /compras
/// Lists all purchases ordered by order number.
pub async fn list_compras<D: DocumentStore, O: ObjectStore>(
    State(state): State<Arc<AppState<D, O>>>,
) -> Result<Json<Vec<PurchaseRecord>>, ApiError> {
    state.metrics.record_read();
    let purchases = state.documents.list_purchases().map_err(|e| {
        state.metrics.record_error();
        ApiError::from(e)
    })?;
    Ok(Json(purchases))
}

/// Query parameters for purchase search.
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub term: Option<String>,
}

/// GET /buscar?term=
/// Lists purchases whose customer fields contain `term`, ignoring case.
pub async fn buscar<D: DocumentStore, O: ObjectStore>(
    State(state): State<Arc<AppState<D, O>>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<PurchaseRecord>>, ApiError> {
    state.metrics.record_read();
    let term = query
        .term
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Query parameter 'term' is required".into()))?;

    let purchases = state.documents.search_purchases(term).map_err(|e| {
        state.metrics.record_error();
        ApiError::from(e)
    })?;
    Ok(Json(purchases))
}

/// GET /descargar-csv
/// Exports all purchases as a CSV attachment.
pub async fn descargar_csv<D: DocumentStore, O: ObjectStore>(
    State(state): State<Arc<AppState<D, O>>>,
) -> Result<impl IntoResponse, ApiError> {
    state.metrics.record_read();
    let purchases = state.documents.list_purchases()?;
    let body = purchases_to_csv(&purchases).map_err(|e| {
        state.metrics.record_error();
        ApiError::from(e)
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"compras.csv\"",
            ),
        ],
        body,
    ))
}

/// Request body for stock additions.
#[derive(Debug, Deserialize)]
pub struct AddStockRequest {
    pub nombre: String,
    pub cantidad: u64,
}

/// POST /agregar-stock
/// Adds units to an inventory item, creating it if needed.
pub async fn agregar_stock<D: DocumentStore, O: ObjectStore>(
    State(state): State<Arc<AppState<D, O>>>,
    request: Result<Json<AddStockRequest>, JsonRejection>,
) -> Result<Json<StockItem>, ApiError> {
    let Json(request) = request.inspect_err(|_| state.metrics.record_error())?;
    let documents = &state.documents;
    let item = (|| async { documents.add_stock(&request.nombre, request.cantidad) })
        .retry(state.retry_config.backoff())
        .when(StorageError::is_conflict)
        .notify(|err, dur| {
            tracing::warn!(
                nombre = %request.nombre,
                error = %err,
                retry_in = ?dur,
                "Stock update conflicted, retrying"
            );
        })
        .await
        .map_err(|e| {
            state.metrics.record_error();
            ApiError::from(e)
        })?;

    state
        .metrics
        .stock_updates_total
        .fetch_add(1, Ordering::Relaxed);
    tracing::info!(nombre = %item.nombre, stock = item.stock, "Stock updated");

    Ok(Json(item))
}

/// GET /dijes
/// Lists the inventory.
pub async fn list_dijes<D: DocumentStore, O: ObjectStore>(
    State(state): State<Arc<AppState<D, O>>>,
) -> Result<Json<Vec<StockItem>>, ApiError> {
    state.metrics.record_read();
    let items = state.documents.list_stock().map_err(|e| {
        state.metrics.record_error();
        ApiError::from(e)
    })?;
    Ok(Json(items))
}

/// Response for the last issued order number.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastNumberResponse {
    pub ultimo_numero: u64,
}

/// GET /ultimo-numero
/// Returns the last issued order number without allocating one.
pub async fn ultimo_numero<D: DocumentStore, O: ObjectStore>(
    State(state): State<Arc<AppState<D, O>>>,
) -> Result<Json<LastNumberResponse>, ApiError> {
    state.metrics.record_read();
    let ultimo_numero = state.allocator.current().map_err(|e| {
        state.metrics.record_error();
        ApiError::from(e)
    })?;
    Ok(Json(LastNumberResponse { ultimo_numero }))
}

/// GET /health
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Response for the stats endpoint.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub uptime_secs: f64,
    pub purchases: PurchaseStats,
    pub allocations: AllocationStats,
    pub reads_total: u64,
    pub stock_updates_total: u64,
    pub errors_total: u64,
    pub object_store: ObjectStoreInfo,
}

#[derive(Debug, Serialize)]
pub struct PurchaseStats {
    pub total: u64,
    pub bytes_total: u64,
    pub avg_latency_us: f64,
}

#[derive(Debug, Serialize)]
pub struct AllocationStats {
    pub total: u64,
    pub failures_total: u64,
    pub last_issued: Option<u64>,
}

/// GET /stats
/// Returns server statistics.
pub async fn get_stats<D: DocumentStore, O: ObjectStore>(
    State(state): State<Arc<AppState<D, O>>>,
) -> impl IntoResponse {
    let m = &state.metrics;
    let uptime_secs = m
        .start_time
        .get()
        .map(|t| t.elapsed().as_secs_f64())
        .unwrap_or(0.0);

    let purchases_total = m.purchases_total.load(Ordering::Relaxed);
    let latency_sum = m.purchase_latency_sum_us.load(Ordering::Relaxed);

    let object_store = state
        .objects
        .as_ref()
        .map(|o| o.storage_info())
        .unwrap_or_else(|| NoopObjectStore.storage_info());

    Json(StatsResponse {
        uptime_secs,
        purchases: PurchaseStats {
            total: purchases_total,
            bytes_total: m.purchase_bytes.load(Ordering::Relaxed),
            avg_latency_us: safe_avg(latency_sum, purchases_total),
        },
        allocations: AllocationStats {
            total: m.allocations_total.load(Ordering::Relaxed),
            failures_total: m.allocation_failures_total.load(Ordering::Relaxed),
            last_issued: state.allocator.current().ok(),
        },
        reads_total: m.reads_total.load(Ordering::Relaxed),
        stock_updates_total: m.stock_updates_total.load(Ordering::Relaxed),
        errors_total: m.errors_total.load(Ordering::Relaxed),
        object_store,
    })
}

fn current_timestamp_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Calculates average, returning 0.0 if count is zero.
#[inline]
fn safe_avg(sum: u64, count: u64) -> f64 {
    if count > 0 {
        sum as f64 / count as f64
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn error_status(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn invalid_input_maps_to_bad_request() {
        let (status, body) =
            error_status(StorageError::InvalidInput("cantidad".into()).into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn exhausted_allocation_maps_to_service_unavailable() {
        let err = SequenceError::RetriesExhausted {
            attempts: 9,
            last: "Busy".into(),
        };
        let (status, body) = error_status(err.into()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "SEQUENCE_UNAVAILABLE");
    }

    #[tokio::test]
    async fn body_limit_maps_to_413() {
        let (status, body) = error_status(rejection_error(
            StatusCode::PAYLOAD_TOO_LARGE,
            "length limit exceeded".into(),
        ))
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["code"], "PAYLOAD_TOO_LARGE");

        let (status, body) = error_status(rejection_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "cantidad: invalid value".into(),
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn conflict_maps_to_409() {
        let (status, _) = error_status(StorageError::Conflict("Busy".into()).into()).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[test]
    fn safe_avg_handles_zero_count() {
        assert_eq!(safe_avg(100, 0), 0.0);
        assert_eq!(safe_avg(100, 4), 25.0);
    }

    #[test]
    fn metrics_track_allocation_outcomes() {
        let m = Metrics::new();
        m.record_allocation(true);
        m.record_allocation(true);
        m.record_allocation(false);
        assert_eq!(m.allocations_total.load(Ordering::Relaxed), 2);
        assert_eq!(m.allocation_failures_total.load(Ordering::Relaxed), 1);
        assert!(m.start_time.get().is_some());
    }
}
