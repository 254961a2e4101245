use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use dijeria::api::{start_server, AppState, Metrics, ServerConfig, DEFAULT_MAX_UPLOAD_BYTES};
use dijeria::contracts::{DijeriaError, SequenceAllocator};
use dijeria::storage::{RetryConfig, RocksDbStore, S3ObjectStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("dijeria=info".parse()?))
        .init();

    tracing::info!("Dijeria starting...");

    // Document store (RocksDB) holds purchases, inventory and the order counter
    let data_dir = std::env::var("DIJERIA_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let documents = Arc::new(RocksDbStore::open(&data_dir).map_err(DijeriaError::from)?);
    tracing::info!("Opened RocksDB at {}", data_dir);

    // Image storage (S3) if configured
    let objects = match std::env::var("DIJERIA_S3_BUCKET").ok() {
        Some(bucket) => {
            let region = std::env::var("DIJERIA_S3_REGION").unwrap_or_else(|_| "us-east-1".into());
            let store = match std::env::var("DIJERIA_S3_ENDPOINT").ok() {
                Some(endpoint) => {
                    tracing::info!("Connecting to S3 at {} (bucket: {})", endpoint, bucket);
                    S3ObjectStore::with_endpoint(&bucket, &endpoint, &region).await?
                }
                None => {
                    tracing::info!("Connecting to AWS S3 (bucket: {})", bucket);
                    S3ObjectStore::new(&bucket).await?
                }
            };
            let store = match std::env::var("DIJERIA_PUBLIC_URL_BASE").ok() {
                Some(base) => store.with_public_url_base(base),
                None => store,
            };
            Some(Arc::new(store))
        }
        None => {
            tracing::warn!("S3 not configured, purchases will be rejected until DIJERIA_S3_BUCKET is set");
            None
        }
    };

    let max_upload_bytes =
        parse_max_upload_bytes(std::env::var("DIJERIA_MAX_UPLOAD_MB").ok().as_deref());

    let retry_config = RetryConfig::sequence_from_env();
    tracing::info!(
        max_retries = retry_config.max_retries,
        initial_delay_ms = retry_config.initial_delay_ms,
        max_delay_ms = retry_config.max_delay_ms,
        "Order number allocator configured"
    );

    let state = Arc::new(
        AppState::new(documents, objects, Arc::new(Metrics::new()), retry_config)
            .with_max_upload_bytes(max_upload_bytes),
    );

    match state.allocator.current() {
        Ok(last) => tracing::info!(last_issued = last, "Order counter loaded"),
        Err(e) => tracing::warn!(error = %e, "Could not read order counter"),
    }

    let config = ServerConfig {
        host: std::env::var("DIJERIA_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        port: std::env::var("DIJERIA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3001),
    };

    start_server(config, state, shutdown_signal()).await?;

    tracing::info!("Dijeria stopped");
    Ok(())
}

/// Upload cap in bytes from a megabyte setting. Invalid or overflowing values
/// fall back to the default.
fn parse_max_upload_bytes(mb: Option<&str>) -> usize {
    mb.and_then(|v| v.trim().parse::<usize>().ok())
        .and_then(|mb| mb.checked_mul(1024 * 1024))
        .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_cap_is_read_in_megabytes() {
        assert_eq!(parse_max_upload_bytes(Some("2")), 2 * 1024 * 1024);
        assert_eq!(parse_max_upload_bytes(Some(" 1 ")), 1024 * 1024);
    }

    #[test]
    fn invalid_or_overflowing_upload_cap_uses_default() {
        assert_eq!(parse_max_upload_bytes(None), DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(parse_max_upload_bytes(Some("lots")), DEFAULT_MAX_UPLOAD_BYTES);
        let huge = usize::MAX.to_string();
        assert_eq!(parse_max_upload_bytes(Some(&huge)), DEFAULT_MAX_UPLOAD_BYTES);
    }
}
