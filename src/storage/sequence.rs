use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use backon::Retryable;

use crate::contracts::{CounterStore, SequenceAllocator, SequenceError};
use crate::storage::retry::RetryConfig;

/// Well-known key of the order number counter.
pub const ORDER_COUNTER_KEY: &str = "counter:pedidos";

/// Allocates order numbers through a transactional increment of a single
/// counter record.
///
/// Each attempt is a full read-increment-commit in the store. Conflicts and
/// outages are retried with jittered exponential backoff up to
/// `RetryConfig::max_retries`; after that the call fails with
/// `RetriesExhausted` and the counter keeps its last committed value.
pub struct TransactionalSequenceAllocator<S: CounterStore> {
    store: Arc<S>,
    key: String,
    retry_config: RetryConfig,
}

impl<S: CounterStore> TransactionalSequenceAllocator<S> {
    /// Creates an allocator over the order counter.
    pub fn new(store: Arc<S>, retry_config: RetryConfig) -> Self {
        Self::with_key(store, ORDER_COUNTER_KEY, retry_config)
    }

    /// Creates an allocator over the counter stored at `key`.
    pub fn with_key(store: Arc<S>, key: impl Into<String>, retry_config: RetryConfig) -> Self {
        Self {
            store,
            key: key.into(),
            retry_config,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<S: CounterStore> SequenceAllocator for TransactionalSequenceAllocator<S> {
    async fn allocate_next(&self) -> Result<u64, SequenceError> {
        let attempts = AtomicUsize::new(0);

        let result = (|| async {
            attempts.fetch_add(1, Ordering::Relaxed);
            self.store.increment(&self.key)
        })
        .retry(self.retry_config.backoff())
        .when(SequenceError::is_retryable)
        .notify(|err, dur| {
            tracing::warn!(
                key = %self.key,
                error = %err,
                retry_in = ?dur,
                "Order number allocation failed, retrying"
            );
        })
        .await;

        match result {
            Ok(value) => {
                tracing::debug!(key = %self.key, value, "Allocated order number");
                Ok(value)
            }
            Err(e) if e.is_retryable() => {
                let attempts = attempts.load(Ordering::Relaxed);
                tracing::error!(
                    key = %self.key,
                    attempts,
                    error = %e,
                    "Order number allocation gave up"
                );
                Err(SequenceError::RetriesExhausted {
                    attempts,
                    last: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn current(&self) -> Result<u64, SequenceError> {
        self.store.current(&self.key)
    }
}
