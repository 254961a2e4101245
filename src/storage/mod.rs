mod csv_export;
pub(crate) mod retry;
mod rocksdb;
mod s3;
mod sequence;

pub use csv_export::purchases_to_csv;
pub use retry::{is_retryable_s3_error, RetryConfig};
pub use self::rocksdb::RocksDbStore;
pub use s3::S3ObjectStore;
pub use sequence::{TransactionalSequenceAllocator, ORDER_COUNTER_KEY};
