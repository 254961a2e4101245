use std::path::Path;

use rocksdb::{Direction, ErrorKind, IteratorMode, OptimisticTransactionDB, Options};
use serde::de::DeserializeOwned;

use crate::contracts::{
    CounterStore, DocumentStore, PurchaseRecord, SequenceError, StockItem, StorageError,
};

/// Key prefix for purchase documents
const PURCHASE_PREFIX: &str = "compra";
/// Key prefix for inventory documents
const STOCK_PREFIX: &str = "dije";

/// RocksDB-backed document store.
///
/// Uses an optimistic transaction database: read-modify-write updates read
/// their key with `get_for_update` and the commit fails with `Busy` if
/// another transaction wrote that key in between.
pub struct RocksDbStore {
    db: OptimisticTransactionDB,
}

impl RocksDbStore {
    /// Opens or creates a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let parallelism = std::thread::available_parallelism()
            .map(|p| p.get() as i32)
            .unwrap_or(4);
        opts.increase_parallelism(parallelism);
        opts.set_max_background_jobs(parallelism.min(4));

        let db: OptimisticTransactionDB = OptimisticTransactionDB::open(&opts, path)
            .map_err(|e| StorageError::RocksDb(e.to_string()))?;

        tracing::debug!(path = %path.display(), "Opened document store");

        Ok(Self { db })
    }

    fn purchase_key(id: &str) -> String {
        format!("{}:{}", PURCHASE_PREFIX, id)
    }

    fn stock_key(nombre: &str) -> String {
        format!("{}:{}", STOCK_PREFIX, nombre)
    }

    /// Parses a counter value from big-endian bytes.
    #[inline]
    fn parse_u64_be(bytes: &[u8]) -> Result<u64, SequenceError> {
        bytes.try_into().map(u64::from_be_bytes).map_err(|_| {
            SequenceError::CorruptRecord(format!("expected 8 bytes, found {}", bytes.len()))
        })
    }

    fn to_json<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
        serde_json::to_vec(value).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    fn from_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
        serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// Reads every document under `prefix`, in key order.
    fn scan_prefix<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>, StorageError> {
        let prefix = format!("{}:", prefix);
        let mut documents = Vec::new();

        let iter = self
            .db
            .iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward));
        for item in iter {
            let (key, value) = item.map_err(|e| StorageError::RocksDb(e.to_string()))?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            documents.push(Self::from_json(&value)?);
        }

        Ok(documents)
    }
}

/// Maps a RocksDB error raised inside a counter transaction.
fn sequence_error(e: rocksdb::Error) -> SequenceError {
    classify_sequence_error(e.kind(), e.into_string())
}

/// Only conflicts and transient I/O faults are retryable.
fn classify_sequence_error(kind: ErrorKind, message: String) -> SequenceError {
    match kind {
        ErrorKind::Busy | ErrorKind::TryAgain => SequenceError::AllocationConflict(message),
        ErrorKind::IOError | ErrorKind::TimedOut | ErrorKind::Incomplete | ErrorKind::Aborted => {
            SequenceError::StoreUnavailable(message)
        }
        ErrorKind::Corruption => SequenceError::CorruptRecord(message),
        _ => SequenceError::StoreFault(message),
    }
}

/// Maps a RocksDB error raised inside a document transaction.
fn storage_error(e: rocksdb::Error) -> StorageError {
    match e.kind() {
        ErrorKind::Busy | ErrorKind::TryAgain => StorageError::Conflict(e.to_string()),
        _ => StorageError::RocksDb(e.to_string()),
    }
}

impl CounterStore for RocksDbStore {
    fn increment(&self, key: &str) -> Result<u64, SequenceError> {
        // Dropping the transaction on any early return rolls it back.
        let txn = self.db.transaction();

        let current = match txn
            .get_for_update(key.as_bytes(), true)
            .map_err(sequence_error)?
        {
            Some(bytes) => Self::parse_u64_be(&bytes)?,
            None => 0,
        };
        let next = current.checked_add(1).ok_or(SequenceError::Overflow)?;

        txn.put(key.as_bytes(), next.to_be_bytes())
            .map_err(sequence_error)?;
        txn.commit().map_err(sequence_error)?;

        Ok(next)
    }

    fn current(&self, key: &str) -> Result<u64, SequenceError> {
        match self.db.get(key.as_bytes()).map_err(sequence_error)? {
            Some(bytes) => Self::parse_u64_be(&bytes),
            None => Ok(0),
        }
    }
}

impl DocumentStore for RocksDbStore {
    fn add_purchase(&self, purchase: &PurchaseRecord) -> Result<(), StorageError> {
        if purchase.id.is_empty() {
            return Err(StorageError::InvalidInput("purchase id is empty".into()));
        }
        let bytes = Self::to_json(purchase)?;
        self.db
            .put(Self::purchase_key(&purchase.id).as_bytes(), bytes)
            .map_err(|e| StorageError::RocksDb(e.to_string()))
    }

    fn get_purchase(&self, id: &str) -> Result<Option<PurchaseRecord>, StorageError> {
        match self
            .db
            .get(Self::purchase_key(id).as_bytes())
            .map_err(|e| StorageError::RocksDb(e.to_string()))?
        {
            Some(bytes) => Ok(Some(Self::from_json(&bytes)?)),
            None => Ok(None),
        }
    }

    fn list_purchases(&self) -> Result<Vec<PurchaseRecord>, StorageError> {
        let mut purchases: Vec<PurchaseRecord> = self.scan_prefix(PURCHASE_PREFIX)?;
        purchases.sort_by_key(|p| p.numero_pedido);
        Ok(purchases)
    }

    fn add_stock(&self, nombre: &str, cantidad: u64) -> Result<StockItem, StorageError> {
        let nombre = nombre.trim();
        if nombre.is_empty() {
            return Err(StorageError::InvalidInput("nombre is required".into()));
        }
        if cantidad == 0 {
            return Err(StorageError::InvalidInput(
                "cantidad must be greater than zero".into(),
            ));
        }

        let key = Self::stock_key(nombre);
        let txn = self.db.transaction();

        let mut item = match txn
            .get_for_update(key.as_bytes(), true)
            .map_err(storage_error)?
        {
            Some(bytes) => Self::from_json::<StockItem>(&bytes)?,
            None => StockItem {
                nombre: nombre.to_string(),
                stock: 0,
            },
        };
        item.stock = item.stock.checked_add(cantidad).ok_or_else(|| {
            StorageError::InvalidInput(format!("stock for {} would overflow", nombre))
        })?;

        txn.put(key.as_bytes(), Self::to_json(&item)?)
            .map_err(storage_error)?;
        txn.commit().map_err(storage_error)?;

        Ok(item)
    }

    fn list_stock(&self) -> Result<Vec<StockItem>, StorageError> {
        self.scan_prefix(STOCK_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const KEY: &str = "counter:test";

    fn open_store() -> (RocksDbStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksDbStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn purchase(id: &str, numero_pedido: u64, nombre: &str) -> PurchaseRecord {
        PurchaseRecord {
            id: id.into(),
            numero_pedido,
            usuario: format!("user-{}", id),
            email: format!("{}@example.com", id),
            contacto: "555-0100".into(),
            nombre: nombre.into(),
            image_url: format!("https://img/{}.png", id),
            created_at_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn missing_counter_reads_as_zero() {
        let (store, _dir) = open_store();
        assert_eq!(store.current(KEY).unwrap(), 0);
    }

    #[test]
    fn increment_creates_record_on_cold_start() {
        let (store, _dir) = open_store();
        assert_eq!(store.increment(KEY).unwrap(), 1);
        assert_eq!(store.current(KEY).unwrap(), 1);
        assert_eq!(store.increment(KEY).unwrap(), 2);
    }

    #[test]
    fn counters_are_independent_per_key() {
        let (store, _dir) = open_store();
        store.increment("counter:a").unwrap();
        store.increment("counter:a").unwrap();
        assert_eq!(store.increment("counter:b").unwrap(), 1);
    }

    #[test]
    fn interleaved_commit_is_reported_as_conflict() {
        let (store, _dir) = open_store();

        let loser = store.db.transaction();
        loser.get_for_update(KEY, true).unwrap();

        let winner = store.db.transaction();
        winner.get_for_update(KEY, true).unwrap();
        winner.put(KEY, 1u64.to_be_bytes()).unwrap();
        winner.commit().unwrap();

        loser.put(KEY, 1u64.to_be_bytes()).unwrap();
        let err = loser.commit().unwrap_err();
        assert!(
            matches!(sequence_error(err), SequenceError::AllocationConflict(_)),
            "stale commit must be classified as a conflict"
        );

        // The losing write left nothing behind.
        assert_eq!(store.current(KEY).unwrap(), 1);
        assert_eq!(store.increment(KEY).unwrap(), 2);
    }

    #[test]
    fn only_transient_store_errors_are_retryable() {
        for kind in [
            ErrorKind::IOError,
            ErrorKind::TimedOut,
            ErrorKind::Incomplete,
            ErrorKind::Aborted,
        ] {
            let err = classify_sequence_error(kind, "transient".into());
            assert!(matches!(err, SequenceError::StoreUnavailable(_)), "{:?}", kind);
            assert!(err.is_retryable());
        }

        for kind in [
            ErrorKind::InvalidArgument,
            ErrorKind::NotSupported,
            ErrorKind::ShutdownInProgress,
            ErrorKind::ColumnFamilyDropped,
            ErrorKind::Unknown,
        ] {
            let err = classify_sequence_error(kind, "permanent".into());
            assert!(matches!(err, SequenceError::StoreFault(_)), "{:?}", kind);
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn corrupt_counter_is_not_retryable() {
        let (store, _dir) = open_store();
        store.db.put(KEY, b"abc").unwrap();

        let err = store.increment(KEY).unwrap_err();
        assert!(matches!(err, SequenceError::CorruptRecord(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn overflow_leaves_counter_unchanged() {
        let (store, _dir) = open_store();
        store.db.put(KEY, u64::MAX.to_be_bytes()).unwrap();

        assert!(matches!(
            store.increment(KEY).unwrap_err(),
            SequenceError::Overflow
        ));
        assert_eq!(store.current(KEY).unwrap(), u64::MAX);
    }

    #[test]
    fn purchases_are_listed_by_order_number() {
        let (store, _dir) = open_store();
        store.add_purchase(&purchase("zz", 1, "Ana")).unwrap();
        store.add_purchase(&purchase("aa", 3, "Bruno")).unwrap();
        store.add_purchase(&purchase("mm", 2, "Carla")).unwrap();

        let numbers: Vec<u64> = store
            .list_purchases()
            .unwrap()
            .iter()
            .map(|p| p.numero_pedido)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn get_purchase_round_trips_document() {
        let (store, _dir) = open_store();
        let p = purchase("p1", 10, "Dora");
        store.add_purchase(&p).unwrap();

        assert_eq!(store.get_purchase("p1").unwrap(), Some(p));
        assert_eq!(store.get_purchase("missing").unwrap(), None);
    }

    #[test]
    fn purchase_scan_ignores_other_collections() {
        let (store, _dir) = open_store();
        store.add_purchase(&purchase("p1", 1, "Eva")).unwrap();
        store.add_stock("corazon", 4).unwrap();
        store.increment(KEY).unwrap();

        assert_eq!(store.list_purchases().unwrap().len(), 1);
        assert_eq!(store.list_stock().unwrap().len(), 1);
    }

    #[test]
    fn search_matches_substrings_ignoring_case() {
        let (store, _dir) = open_store();
        store.add_purchase(&purchase("p1", 1, "María Pérez")).unwrap();
        store.add_purchase(&purchase("p2", 2, "Julio Díaz")).unwrap();

        let found = store.search_purchases("MARÍA").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "p1");

        assert_eq!(store.search_purchases("example.com").unwrap().len(), 2);
        assert!(store.search_purchases("nadie").unwrap().is_empty());
    }

    #[test]
    fn add_stock_accumulates() {
        let (store, _dir) = open_store();
        assert_eq!(store.add_stock("luna", 3).unwrap().stock, 3);
        let item = store.add_stock(" luna ", 2).unwrap();
        assert_eq!(item.nombre, "luna");
        assert_eq!(item.stock, 5);

        store.add_stock("estrella", 1).unwrap();
        let names: Vec<String> = store
            .list_stock()
            .unwrap()
            .into_iter()
            .map(|i| i.nombre)
            .collect();
        assert_eq!(names, vec!["estrella".to_string(), "luna".to_string()]);
    }

    #[test]
    fn add_stock_rejects_invalid_input() {
        let (store, _dir) = open_store();
        assert!(matches!(
            store.add_stock("  ", 1),
            Err(StorageError::InvalidInput(_))
        ));
        assert!(matches!(
            store.add_stock("luna", 0),
            Err(StorageError::InvalidInput(_))
        ));
        assert!(store.list_stock().unwrap().is_empty());
    }
}
