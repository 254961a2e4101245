pub mod documents;
pub mod error;
pub mod object_store;
pub mod sequence;

pub use documents::{DocumentStore, PurchaseRecord, StockItem};
pub use error::{DijeriaError, SequenceError, StorageError};
pub use object_store::{image_object_key, ObjectStore, ObjectStoreInfo};
pub use sequence::{CounterStore, SequenceAllocator};
