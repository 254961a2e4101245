use std::future::Future;

use crate::contracts::error::SequenceError;

/// Issues order numbers.
///
/// # Invariants
/// - No two successful calls return the same value
/// - A call that commits after another one completed returns a larger value
/// - The last issued value survives process restart
pub trait SequenceAllocator: Send + Sync {
    /// Allocates the next number. The value is durable before it is returned.
    fn allocate_next(&self) -> impl Future<Output = Result<u64, SequenceError>> + Send;

    /// Returns the last issued number without allocating.
    fn current(&self) -> Result<u64, SequenceError>;
}

/// A persistent counter record that supports a transactional increment.
pub trait CounterStore: Send + Sync {
    /// Runs exactly one read-increment-commit attempt on the counter at `key`.
    /// A missing record counts as 0. Returns the committed value.
    /// A lost race fails with `AllocationConflict` and writes nothing.
    fn increment(&self, key: &str) -> Result<u64, SequenceError>;

    /// Reads the counter at `key`, 0 if it does not exist.
    fn current(&self, key: &str) -> Result<u64, SequenceError>;
}
