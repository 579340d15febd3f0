//! Key-value engine trait definitions.

use crate::error::KvResult;

/// Outcome of a relative key lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindResult {
    /// The cursor is positioned exactly on the requested key.
    Exact,
    /// The cursor is positioned on the largest key smaller than the
    /// requested one (within the prefix).
    Previous,
    /// No key at or before the requested one exists within the prefix;
    /// the cursor is unset.
    NotFound,
}

/// A factory for key-value transactions.
///
/// At most one writing transaction may be active at a time; any number of
/// read-only transactions may run concurrently, each observing the
/// committed snapshot taken at its creation.
pub trait KvStore: Send + Sync {
    /// Starts a writing transaction.
    ///
    /// # Errors
    ///
    /// Returns [`crate::KvError::WriterActive`] if another writing
    /// transaction exists.
    fn start_transaction(&self) -> KvResult<Box<dyn KvTransaction>>;

    /// Starts a read-only transaction over the current committed snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot create a snapshot.
    fn start_read_only_transaction(&self) -> KvResult<Box<dyn KvTransaction>>;
}

/// An ordered byte-key transaction.
///
/// Keys sort bytewise. The transaction owns a single cursor; `find_*`
/// methods move it, `get_key`/`get_value` read through it. Dropping the
/// transaction without [`KvTransaction::commit`] discards all pending
/// writes.
///
/// # Invariants
///
/// - `find_first_key`/`find_next_key` only ever position the cursor on
///   keys carrying the given prefix
/// - `transaction_number` is monotonic across commits; a writing
///   transaction reports the number it will commit as
/// - after a mutating call the cursor may be unset; callers that resume
///   iteration must re-seek
pub trait KvTransaction {
    /// Positions the cursor on the first key under `prefix`.
    ///
    /// Returns `false` (cursor unset) if no such key exists.
    fn find_first_key(&mut self, prefix: &[u8]) -> bool;

    /// Advances the cursor to the next key under `prefix`.
    ///
    /// With an unset cursor this behaves like
    /// [`KvTransaction::find_first_key`]. Returns `false` (cursor unset)
    /// when iteration is exhausted.
    fn find_next_key(&mut self, prefix: &[u8]) -> bool;

    /// Positions the cursor on the last key under `prefix`.
    ///
    /// Returns `false` (cursor unset) if no such key exists.
    fn find_last_key(&mut self, prefix: &[u8]) -> bool;

    /// Positions the cursor on `key` exactly.
    ///
    /// Returns `false` (cursor unset) if the key does not exist.
    fn find_exact(&mut self, key: &[u8]) -> bool;

    /// Relative lookup: positions the cursor on `key`, or on the largest
    /// smaller key under `prefix`.
    fn find(&mut self, prefix: &[u8], key: &[u8]) -> FindResult;

    /// Returns the key under the cursor, if set.
    fn get_key(&self) -> Option<&[u8]>;

    /// Returns the value under the cursor, if set.
    fn get_value(&self) -> Option<Vec<u8>>;

    /// Inserts or overwrites `key`, leaving the cursor on it.
    ///
    /// Returns `true` if the key was newly created.
    ///
    /// # Errors
    ///
    /// Returns [`crate::KvError::ReadOnlyTransaction`] on a read-only
    /// transaction.
    fn create_or_update(&mut self, key: &[u8], value: &[u8]) -> KvResult<bool>;

    /// Erases the key under the cursor, unsetting it.
    ///
    /// Returns `false` if the cursor was not set.
    ///
    /// # Errors
    ///
    /// Returns [`crate::KvError::ReadOnlyTransaction`] on a read-only
    /// transaction.
    fn erase_current(&mut self) -> KvResult<bool>;

    /// Erases every key under `prefix`, returning the number removed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::KvError::ReadOnlyTransaction`] on a read-only
    /// transaction.
    fn erase_prefix(&mut self, prefix: &[u8]) -> KvResult<u64>;

    /// Returns `(key_len, value_len)` for `key`, if present.
    fn storage_size(&self, key: &[u8]) -> Option<(u32, u32)>;

    /// Returns this transaction's snapshot number.
    fn transaction_number(&self) -> u64;

    /// Returns the user commit counter carried with the snapshot.
    fn commit_ulong(&self) -> u64;

    /// Sets the user commit counter to be published at commit.
    fn set_commit_ulong(&mut self, value: u64);

    /// Requests that the engine close and reopen its transaction log
    /// after the next commit. Advisory; engines without a log ignore it.
    fn next_commit_temporary_close_log(&mut self);

    /// Publishes all writes atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot persist the transaction.
    fn commit(self: Box<Self>) -> KvResult<()>;

    /// Returns `true` for read-only transactions.
    fn is_read_only(&self) -> bool;
}
