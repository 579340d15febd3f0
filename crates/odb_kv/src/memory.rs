//! In-memory snapshot engine for testing.

use crate::error::{KvError, KvResult};
use crate::kv::{FindResult, KvStore, KvTransaction};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// Smallest byte string greater than every key carrying `prefix`, or
/// `None` when the prefix is all `0xFF` and no such bound exists.
fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last == 0xFF {
            end.pop();
        } else {
            *last += 1;
            return Some(end);
        }
    }
    None
}

#[derive(Debug, Default)]
struct Shared {
    committed: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Snapshot number of the last committed writer.
    transaction_number: u64,
    /// Writer numbers stay unique even across rollbacks; a rolled-back
    /// number is never handed out again.
    writer_tn: u64,
    commit_ulong: u64,
    writer_active: bool,
}

/// An in-memory snapshot-isolated key-value engine.
///
/// Every transaction clones the committed tree at creation, so readers
/// observe a stable snapshot while the single writer mutates its own
/// copy; commit publishes the writer's tree and bumps the transaction
/// number. Suitable for:
/// - Unit and integration tests
/// - Ephemeral databases that don't need persistence
///
/// # Example
///
/// ```
/// use odb_kv::{KvStore, MemoryKvStore};
///
/// let store = MemoryKvStore::new();
/// let mut tr = store.start_transaction().unwrap();
/// tr.create_or_update(b"key", b"value").unwrap();
/// tr.commit().unwrap();
/// ```
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryKvStore {
    /// Creates a new empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of committed keys. Testing aid.
    #[must_use]
    pub fn committed_len(&self) -> usize {
        self.shared.lock().committed.len()
    }
}

impl KvStore for MemoryKvStore {
    fn start_transaction(&self) -> KvResult<Box<dyn KvTransaction>> {
        let mut shared = self.shared.lock();
        if shared.writer_active {
            return Err(KvError::WriterActive);
        }
        shared.writer_active = true;
        shared.writer_tn += 1;
        Ok(Box::new(MemoryKvTransaction {
            shared: Arc::clone(&self.shared),
            data: shared.committed.clone(),
            transaction_number: shared.writer_tn,
            commit_ulong: shared.commit_ulong,
            read_only: false,
            finished: false,
            cursor: None,
        }))
    }

    fn start_read_only_transaction(&self) -> KvResult<Box<dyn KvTransaction>> {
        let shared = self.shared.lock();
        Ok(Box::new(MemoryKvTransaction {
            shared: Arc::clone(&self.shared),
            data: shared.committed.clone(),
            transaction_number: shared.transaction_number,
            commit_ulong: shared.commit_ulong,
            read_only: true,
            finished: true,
            cursor: None,
        }))
    }
}

struct MemoryKvTransaction {
    shared: Arc<Mutex<Shared>>,
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    transaction_number: u64,
    commit_ulong: u64,
    read_only: bool,
    /// Writer bookkeeping: set once the writer slot has been released.
    finished: bool,
    cursor: Option<Vec<u8>>,
}

impl MemoryKvTransaction {
    fn ensure_writable(&self) -> KvResult<()> {
        if self.read_only {
            return Err(KvError::ReadOnlyTransaction);
        }
        Ok(())
    }
}

impl KvTransaction for MemoryKvTransaction {
    fn find_first_key(&mut self, prefix: &[u8]) -> bool {
        let found = self
            .data
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .next()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone());
        self.cursor = found;
        self.cursor.is_some()
    }

    fn find_next_key(&mut self, prefix: &[u8]) -> bool {
        let Some(current) = self.cursor.take() else {
            return self.find_first_key(prefix);
        };
        let found = self
            .data
            .range::<[u8], _>((Bound::Excluded(current.as_slice()), Bound::Unbounded))
            .next()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone());
        self.cursor = found;
        self.cursor.is_some()
    }

    fn find_last_key(&mut self, prefix: &[u8]) -> bool {
        let end = prefix_upper_bound(prefix);
        let upper = match &end {
            Some(e) => Bound::Excluded(e.as_slice()),
            None => Bound::Unbounded,
        };
        let found = self
            .data
            .range::<[u8], _>((Bound::Included(prefix), upper))
            .next_back()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone());
        self.cursor = found;
        self.cursor.is_some()
    }

    fn find_exact(&mut self, key: &[u8]) -> bool {
        if self.data.contains_key(key) {
            self.cursor = Some(key.to_vec());
            true
        } else {
            self.cursor = None;
            false
        }
    }

    fn find(&mut self, prefix: &[u8], key: &[u8]) -> FindResult {
        if self.data.contains_key(key) {
            self.cursor = Some(key.to_vec());
            return FindResult::Exact;
        }
        let previous = self
            .data
            .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(key)))
            .next_back()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone());
        match previous {
            Some(k) => {
                self.cursor = Some(k);
                FindResult::Previous
            }
            None => {
                self.cursor = None;
                FindResult::NotFound
            }
        }
    }

    fn get_key(&self) -> Option<&[u8]> {
        self.cursor.as_deref()
    }

    fn get_value(&self) -> Option<Vec<u8>> {
        self.cursor.as_ref().and_then(|k| self.data.get(k).cloned())
    }

    fn create_or_update(&mut self, key: &[u8], value: &[u8]) -> KvResult<bool> {
        self.ensure_writable()?;
        let created = self.data.insert(key.to_vec(), value.to_vec()).is_none();
        self.cursor = Some(key.to_vec());
        Ok(created)
    }

    fn erase_current(&mut self) -> KvResult<bool> {
        self.ensure_writable()?;
        let Some(key) = self.cursor.take() else {
            return Ok(false);
        };
        Ok(self.data.remove(&key).is_some())
    }

    fn erase_prefix(&mut self, prefix: &[u8]) -> KvResult<u64> {
        self.ensure_writable()?;
        let keys: Vec<Vec<u8>> = self
            .data
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        let removed = keys.len() as u64;
        for key in keys {
            self.data.remove(&key);
        }
        self.cursor = None;
        Ok(removed)
    }

    fn storage_size(&self, key: &[u8]) -> Option<(u32, u32)> {
        self.data
            .get(key)
            .map(|v| (key.len() as u32, v.len() as u32))
    }

    fn transaction_number(&self) -> u64 {
        self.transaction_number
    }

    fn commit_ulong(&self) -> u64 {
        self.commit_ulong
    }

    fn set_commit_ulong(&mut self, value: u64) {
        self.commit_ulong = value;
    }

    fn next_commit_temporary_close_log(&mut self) {
        // No transaction log to cycle.
    }

    fn commit(mut self: Box<Self>) -> KvResult<()> {
        self.ensure_writable()?;
        let mut shared = self.shared.lock();
        shared.committed = std::mem::take(&mut self.data);
        shared.transaction_number = self.transaction_number;
        shared.commit_ulong = self.commit_ulong;
        shared.writer_active = false;
        self.finished = true;
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

impl Drop for MemoryKvTransaction {
    fn drop(&mut self) {
        // An uncommitted writer releases the writer slot; its tree is
        // simply discarded.
        if !self.finished {
            self.shared.lock().writer_active = false;
        }
    }
}
