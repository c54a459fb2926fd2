use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde_json::Value;

use super::{KeyedStore, RecordKey, RecordKind, StoreError, StoredRow};

/// In-memory `KeyedStore`. The reference adapter and the double every
/// integration test runs against. `set_fail_writes(true)` makes upsert and
/// delete fail so tests can drive the engine's error path.
pub struct InMemoryKeyedStore {
    rows: Mutex<BTreeMap<RecordKey, StoredRow>>,
    fail_writes: AtomicBool,
}

impl InMemoryKeyedStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(BTreeMap::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StoreError::new("simulated write failure"));
        }
        Ok(())
    }
}

impl Default for InMemoryKeyedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyedStore for InMemoryKeyedStore {
    fn get(&self, key: &RecordKey) -> Result<Option<StoredRow>, StoreError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::new("poisoned lock"))?;
        Ok(rows.get(key).cloned())
    }

    fn upsert(
        &self,
        key: &RecordKey,
        payload: Value,
        updated_at_ms: i64,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::new("poisoned lock"))?;
        rows.insert(
            key.clone(),
            StoredRow {
                key: key.clone(),
                payload,
                updated_at_ms,
            },
        );
        Ok(())
    }

    fn delete(&self, key: &RecordKey) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::new("poisoned lock"))?;
        rows.remove(key);
        Ok(())
    }

    fn list(
        &self,
        user: &str,
        kind: RecordKind,
        limit: Option<usize>,
    ) -> Result<Vec<StoredRow>, StoreError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::new("poisoned lock"))?;
        let mut out: Vec<StoredRow> = rows
            .values()
            .filter(|row| row.key.user() == user && row.key.kind() == kind)
            .cloned()
            .collect();
        // Date-keyed kinds come back newest first; entity and settings rows
        // keep ascending key order.
        if matches!(kind, RecordKind::Day | RecordKind::Week) {
            out.reverse();
        }
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        Ok(out)
    }
}
