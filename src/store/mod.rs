pub mod memory;

use chrono::NaiveDate;
use serde_json::Value;

pub use memory::InMemoryKeyedStore;

/// Composite key addressing one remote row.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum RecordKey {
    /// One day's section map: `(user, date)`.
    Day { user: String, date: NaiveDate },
    /// One week's completion set: `(user, week_start)`, Monday-normalized.
    Week { user: String, week_start: NaiveDate },
    /// One independently editable row in a collection: `(user, entity_id)`.
    Entity { user: String, entity_id: String },
    /// Singleton per-user settings row.
    Settings { user: String },
}

impl RecordKey {
    pub fn user(&self) -> &str {
        match self {
            RecordKey::Day { user, .. }
            | RecordKey::Week { user, .. }
            | RecordKey::Entity { user, .. }
            | RecordKey::Settings { user } => user,
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            RecordKey::Day { .. } => RecordKind::Day,
            RecordKey::Week { .. } => RecordKind::Week,
            RecordKey::Entity { .. } => RecordKind::Entity,
            RecordKey::Settings { .. } => RecordKind::Settings,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    Day,
    Week,
    Entity,
    Settings,
}

#[derive(Clone, Debug)]
pub struct StoredRow {
    pub key: RecordKey,
    pub payload: Value,
    pub updated_at_ms: i64,
}

/// Transient store failure (network/auth). No retries happen at this layer;
/// the sync engine converts it into a state transition.
#[derive(Debug)]
pub struct StoreError {
    pub message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "store error: {}", self.message)
    }
}

impl std::error::Error for StoreError {}

/// Uniform get/upsert/delete/list against remote rows addressed by
/// `RecordKey`. `upsert` is insert-or-replace on the full composite key, not
/// a partial patch; merging is the caller's responsibility.
pub trait KeyedStore: Send + Sync {
    fn get(&self, key: &RecordKey) -> Result<Option<StoredRow>, StoreError>;

    fn upsert(
        &self,
        key: &RecordKey,
        payload: Value,
        updated_at_ms: i64,
    ) -> Result<(), StoreError>;

    fn delete(&self, key: &RecordKey) -> Result<(), StoreError>;

    /// Rows of one kind for one user, newest key first.
    fn list(
        &self,
        user: &str,
        kind: RecordKind,
        limit: Option<usize>,
    ) -> Result<Vec<StoredRow>, StoreError>;
}
