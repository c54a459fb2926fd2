use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde_json::Value;
use tracing::{debug, warn};

use crate::db::{self, LocalStore};
use crate::record::{self, DayRecord};
use crate::store::{KeyedStore, RecordKey, StoreError};

#[cfg(test)]
mod engine_tests;

/// Quiet period before a dirty subject is written. The source used 700ms.
pub const DEBOUNCE_MS: i64 = 700;

/// How long the transient "saved" indicator stays visible.
pub const SAVED_FLASH_MS: i64 = 1500;

pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(i64::MAX)
}

/// One sync subject: the unit that owns a debounce timer and is written
/// atomically. A typed key, so composite subjects never collide the way
/// string-concatenated map keys can.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SubjectId {
    DaySection { date: NaiveDate, section: String },
    Week { week_start: NaiveDate },
    EntityField { entity_id: String, field: String },
    HabitList,
}

impl SubjectId {
    /// Whether this subject is tied to the given day selection.
    pub fn is_day(&self, date: NaiveDate) -> bool {
        matches!(self, SubjectId::DaySection { date: d, .. } if *d == date)
    }

    pub fn is_week(&self, week_start: NaiveDate) -> bool {
        matches!(self, SubjectId::Week { week_start: w } if *w == week_start)
    }
}

/// Where a subject's writes land, resolved once at selection time so the
/// rest of the pipeline is identity-agnostic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncTarget {
    Remote { user: String },
    Local,
}

/// The write a subject performs when its timer expires. Always carries the
/// full latest in-memory value; intermediate edits are coalesced away.
#[derive(Clone, Debug)]
pub enum PendingWrite {
    MergeSection {
        date: NaiveDate,
        section: String,
        blob: Value,
    },
    ReplaceWeek {
        week_start: NaiveDate,
        payload: Value,
    },
    PatchEntityField {
        entity_id: String,
        field: String,
        value: Value,
    },
    ReplaceHabitList {
        payload: Value,
    },
}

#[derive(Clone, Debug)]
pub struct QueuedWrite {
    pub target: SyncTarget,
    pub write: PendingWrite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Dirty,
    Saving,
    Saved,
    Error,
}

/// Per-subject debounce state machine:
/// `Idle → Dirty → (timer) → Saving → Saved`, `Saving → Error` on failure.
///
/// Driven by explicit `now_ms` values; the host pumps `take_due`/`complete`.
/// Mutations are refused until `mark_loaded` — without that guard, hydrating
/// default state on a selection change would schedule a write of empty
/// defaults over real persisted data.
#[derive(Debug)]
pub struct SubjectEngine {
    state: EngineState,
    loaded: bool,
    debounce_ms: i64,
    deadline_ms: Option<i64>,
    pending: Option<QueuedWrite>,
    saved_until_ms: Option<i64>,
    last_error: Option<String>,
}

impl SubjectEngine {
    pub fn new(debounce_ms: i64) -> Self {
        Self {
            state: EngineState::Idle,
            loaded: false,
            debounce_ms,
            deadline_ms: None,
            pending: None,
            saved_until_ms: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn mark_loaded(&mut self) {
        self.loaded = true;
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Records a local mutation. Restarts the debounce timer and replaces
    /// any coalesced pending write with the latest value. Returns whether a
    /// write was scheduled; `false` means the load guard refused it.
    pub fn note_mutation(&mut self, now_ms: i64, write: QueuedWrite) -> bool {
        self.note_mutation_with_window(now_ms, write, self.debounce_ms)
    }

    /// Same, with a zero debounce window: the write becomes due immediately.
    /// Used for discrete, infrequent actions like habit toggles.
    pub fn note_mutation_immediate(&mut self, now_ms: i64, write: QueuedWrite) -> bool {
        self.note_mutation_with_window(now_ms, write, 0)
    }

    fn note_mutation_with_window(&mut self, now_ms: i64, write: QueuedWrite, window: i64) -> bool {
        if !self.loaded {
            debug!("mutation before load completed, not arming timer");
            return false;
        }
        self.pending = Some(write);
        self.deadline_ms = Some(now_ms + window);
        self.saved_until_ms = None;
        if self.state != EngineState::Saving {
            self.state = EngineState::Dirty;
        }
        true
    }

    /// Takes the coalesced write if its timer has expired, transitioning
    /// `Dirty → Saving`. At most one write per subject is in flight.
    pub fn take_due(&mut self, now_ms: i64) -> Option<QueuedWrite> {
        if self.state != EngineState::Dirty {
            return None;
        }
        let deadline = self.deadline_ms?;
        if now_ms < deadline {
            return None;
        }
        self.deadline_ms = None;
        self.state = EngineState::Saving;
        self.pending.take()
    }

    /// Completes the in-flight write. On failure the engine parks in
    /// `Error` and retries only on the next mutation; in-memory state is the
    /// caller's and is never rolled back.
    pub fn complete(&mut self, now_ms: i64, result: Result<(), String>) {
        if self.pending.is_some() {
            // A mutation landed while saving; its timer is already armed.
            self.state = EngineState::Dirty;
        }
        match result {
            Ok(()) => {
                if self.state == EngineState::Saving {
                    self.state = EngineState::Saved;
                    self.saved_until_ms = Some(now_ms + SAVED_FLASH_MS);
                }
                self.last_error = None;
            }
            Err(message) => {
                warn!("save failed: {message}");
                if self.state == EngineState::Saving {
                    self.state = EngineState::Error;
                }
                self.last_error = Some(message);
            }
        }
    }

    /// Whether the transient "saved" indicator should still be visible.
    pub fn saved_indicator(&self, now_ms: i64) -> bool {
        self.state == EngineState::Saved
            && self.saved_until_ms.is_some_and(|until| now_ms < until)
    }
}

/// Typed table from subject id to its engine.
pub struct SyncScheduler {
    debounce_ms: i64,
    engines: BTreeMap<SubjectId, SubjectEngine>,
}

impl SyncScheduler {
    pub fn new() -> Self {
        Self::with_debounce(DEBOUNCE_MS)
    }

    pub fn with_debounce(debounce_ms: i64) -> Self {
        Self {
            debounce_ms,
            engines: BTreeMap::new(),
        }
    }

    pub fn engine(&mut self, id: SubjectId) -> &mut SubjectEngine {
        let debounce_ms = self.debounce_ms;
        self.engines
            .entry(id)
            .or_insert_with(|| SubjectEngine::new(debounce_ms))
    }

    pub fn get(&self, id: &SubjectId) -> Option<&SubjectEngine> {
        self.engines.get(id)
    }

    /// Drains every subject whose timer has expired.
    pub fn take_due(&mut self, now_ms: i64) -> Vec<(SubjectId, QueuedWrite)> {
        let mut due = Vec::new();
        for (id, engine) in &mut self.engines {
            if let Some(write) = engine.take_due(now_ms) {
                due.push((id.clone(), write));
            }
        }
        due
    }

    pub fn complete(&mut self, id: &SubjectId, now_ms: i64, result: Result<(), String>) {
        if let Some(engine) = self.engines.get_mut(id) {
            engine.complete(now_ms, result);
        }
    }

    /// Drops the subjects tied to an outgoing selection, cancelling their
    /// pending timers. An already-dispatched write is unaffected: it holds
    /// its own payload and is addressed to the old key, so it lands there.
    pub fn retire(&mut self, tied_to_selection: impl Fn(&SubjectId) -> bool) {
        self.engines.retain(|id, _| !tied_to_selection(id));
    }

    pub fn any_dirty(&self) -> bool {
        self.engines
            .values()
            .any(|e| e.state() == EngineState::Dirty)
    }

    pub fn saved_indicator(&self, now_ms: i64) -> bool {
        self.engines.values().any(|e| e.saved_indicator(now_ms))
    }
}

impl Default for SyncScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Executes one queued write. Local-target writes are best-effort and never
/// fail; remote failures surface as `StoreError` for the engine to absorb.
pub fn dispatch(
    store: &dyn KeyedStore,
    local: &LocalStore,
    queued: &QueuedWrite,
    now_ms: i64,
) -> Result<(), StoreError> {
    match &queued.target {
        SyncTarget::Remote { user } => dispatch_remote(store, user, &queued.write, now_ms),
        SyncTarget::Local => {
            dispatch_local(local, &queued.write);
            Ok(())
        }
    }
}

fn dispatch_remote(
    store: &dyn KeyedStore,
    user: &str,
    write: &PendingWrite,
    now_ms: i64,
) -> Result<(), StoreError> {
    match write {
        PendingWrite::MergeSection {
            date,
            section,
            blob,
        } => record::merge_section(store, user, *date, section, blob.clone(), now_ms),
        PendingWrite::ReplaceWeek {
            week_start,
            payload,
        } => store.upsert(
            &RecordKey::Week {
                user: user.to_string(),
                week_start: *week_start,
            },
            payload.clone(),
            now_ms,
        ),
        PendingWrite::PatchEntityField {
            entity_id,
            field,
            value,
        } => {
            let key = RecordKey::Entity {
                user: user.to_string(),
                entity_id: entity_id.clone(),
            };
            // A row deleted since the edit was queued stays deleted.
            let Some(row) = store.get(&key)? else {
                debug!("field write for missing row {entity_id} skipped");
                return Ok(());
            };
            let mut payload = row.payload;
            record::patch_payload_field(&mut payload, field, value.clone())
                .map_err(|e| StoreError::new(e.to_string()))?;
            store.upsert(&key, payload, now_ms)
        }
        PendingWrite::ReplaceHabitList { payload } => store.upsert(
            &RecordKey::Settings {
                user: user.to_string(),
            },
            payload.clone(),
            now_ms,
        ),
    }
}

fn dispatch_local(local: &LocalStore, write: &PendingWrite) {
    match write {
        PendingWrite::MergeSection {
            date,
            section,
            blob,
        } => {
            let key = db::daily_key(*date);
            let mut record = local
                .read(&key)
                .map(|payload| DayRecord::from_payload(&payload))
                .unwrap_or_default();
            record.set_section(section, blob.clone());
            local.write(&key, &record.payload());
        }
        PendingWrite::ReplaceWeek {
            week_start,
            payload,
        } => local.write(&db::week_key(*week_start), payload),
        PendingWrite::PatchEntityField {
            entity_id,
            field,
            value,
        } => {
            let mut rows = local
                .read(db::APPLICATIONS_KEY)
                .and_then(|v| v.as_array().cloned())
                .unwrap_or_default();
            let Some(row) = rows
                .iter_mut()
                .find(|row| row.get("id").and_then(Value::as_str) == Some(entity_id.as_str()))
            else {
                return;
            };
            if let Err(e) = record::patch_payload_field(row, field, value.clone()) {
                warn!("local field write skipped: {e}");
                return;
            }
            local.write(db::APPLICATIONS_KEY, &Value::Array(rows));
        }
        PendingWrite::ReplaceHabitList { payload } => local.write(db::HABITS_KEY, payload),
    }
}
