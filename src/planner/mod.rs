use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use chrono::{NaiveDate, Weekday};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::db::{self, LocalStore};
use crate::record::{
    hydrate_section, week_start_of, CompletionKey, DayRecord, HabitList, JobApplication,
    WeekRecord,
};
use crate::store::{KeyedStore, RecordKey, RecordKind, StoredRow};
use crate::sync::{PendingWrite, QueuedWrite, SubjectId, SyncScheduler, SyncTarget};

/// Identity resolution boundary: an opaque user id, or unauthenticated.
pub trait Identity {
    fn current_user(&self) -> Result<Option<String>>;
}

pub struct StaticIdentity {
    user: Option<String>,
}

impl StaticIdentity {
    pub fn signed_in(user: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
        }
    }

    pub fn signed_out() -> Self {
        Self { user: None }
    }
}

impl Identity for StaticIdentity {
    fn current_user(&self) -> Result<Option<String>> {
        Ok(self.user.clone())
    }
}

/// Token for one in-flight load. A resolved load whose generation no longer
/// matches the planner's is stale and gets discarded, not applied.
#[derive(Debug)]
pub struct LoadTicket {
    generation: u64,
    key: RecordKey,
}

impl LoadTicket {
    pub fn key(&self) -> &RecordKey {
        &self.key
    }
}

/// Default shapes for the planner's section blobs. Fields added here later
/// still appear for old persisted records, via defaults-then-override
/// hydration.
pub fn default_section_shapes() -> BTreeMap<String, Value> {
    let mut shapes = BTreeMap::new();
    shapes.insert("intention".to_string(), json!(""));
    shapes.insert("buildLog".to_string(), json!(""));
    shapes.insert("reflection".to_string(), json!(""));
    shapes.insert("notes".to_string(), json!(""));
    shapes.insert("priorities".to_string(), json!([]));
    shapes.insert("timetable".to_string(), json!([]));
    shapes.insert("leetcode".to_string(), json!([]));
    shapes.insert("studyNotes".to_string(), json!(""));
    shapes.insert("goals".to_string(), json!({ "items": [] }));
    shapes.insert("meals".to_string(), json!({ "entries": [] }));
    shapes.insert("finance".to_string(), json!({ "entries": [] }));
    shapes.insert("fitness".to_string(), json!({ "notes": "" }));
    shapes.insert("books".to_string(), json!({ "reading": [] }));
    shapes
}

struct DayState {
    date: NaiveDate,
    sections: BTreeMap<String, Value>,
    loaded: bool,
}

struct WeekState {
    week_start: NaiveDate,
    record: WeekRecord,
    loaded: bool,
}

/// Client-held planner state: the selected day's sections, the selected
/// week's completion set, the applications collection, and the habit list,
/// each persisted through its own sync subject. Stores are passed into
/// methods, never owned.
pub struct Planner {
    user: Option<String>,
    section_defaults: BTreeMap<String, Value>,
    scheduler: SyncScheduler,
    day_generation: u64,
    week_generation: u64,
    day: Option<DayState>,
    week: Option<WeekState>,
    applications: Vec<JobApplication>,
    applications_loaded: bool,
    habits: HabitList,
    habits_loaded: bool,
}

impl Planner {
    pub fn new() -> Self {
        Self::with_section_defaults(default_section_shapes())
    }

    pub fn with_section_defaults(section_defaults: BTreeMap<String, Value>) -> Self {
        Self {
            user: None,
            section_defaults,
            scheduler: SyncScheduler::new(),
            day_generation: 0,
            week_generation: 0,
            day: None,
            week: None,
            applications: Vec::new(),
            applications_loaded: false,
            habits: HabitList::default(),
            habits_loaded: false,
        }
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    fn target(&self) -> SyncTarget {
        match &self.user {
            Some(user) => SyncTarget::Remote { user: user.clone() },
            None => SyncTarget::Local,
        }
    }

    // ── Day selection ──────────────────────────────────────────────────

    /// Starts a day selection change: bumps the load generation, cancels
    /// pending timers tied to the outgoing day, resets the load guard, and
    /// resolves identity. Unauthenticated selections hydrate synchronously
    /// from the local store and return `None`; authenticated ones return a
    /// ticket whose key the caller fetches and feeds to `resolve_day_load`.
    pub fn begin_select_date(
        &mut self,
        identity: &dyn Identity,
        local: &LocalStore,
        date: NaiveDate,
    ) -> Result<Option<LoadTicket>> {
        self.day_generation += 1;
        if let Some(prev) = &self.day {
            let prev_date = prev.date;
            self.scheduler.retire(|id| id.is_day(prev_date));
        }
        self.day = Some(DayState {
            date,
            sections: self.section_defaults.clone(),
            loaded: false,
        });

        self.user = identity.current_user()?;
        match &self.user {
            None => {
                let fetched = local.read(&db::daily_key(date));
                self.hydrate_day(fetched.as_ref());
                Ok(None)
            }
            Some(user) => Ok(Some(LoadTicket {
                generation: self.day_generation,
                key: RecordKey::Day {
                    user: user.clone(),
                    date,
                },
            })),
        }
    }

    /// Applies a fetched day row — unless the selection moved on since the
    /// ticket was issued, in which case the late result is discarded.
    pub fn resolve_day_load(&mut self, ticket: &LoadTicket, row: Option<StoredRow>) {
        if ticket.generation != self.day_generation {
            debug!("stale day load discarded");
            return;
        }
        let payload = row.map(|r| r.payload);
        self.hydrate_day(payload.as_ref());
    }

    /// Both phases inline. A failed fetch leaves defaults visible and the
    /// load guard down, so nothing can be written over the real data; a
    /// reselect retries.
    pub fn select_date(
        &mut self,
        identity: &dyn Identity,
        store: &dyn KeyedStore,
        local: &LocalStore,
        date: NaiveDate,
    ) -> Result<()> {
        if let Some(ticket) = self.begin_select_date(identity, local, date)? {
            match store.get(ticket.key()) {
                Ok(row) => self.resolve_day_load(&ticket, row),
                Err(e) => warn!("day load failed: {e}"),
            }
        }
        Ok(())
    }

    fn hydrate_day(&mut self, payload: Option<&Value>) {
        let Some(day) = &mut self.day else {
            return;
        };
        let fetched = payload.map(DayRecord::from_payload).unwrap_or_default();
        let mut sections = BTreeMap::new();
        for key in fetched.section_keys() {
            if let Some(blob) = fetched.section(key) {
                sections.insert(key.to_string(), blob.clone());
            }
        }
        for (key, default) in &self.section_defaults {
            sections.insert(key.clone(), hydrate_section(default, fetched.section(key)));
        }
        day.sections = sections;
        day.loaded = true;
    }

    // ── Week selection ─────────────────────────────────────────────────

    pub fn begin_select_week(
        &mut self,
        identity: &dyn Identity,
        local: &LocalStore,
        date: NaiveDate,
    ) -> Result<Option<LoadTicket>> {
        let week_start = week_start_of(date);
        self.week_generation += 1;
        if let Some(prev) = &self.week {
            let prev_start = prev.week_start;
            self.scheduler.retire(|id| id.is_week(prev_start));
        }
        self.week = Some(WeekState {
            week_start,
            record: WeekRecord::default(),
            loaded: false,
        });

        self.user = identity.current_user()?;
        match &self.user {
            None => {
                let fetched = local.read(&db::week_key(week_start));
                self.hydrate_week(fetched.as_ref());
                Ok(None)
            }
            Some(user) => Ok(Some(LoadTicket {
                generation: self.week_generation,
                key: RecordKey::Week {
                    user: user.clone(),
                    week_start,
                },
            })),
        }
    }

    pub fn resolve_week_load(&mut self, ticket: &LoadTicket, row: Option<StoredRow>) {
        if ticket.generation != self.week_generation {
            debug!("stale week load discarded");
            return;
        }
        let payload = row.map(|r| r.payload);
        self.hydrate_week(payload.as_ref());
    }

    pub fn select_week(
        &mut self,
        identity: &dyn Identity,
        store: &dyn KeyedStore,
        local: &LocalStore,
        date: NaiveDate,
    ) -> Result<()> {
        if let Some(ticket) = self.begin_select_week(identity, local, date)? {
            match store.get(ticket.key()) {
                Ok(row) => self.resolve_week_load(&ticket, row),
                Err(e) => warn!("week load failed: {e}"),
            }
        }
        Ok(())
    }

    fn hydrate_week(&mut self, payload: Option<&Value>) {
        let Some(week) = &mut self.week else {
            return;
        };
        week.record = payload.map(WeekRecord::from_payload).unwrap_or_default();
        week.loaded = true;
    }

    // ── Day sections ───────────────────────────────────────────────────

    /// Optimistic in-memory update of one section, then a debounced
    /// read-merge-write of exactly that key.
    pub fn update_section(&mut self, now_ms: i64, section: &str, blob: Value) -> Result<()> {
        let (date, loaded) = {
            let day = self.day.as_mut().ok_or_else(|| anyhow!("no date selected"))?;
            day.sections.insert(section.to_string(), blob.clone());
            (day.date, day.loaded)
        };
        let target = self.target();
        let engine = self.scheduler.engine(SubjectId::DaySection {
            date,
            section: section.to_string(),
        });
        if loaded {
            engine.mark_loaded();
        }
        engine.note_mutation(
            now_ms,
            QueuedWrite {
                target,
                write: PendingWrite::MergeSection {
                    date,
                    section: section.to_string(),
                    blob,
                },
            },
        );
        Ok(())
    }

    pub fn section(&self, key: &str) -> Option<&Value> {
        self.day.as_ref()?.sections.get(key)
    }

    pub fn day_loaded(&self) -> bool {
        self.day.as_ref().is_some_and(|d| d.loaded)
    }

    // ── Habit completions ──────────────────────────────────────────────

    /// Symmetric difference on one `(habit, day)` key, persisted
    /// immediately — each toggle is already a discrete, infrequent action.
    /// Returns whether the key is present after the toggle.
    pub fn toggle_habit(&mut self, now_ms: i64, habit: &str, day: Weekday) -> Result<bool> {
        let present = {
            let week = self.week.as_mut().ok_or_else(|| anyhow!("no week selected"))?;
            week.record.toggle(CompletionKey::new(habit, day))
        };
        self.queue_week_write(now_ms)?;
        Ok(present)
    }

    pub fn clear_habit_row(&mut self, now_ms: i64, habit: &str) -> Result<()> {
        let week = self.week.as_mut().ok_or_else(|| anyhow!("no week selected"))?;
        week.record.clear_row(habit);
        self.queue_week_write(now_ms)
    }

    pub fn clear_all_habits(&mut self, now_ms: i64) -> Result<()> {
        let week = self.week.as_mut().ok_or_else(|| anyhow!("no week selected"))?;
        week.record.clear_all();
        self.queue_week_write(now_ms)
    }

    fn queue_week_write(&mut self, now_ms: i64) -> Result<()> {
        let (week_start, payload, loaded) = {
            let week = self.week.as_ref().ok_or_else(|| anyhow!("no week selected"))?;
            (week.week_start, week.record.payload(), week.loaded)
        };
        let target = self.target();
        let engine = self.scheduler.engine(SubjectId::Week { week_start });
        if loaded {
            engine.mark_loaded();
        }
        engine.note_mutation_immediate(
            now_ms,
            QueuedWrite {
                target,
                write: PendingWrite::ReplaceWeek {
                    week_start,
                    payload,
                },
            },
        );
        Ok(())
    }

    pub fn week_record(&self) -> Option<&WeekRecord> {
        self.week.as_ref().map(|w| &w.record)
    }

    pub fn week_loaded(&self) -> bool {
        self.week.as_ref().is_some_and(|w| w.loaded)
    }

    // ── Habit definitions ──────────────────────────────────────────────

    pub fn load_habits(
        &mut self,
        identity: &dyn Identity,
        store: &dyn KeyedStore,
        local: &LocalStore,
    ) -> Result<()> {
        self.user = identity.current_user()?;
        self.habits = match &self.user {
            Some(user) => {
                let key = RecordKey::Settings { user: user.clone() };
                match store.get(&key) {
                    Ok(Some(row)) => HabitList::from_payload(&row.payload),
                    Ok(None) => HabitList::default(),
                    Err(e) => {
                        warn!("habit list load failed: {e}");
                        return Ok(());
                    }
                }
            }
            None => local
                .read(db::HABITS_KEY)
                .map(|payload| HabitList::from_payload(&payload))
                .unwrap_or_default(),
        };
        self.habits_loaded = true;
        Ok(())
    }

    pub fn habits(&self) -> &HabitList {
        &self.habits
    }

    /// Renames a habit and migrates the in-memory week's completion keys to
    /// the new name. Two independent writes: the habit list and the mutated
    /// completion set each go through their own sync subject. Best-effort,
    /// client-driven; weeks not currently held in memory are not migrated.
    pub fn rename_habit(&mut self, now_ms: i64, old: &str, new: &str) -> Result<()> {
        if !self.habits.rename(old, new) {
            return Err(anyhow!("unknown habit: {old}"));
        }
        let payload = self.habits.payload();
        let target = self.target();
        let habits_loaded = self.habits_loaded;
        let engine = self.scheduler.engine(SubjectId::HabitList);
        if habits_loaded {
            engine.mark_loaded();
        }
        engine.note_mutation_immediate(
            now_ms,
            QueuedWrite {
                target,
                write: PendingWrite::ReplaceHabitList { payload },
            },
        );

        let week_held = match self.week.as_mut() {
            Some(week) => {
                week.record.rename(old, new);
                true
            }
            None => false,
        };
        if week_held {
            self.queue_week_write(now_ms)?;
        }
        Ok(())
    }

    // ── Applications (entity rows) ─────────────────────────────────────

    pub fn load_applications(
        &mut self,
        identity: &dyn Identity,
        store: &dyn KeyedStore,
        local: &LocalStore,
    ) -> Result<()> {
        self.user = identity.current_user()?;
        self.applications = match &self.user {
            Some(user) => {
                let rows = store
                    .list(user, RecordKind::Entity, None)
                    .map_err(|e| anyhow!("applications load failed: {e}"))?;
                let mut parsed = Vec::with_capacity(rows.len());
                for row in rows {
                    match JobApplication::from_payload(&row.payload) {
                        Ok(app) => parsed.push(app),
                        Err(e) => warn!("skipping malformed application row: {e}"),
                    }
                }
                parsed
            }
            None => local
                .read(db::APPLICATIONS_KEY)
                .and_then(|v| v.as_array().cloned())
                .map(|rows| {
                    rows.iter()
                        .filter_map(|payload| JobApplication::from_payload(payload).ok())
                        .collect()
                })
                .unwrap_or_default(),
        };
        self.applications_loaded = true;
        Ok(())
    }

    /// Explicit "add row": inserted immediately with empty fields, applied
    /// optimistically. A failed insert keeps the row in memory.
    pub fn add_application(
        &mut self,
        store: &dyn KeyedStore,
        local: &LocalStore,
        now_ms: i64,
        date: Option<NaiveDate>,
    ) -> Result<JobApplication> {
        let mut row = JobApplication::new(uuid::Uuid::new_v4().to_string());
        row.date = date;
        self.applications.push(row.clone());

        match &self.user {
            Some(user) => {
                let key = RecordKey::Entity {
                    user: user.clone(),
                    entity_id: row.id.clone(),
                };
                store
                    .upsert(&key, row.payload(), now_ms)
                    .map_err(|e| anyhow!("application insert failed: {e}"))?;
            }
            None => self.write_applications_local(local),
        }
        Ok(row)
    }

    /// Optimistic single-field update, debounced per `(row, field)` so a
    /// concurrent edit to a sibling row or field never rides along.
    pub fn update_application_field(
        &mut self,
        now_ms: i64,
        id: &str,
        field: &str,
        value: Value,
    ) -> Result<()> {
        let row = self
            .applications
            .iter_mut()
            .find(|row| row.id == id)
            .ok_or_else(|| anyhow!("unknown application: {id}"))?;
        row.apply_field(field, &value)?;

        let target = self.target();
        let loaded = self.applications_loaded;
        let engine = self.scheduler.engine(SubjectId::EntityField {
            entity_id: id.to_string(),
            field: field.to_string(),
        });
        if loaded {
            engine.mark_loaded();
        }
        engine.note_mutation(
            now_ms,
            QueuedWrite {
                target,
                write: PendingWrite::PatchEntityField {
                    entity_id: id.to_string(),
                    field: field.to_string(),
                    value,
                },
            },
        );
        Ok(())
    }

    /// Removes exactly one row, immediately.
    pub fn delete_application(
        &mut self,
        store: &dyn KeyedStore,
        local: &LocalStore,
        id: &str,
    ) -> Result<()> {
        self.applications.retain(|row| row.id != id);
        self.scheduler
            .retire(|sid| matches!(sid, SubjectId::EntityField { entity_id, .. } if entity_id.as_str() == id));

        match &self.user {
            Some(user) => {
                let key = RecordKey::Entity {
                    user: user.clone(),
                    entity_id: id.to_string(),
                };
                store
                    .delete(&key)
                    .map_err(|e| anyhow!("application delete failed: {e}"))?;
            }
            None => self.write_applications_local(local),
        }
        Ok(())
    }

    pub fn applications(&self) -> &[JobApplication] {
        &self.applications
    }

    fn write_applications_local(&self, local: &LocalStore) {
        let rows: Vec<Value> = self.applications.iter().map(JobApplication::payload).collect();
        local.write(db::APPLICATIONS_KEY, &Value::Array(rows));
    }

    // ── Write pump ─────────────────────────────────────────────────────

    /// Dispatches every due write and feeds results back into the engines.
    /// Store errors are absorbed here as state transitions — the caller's
    /// edit stays in memory and retries on their next edit. Returns the
    /// number of writes issued.
    pub fn flush_due(
        &mut self,
        store: &dyn KeyedStore,
        local: &LocalStore,
        now_ms: i64,
    ) -> usize {
        let due = self.scheduler.take_due(now_ms);
        let issued = due.len();
        for (id, queued) in due {
            let result = crate::sync::dispatch(store, local, &queued, now_ms)
                .map_err(|e| e.to_string());
            self.scheduler.complete(&id, now_ms, result);
        }
        issued
    }

    pub fn saved_indicator(&self, now_ms: i64) -> bool {
        self.scheduler.saved_indicator(now_ms)
    }

    pub fn any_dirty(&self) -> bool {
        self.scheduler.any_dirty()
    }

    pub fn subject_state(&self, id: &SubjectId) -> Option<crate::sync::EngineState> {
        self.scheduler.get(id).map(|e| e.state())
    }
}

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}
