use std::collections::{BTreeMap, BTreeSet};

use anyhow::{anyhow, Result};
use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::store::{KeyedStore, RecordKey, StoreError};

/// Monday of the week containing `date`.
pub fn week_start_of(date: NaiveDate) -> NaiveDate {
    let offset = u64::from(date.weekday().num_days_from_monday());
    date - Days::new(offset)
}

/// One day's remote row: a mapping from section key to an opaque section
/// blob. Writes go through `merge_section` so sibling sections survive.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DayRecord {
    sections: Map<String, Value>,
}

impl DayRecord {
    pub fn from_payload(payload: &Value) -> Self {
        match payload {
            Value::Object(map) => Self {
                sections: map.clone(),
            },
            _ => Self::default(),
        }
    }

    pub fn payload(&self) -> Value {
        Value::Object(self.sections.clone())
    }

    pub fn section(&self, key: &str) -> Option<&Value> {
        self.sections.get(key)
    }

    pub fn set_section(&mut self, key: &str, blob: Value) {
        self.sections.insert(key.to_string(), blob);
    }

    pub fn section_keys(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }
}

/// Read-merge-write of exactly one section key under `(user, date)`.
///
/// Not transactional: two section engines racing on the same date can lose
/// one section's update if both read before either writes. Accepted
/// limitation of the merged-blob Day Record shape; the granularity shrinks
/// the blast radius to one date, it does not eliminate the race.
pub fn merge_section(
    store: &dyn KeyedStore,
    user: &str,
    date: NaiveDate,
    section_key: &str,
    blob: Value,
    now_ms: i64,
) -> Result<(), StoreError> {
    let key = RecordKey::Day {
        user: user.to_string(),
        date,
    };
    let mut record = match store.get(&key)? {
        Some(row) => DayRecord::from_payload(&row.payload),
        None => DayRecord::default(),
    };
    record.set_section(section_key, blob);
    store.upsert(&key, record.payload(), now_ms)
}

/// Default-then-override merge, so fields added to a default shape after a
/// record was persisted still appear on hydration. Shallow, like the source.
pub fn hydrate_section(default: &Value, fetched: Option<&Value>) -> Value {
    match (default, fetched) {
        (Value::Object(base), Some(Value::Object(over))) => {
            let mut merged = base.clone();
            for (k, v) in over {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        (_, Some(over)) => over.clone(),
        (_, None) => default.clone(),
    }
}

/// Membership key of the habit completion set: `(habit name, day of week)`,
/// encoded on the wire as `"habit::Mon"`. Name-based on purpose — renaming
/// or reordering the habit list never corrupts completion history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletionKey {
    pub habit: String,
    pub day: Weekday,
}

impl CompletionKey {
    pub fn new(habit: impl Into<String>, day: Weekday) -> Self {
        Self {
            habit: habit.into(),
            day,
        }
    }

    pub fn encode(&self) -> String {
        format!("{}::{}", self.habit, self.day)
    }

    /// Splits on the last `::` so habit names containing `::` round-trip.
    /// Returns `None` for anything else, including legacy index-based keys
    /// like `"3-Wed"`, which are dropped on hydration.
    pub fn decode(raw: &str) -> Option<Self> {
        let (habit, day) = raw.rsplit_once("::")?;
        if habit.is_empty() {
            return None;
        }
        let day: Weekday = day.parse().ok()?;
        Some(Self::new(habit, day))
    }
}

impl Ord for CompletionKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.habit, self.day.num_days_from_monday())
            .cmp(&(&other.habit, other.day.num_days_from_monday()))
    }
}

impl PartialOrd for CompletionKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// One week's completion set. Membership is idempotent: toggling is
/// symmetric difference on a single key, unaffected by any other key.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WeekRecord {
    completions: BTreeSet<CompletionKey>,
}

impl WeekRecord {
    pub fn from_payload(payload: &Value) -> Self {
        let mut completions = BTreeSet::new();
        if let Value::Object(map) = payload {
            for (raw, value) in map {
                if value.as_bool() != Some(true) {
                    continue;
                }
                if let Some(key) = CompletionKey::decode(raw) {
                    completions.insert(key);
                }
            }
        }
        Self { completions }
    }

    pub fn payload(&self) -> Value {
        let mut map = Map::new();
        for key in &self.completions {
            map.insert(key.encode(), Value::Bool(true));
        }
        Value::Object(map)
    }

    pub fn contains(&self, key: &CompletionKey) -> bool {
        self.completions.contains(key)
    }

    /// Returns whether the key is present after the toggle.
    pub fn toggle(&mut self, key: CompletionKey) -> bool {
        if self.completions.remove(&key) {
            false
        } else {
            self.completions.insert(key);
            true
        }
    }

    pub fn clear_row(&mut self, habit: &str) {
        self.completions.retain(|key| key.habit != habit);
    }

    pub fn clear_all(&mut self) {
        self.completions.clear();
    }

    /// Moves every `(old, day)` membership to `(new, day)`.
    pub fn rename(&mut self, old: &str, new: &str) {
        let moved: Vec<Weekday> = self
            .completions
            .iter()
            .filter(|key| key.habit == old)
            .map(|key| key.day)
            .collect();
        if moved.is_empty() {
            return;
        }
        self.completions.retain(|key| key.habit != old);
        for day in moved {
            self.completions.insert(CompletionKey::new(new, day));
        }
    }

    pub fn completed_days(&self, habit: &str) -> Vec<Weekday> {
        self.completions
            .iter()
            .filter(|key| key.habit == habit)
            .map(|key| key.day)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.completions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.completions.is_empty()
    }
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ApplicationStatus {
    Applying,
    #[default]
    Applied,
    Interviewing,
    Offer,
    Rejected,
    Withdrawn,
}

/// Field names accepted by `update_application_field`, as they appear on the
/// wire.
pub const APPLICATION_FIELDS: &[&str] = &[
    "company",
    "position",
    "status",
    "date",
    "salary",
    "website",
    "contact",
    "referenceLink",
    "nextActions",
];

/// One independently editable row in the applications collection.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobApplication {
    pub id: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub position: String,
    #[serde(default)]
    pub status: ApplicationStatus,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub salary: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub contact: String,
    #[serde(default)]
    pub reference_link: String,
    #[serde(default)]
    pub next_actions: Vec<String>,
}

impl JobApplication {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn from_payload(payload: &Value) -> Result<Self> {
        serde_json::from_value(payload.clone())
            .map_err(|e| anyhow!("malformed application row: {e}"))
    }

    pub fn payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Applies one field without touching siblings.
    pub fn apply_field(&mut self, field: &str, value: &Value) -> Result<()> {
        fn parse<T: serde::de::DeserializeOwned>(field: &str, value: &Value) -> Result<T> {
            serde_json::from_value(value.clone())
                .map_err(|e| anyhow!("bad value for field {field}: {e}"))
        }

        match field {
            "company" => self.company = parse(field, value)?,
            "position" => self.position = parse(field, value)?,
            "status" => self.status = parse(field, value)?,
            "date" => self.date = parse(field, value)?,
            "salary" => self.salary = parse(field, value)?,
            "website" => self.website = parse(field, value)?,
            "contact" => self.contact = parse(field, value)?,
            "referenceLink" => self.reference_link = parse(field, value)?,
            "nextActions" => self.next_actions = parse(field, value)?,
            other => return Err(anyhow!("unknown application field: {other}")),
        }
        Ok(())
    }
}

/// Sets one field inside a raw row payload, leaving siblings untouched.
/// Used at dispatch time so a field write never needs the full typed row.
pub fn patch_payload_field(payload: &mut Value, field: &str, value: Value) -> Result<()> {
    if !APPLICATION_FIELDS.contains(&field) {
        return Err(anyhow!("unknown application field: {field}"));
    }
    let Value::Object(map) = payload else {
        return Err(anyhow!("application payload is not an object"));
    };
    map.insert(field.to_string(), value);
    Ok(())
}

pub fn status_counts(rows: &[JobApplication]) -> BTreeMap<ApplicationStatus, usize> {
    let mut counts = BTreeMap::new();
    for row in rows {
        *counts.entry(row.status).or_insert(0) += 1;
    }
    counts
}

/// Ordered list of habit names, a singleton settings row per user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HabitList {
    pub habits: Vec<String>,
}

impl Default for HabitList {
    fn default() -> Self {
        Self {
            habits: [
                "Morning Workout (fasted)",
                "3+ Cold Outreach",
                "5 LeetCode Problems",
                "3 hrs Study",
                "1 hr Build",
                "5+ Applications",
                "8 Glasses Water",
                "Skincare Routine",
                "Sleep by 10:30 PM",
                "Evening Workout (30 min)",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

impl HabitList {
    pub fn from_payload(payload: &Value) -> Self {
        serde_json::from_value(payload.clone()).unwrap_or_default()
    }

    pub fn payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn rename(&mut self, old: &str, new: &str) -> bool {
        match self.habits.iter_mut().find(|name| name.as_str() == old) {
            Some(slot) => {
                *slot = new.to_string();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn week_start_normalizes_to_monday() {
        let wed = NaiveDate::from_ymd_opt(2025, 1, 8).expect("date");
        let mon = NaiveDate::from_ymd_opt(2025, 1, 6).expect("date");
        assert_eq!(week_start_of(wed), mon);
        assert_eq!(week_start_of(mon), mon);
        let sun = NaiveDate::from_ymd_opt(2025, 1, 12).expect("date");
        assert_eq!(week_start_of(sun), mon);
    }

    #[test]
    fn completion_key_roundtrip_and_legacy_keys() {
        let key = CompletionKey::new("Read", Weekday::Wed);
        assert_eq!(key.encode(), "Read::Wed");
        assert_eq!(CompletionKey::decode("Read::Wed"), Some(key));

        // Habit names containing the separator still round-trip.
        let odd = CompletionKey::new("a::b", Weekday::Fri);
        assert_eq!(CompletionKey::decode(&odd.encode()), Some(odd));

        // Legacy index-based keys are not completion keys.
        assert_eq!(CompletionKey::decode("3-Wed"), None);
        assert_eq!(CompletionKey::decode("::Mon"), None);
        assert_eq!(CompletionKey::decode("Read::Noday"), None);
    }

    #[test]
    fn week_record_drops_legacy_keys_on_hydration() {
        let payload = json!({
            "Read::Wed": true,
            "3-Wed": true,
            "Write::Fri": false,
        });
        let record = WeekRecord::from_payload(&payload);
        assert_eq!(record.len(), 1);
        assert!(record.contains(&CompletionKey::new("Read", Weekday::Wed)));
    }

    #[test]
    fn hydrate_section_overrides_defaults_shallowly() {
        let default = json!({"intention": "", "energy": 5});
        let fetched = json!({"intention": "ship feature"});
        assert_eq!(
            hydrate_section(&default, Some(&fetched)),
            json!({"intention": "ship feature", "energy": 5})
        );
        assert_eq!(hydrate_section(&default, None), default);
    }

    #[test]
    fn apply_field_patches_one_field_only() {
        let mut app = JobApplication::new("r1");
        app.company = "Acme".to_string();
        app.apply_field("position", &json!("SWE")).expect("patch");
        assert_eq!(app.company, "Acme");
        assert_eq!(app.position, "SWE");
        assert!(app.apply_field("nope", &json!("x")).is_err());
    }
}
