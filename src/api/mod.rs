use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use serde_json::Value;

use crate::db::LocalStore;
use crate::insights;
use crate::llm::TextGenerator;
use crate::planner::{Identity, Planner};
use crate::record::{status_counts, week_start_of, ApplicationStatus};
use crate::store::KeyedStore;
use crate::sync::now_ms;

fn parse_date(date: &str) -> Result<NaiveDate> {
    date.parse()
        .map_err(|_| anyhow!("invalid date (expected YYYY-MM-DD): {date}"))
}

pub fn open_local_store(app_dir: String) -> LocalStore {
    LocalStore::open(Path::new(&app_dir))
}

pub fn new_planner() -> Planner {
    Planner::new()
}

pub fn select_date(
    planner: &mut Planner,
    identity: &dyn Identity,
    store: &dyn KeyedStore,
    local: &LocalStore,
    date: String,
) -> Result<()> {
    planner.select_date(identity, store, local, parse_date(&date)?)
}

pub fn select_week(
    planner: &mut Planner,
    identity: &dyn Identity,
    store: &dyn KeyedStore,
    local: &LocalStore,
    date: String,
) -> Result<()> {
    planner.select_week(identity, store, local, parse_date(&date)?)
}

pub fn update_section(planner: &mut Planner, section: String, blob: Value) -> Result<()> {
    planner.update_section(now_ms(), &section, blob)
}

pub fn toggle_habit(planner: &mut Planner, habit: String, day: String) -> Result<bool> {
    let day = day
        .parse()
        .map_err(|_| anyhow!("invalid weekday: {day}"))?;
    planner.toggle_habit(now_ms(), &habit, day)
}

pub fn rename_habit(planner: &mut Planner, old: String, new: String) -> Result<()> {
    planner.rename_habit(now_ms(), &old, &new)
}

/// The host's autosave tick: dispatches whatever debounce windows have
/// elapsed. Returns the number of writes issued.
pub fn autosave_tick(
    planner: &mut Planner,
    store: &dyn KeyedStore,
    local: &LocalStore,
) -> usize {
    planner.flush_due(store, local, now_ms())
}

pub fn habit_analysis(
    planner: &Planner,
    store: &dyn KeyedStore,
    generator: &dyn TextGenerator,
) -> Result<String> {
    let user = planner
        .user()
        .ok_or_else(|| anyhow!("habit analysis requires a signed-in user"))?;
    insights::run_habit_analysis(store, user, planner.habits(), generator, Some(500))
}

pub fn daily_brief(
    planner: &Planner,
    generator: &dyn TextGenerator,
    date: String,
) -> Result<String> {
    let context = insights::daily_brief_context(planner, parse_date(&date)?);
    insights::run_daily_brief(&context, generator, Some(500))
}

/// Week-in-review for the week containing `date`. The generated wrap-up is
/// also merged into that Sunday's `notes` section.
pub fn weekly_wrap(
    planner: &Planner,
    store: &dyn KeyedStore,
    generator: &dyn TextGenerator,
    date: String,
) -> Result<String> {
    let user = planner
        .user()
        .ok_or_else(|| anyhow!("weekly wrap requires a signed-in user"))?;
    let week_start = week_start_of(parse_date(&date)?);
    insights::run_weekly_wrap(
        store,
        user,
        planner.habits(),
        week_start,
        generator,
        Some(450),
        now_ms(),
    )
}

pub fn study_plan(
    planner: &Planner,
    store: &dyn KeyedStore,
    generator: &dyn TextGenerator,
    date: String,
) -> Result<String> {
    let user = planner
        .user()
        .ok_or_else(|| anyhow!("study plan requires a signed-in user"))?;
    let week_start = week_start_of(parse_date(&date)?);
    let days = insights::collect_week_days(store, user, week_start)?;
    let context = insights::study_plan_context(week_start, &days);
    insights::run_study_plan(&context, generator, Some(500))
}

/// Row counts per application status, over the loaded collection.
pub fn application_status_summary(planner: &Planner) -> BTreeMap<ApplicationStatus, usize> {
    status_counts(planner.applications())
}
