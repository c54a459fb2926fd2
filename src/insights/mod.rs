use std::fmt::Write as _;

use anyhow::Result;
use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde_json::Value;

use crate::llm::{GenerationRequest, TextGenerator};
use crate::planner::Planner;
use crate::record::{
    merge_section, ApplicationStatus, CompletionKey, DayRecord, HabitList, JobApplication,
    WeekRecord,
};
use crate::store::{KeyedStore, RecordKey, RecordKind, StoreError};

/// How many recent weeks the habit analysis looks at.
pub const ANALYSIS_WEEKS: usize = 4;

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HabitRate {
    pub habit: String,
    pub completions: usize,
    pub possible: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WeekdayRate {
    pub day: Weekday,
    pub completions: usize,
    pub possible: usize,
}

fn percent(completions: usize, possible: usize) -> u32 {
    if possible == 0 {
        return 0;
    }
    ((completions * 100 + possible / 2) / possible) as u32
}

impl HabitRate {
    pub fn percent(&self) -> u32 {
        percent(self.completions, self.possible)
    }
}

impl WeekdayRate {
    pub fn percent(&self) -> u32 {
        percent(self.completions, self.possible)
    }
}

/// Completion-rate aggregation over a set of week records, ranked best to
/// worst per habit and per weekday.
#[derive(Clone, Debug, Default)]
pub struct HabitAnalysis {
    pub weeks_analyzed: usize,
    pub per_habit: Vec<HabitRate>,
    pub per_day: Vec<WeekdayRate>,
    pub week_summaries: Vec<String>,
}

pub fn analyze_weeks(habits: &HabitList, weeks: &[(NaiveDate, WeekRecord)]) -> HabitAnalysis {
    let weeks_analyzed = weeks.len();
    let per_habit_possible = weeks_analyzed * 7;
    let per_day_possible = weeks_analyzed * habits.habits.len();

    let mut habit_totals = vec![0usize; habits.habits.len()];
    let mut day_totals = [0usize; 7];
    let mut week_summaries = Vec::with_capacity(weeks_analyzed);

    for (week_start, record) in weeks {
        let mut lines = Vec::with_capacity(habits.habits.len());
        for (hi, habit) in habits.habits.iter().enumerate() {
            let mut days_hit = Vec::new();
            for (di, day) in WEEKDAYS.iter().enumerate() {
                if record.contains(&CompletionKey::new(habit.clone(), *day)) {
                    habit_totals[hi] += 1;
                    day_totals[di] += 1;
                    days_hit.push(day.to_string());
                }
            }
            let hit = if days_hit.is_empty() {
                "missed".to_string()
            } else {
                days_hit.join(", ")
            };
            lines.push(format!("  {habit}: {}/7 ({hit})", days_hit.len()));
        }
        week_summaries.push(format!("Week of {week_start}:\n{}", lines.join("\n")));
    }

    let mut per_habit: Vec<HabitRate> = habits
        .habits
        .iter()
        .zip(habit_totals)
        .map(|(habit, completions)| HabitRate {
            habit: habit.clone(),
            completions,
            possible: per_habit_possible,
        })
        .collect();
    per_habit.sort_by(|a, b| b.completions.cmp(&a.completions));

    let mut per_day: Vec<WeekdayRate> = WEEKDAYS
        .iter()
        .zip(day_totals)
        .map(|(day, completions)| WeekdayRate {
            day: *day,
            completions,
            possible: per_day_possible,
        })
        .collect();
    per_day.sort_by(|a, b| b.completions.cmp(&a.completions));

    HabitAnalysis {
        weeks_analyzed,
        per_habit,
        per_day,
        week_summaries,
    }
}

/// The most recent week records for one user, newest first.
pub fn collect_recent_weeks(
    store: &dyn KeyedStore,
    user: &str,
    limit: usize,
) -> Result<Vec<(NaiveDate, WeekRecord)>, StoreError> {
    let rows = store.list(user, RecordKind::Week, Some(limit))?;
    Ok(rows
        .into_iter()
        .filter_map(|row| match row.key {
            RecordKey::Week { week_start, .. } => {
                Some((week_start, WeekRecord::from_payload(&row.payload)))
            }
            _ => None,
        })
        .collect())
}

/// The data block the habit-analysis prompt is built from.
pub fn habit_summary_block(analysis: &HabitAnalysis) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "RAW WEEKLY DATA:");
    for summary in &analysis.week_summaries {
        let _ = writeln!(out, "{summary}\n");
    }
    let _ = writeln!(out, "HABIT COMPLETION RATES (best to worst):");
    for rate in &analysis.per_habit {
        let _ = writeln!(
            out,
            "  {}: {}% ({}/{} days)",
            rate.habit,
            rate.percent(),
            rate.completions,
            rate.possible
        );
    }
    let _ = writeln!(out, "DAY-OF-WEEK STRENGTH (best to worst):");
    for rate in &analysis.per_day {
        let _ = writeln!(out, "  {}: {}% completion", rate.day, rate.percent());
    }
    out
}

/// Runs the habit analysis for one user. With no tracked weeks yet, returns
/// canned guidance without calling the generator at all.
pub fn run_habit_analysis(
    store: &dyn KeyedStore,
    user: &str,
    habits: &HabitList,
    generator: &dyn TextGenerator,
    max_output_tokens: Option<u32>,
) -> Result<String> {
    let weeks = collect_recent_weeks(store, user, ANALYSIS_WEEKS)?;
    if weeks.is_empty() {
        return Ok(
            "Not enough habit data yet. Track your habits for at least a week and come back."
                .to_string(),
        );
    }
    let analysis = analyze_weeks(habits, &weeks);
    let prompt = format!(
        "Analyze {} week(s) of habit tracking data and report strengths, gaps, \
         and one concrete action per gap.\n\n{}",
        analysis.weeks_analyzed,
        habit_summary_block(&analysis)
    );
    let generated = generator.generate(&GenerationRequest::text(prompt, max_output_tokens))?;
    Ok(generated.into_text())
}

fn text_of(section: Option<&Value>) -> String {
    section
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Non-empty `{ text, done }` entries of a checklist section.
fn checklist_of(section: Option<&Value>) -> Vec<(String, bool)> {
    section
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let text = item.get("text")?.as_str()?;
                    if text.is_empty() {
                        return None;
                    }
                    let done = item.get("done").and_then(Value::as_bool).unwrap_or(false);
                    Some((text.to_string(), done))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// All seven day records of one week, missing days as empty records.
pub fn collect_week_days(
    store: &dyn KeyedStore,
    user: &str,
    week_start: NaiveDate,
) -> Result<Vec<(NaiveDate, DayRecord)>, StoreError> {
    let mut days = Vec::with_capacity(7);
    for offset in 0..7u64 {
        let date = week_start + Days::new(offset);
        let key = RecordKey::Day {
            user: user.to_string(),
            date,
        };
        let record = store
            .get(&key)?
            .map(|row| DayRecord::from_payload(&row.payload))
            .unwrap_or_default();
        days.push((date, record));
    }
    Ok(days)
}

/// One day's notable content for the week-in-review.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DayNotes {
    pub date: NaiveDate,
    pub intention: String,
    pub priorities: Vec<(String, bool)>,
    pub reflection: String,
}

impl DayNotes {
    fn is_empty(&self) -> bool {
        self.intention.is_empty() && self.priorities.is_empty() && self.reflection.is_empty()
    }
}

/// Everything the week-in-review wrap-up is built from: the habit week, the
/// seven daily records, and the applications dated inside the week.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WeeklyWrapContext {
    pub week_start: NaiveDate,
    pub habit_percent: u32,
    pub habit_lines: Vec<String>,
    pub days: Vec<DayNotes>,
    pub applications: Vec<(String, String, ApplicationStatus)>,
}

pub fn weekly_wrap_context(
    week_start: NaiveDate,
    habits: &HabitList,
    week: &WeekRecord,
    days: &[(NaiveDate, DayRecord)],
    applications: &[JobApplication],
) -> WeeklyWrapContext {
    let mut habit_lines = Vec::with_capacity(habits.habits.len());
    let mut total = 0;
    for habit in &habits.habits {
        let days_hit: Vec<String> = WEEKDAYS
            .iter()
            .filter(|day| week.contains(&CompletionKey::new(habit.as_str(), **day)))
            .map(|day| day.to_string())
            .collect();
        total += days_hit.len();
        let hit = if days_hit.is_empty() {
            "missed".to_string()
        } else {
            days_hit.join(", ")
        };
        habit_lines.push(format!("  {habit}: {}/7 ({hit})", days_hit.len()));
    }

    let day_notes = days
        .iter()
        .map(|(date, record)| DayNotes {
            date: *date,
            intention: text_of(record.section("intention")),
            priorities: checklist_of(record.section("priorities")),
            reflection: text_of(record.section("reflection")),
        })
        .filter(|notes| !notes.is_empty())
        .collect();

    let week_end = week_start + Days::new(6);
    let applications = applications
        .iter()
        .filter(|app| {
            app.date
                .is_some_and(|date| date >= week_start && date <= week_end)
        })
        .map(|app| (app.company.clone(), app.position.clone(), app.status))
        .collect();

    WeeklyWrapContext {
        week_start,
        habit_percent: percent(total, habits.habits.len() * 7),
        habit_lines,
        days: day_notes,
        applications,
    }
}

impl WeeklyWrapContext {
    pub fn to_prompt_block(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "WEEK OF {}:", self.week_start);
        let _ = writeln!(out, "HABIT COMPLETION ({}% overall):", self.habit_percent);
        for line in &self.habit_lines {
            let _ = writeln!(out, "{line}");
        }
        let _ = writeln!(out, "DAILY INTENTIONS AND REFLECTIONS:");
        if self.days.is_empty() {
            let _ = writeln!(out, "  (no daily notes recorded)");
        }
        for notes in &self.days {
            let _ = writeln!(out, "  {}:", notes.date.weekday());
            if !notes.intention.is_empty() {
                let _ = writeln!(out, "    Intention: {}", notes.intention);
            }
            if !notes.priorities.is_empty() {
                let _ = writeln!(out, "    Priorities:");
                for (text, done) in &notes.priorities {
                    let _ = writeln!(out, "      - {text}{}", if *done { " [done]" } else { "" });
                }
            }
            if !notes.reflection.is_empty() {
                let _ = writeln!(out, "    Reflection: {}", notes.reflection);
            }
        }
        let _ = writeln!(out, "JOB APPLICATIONS THIS WEEK:");
        if self.applications.is_empty() {
            let _ = writeln!(out, "  (none this week)");
        }
        for (company, position, status) in &self.applications {
            let _ = writeln!(out, "  - {company} / {position} [{status:?}]");
        }
        out
    }
}

/// Generates the week-in-review wrap-up and merges it into the `notes`
/// section of the week's Sunday, so it shows up in that day's plan.
pub fn run_weekly_wrap(
    store: &dyn KeyedStore,
    user: &str,
    habits: &HabitList,
    week_start: NaiveDate,
    generator: &dyn TextGenerator,
    max_output_tokens: Option<u32>,
    now_ms: i64,
) -> Result<String> {
    let week = store
        .get(&RecordKey::Week {
            user: user.to_string(),
            week_start,
        })?
        .map(|row| WeekRecord::from_payload(&row.payload))
        .unwrap_or_default();
    let days = collect_week_days(store, user, week_start)?;
    let rows = store.list(user, RecordKind::Entity, None)?;
    let applications: Vec<JobApplication> = rows
        .iter()
        .filter_map(|row| JobApplication::from_payload(&row.payload).ok())
        .collect();

    let context = weekly_wrap_context(week_start, habits, &week, &days, &applications);
    let prompt = format!(
        "Write a direct week-in-review wrap-up from this data: wins, what \
         slipped, how to address each gap, and one focus for next week.\n\n{}",
        context.to_prompt_block()
    );
    let generated = generator.generate(&GenerationRequest::text(prompt, max_output_tokens))?;
    let wrap = generated.into_text();

    let sunday = week_start + Days::new(6);
    merge_section(
        store,
        user,
        sunday,
        "notes",
        Value::String(wrap.clone()),
        now_ms,
    )?;
    Ok(wrap)
}

/// One day's problem-grind activity for the study plan.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StudyDayActivity {
    pub date: NaiveDate,
    pub solved: Vec<String>,
    pub attempted: Vec<String>,
    pub notes: String,
}

impl StudyDayActivity {
    fn is_empty(&self) -> bool {
        self.solved.is_empty() && self.attempted.is_empty() && self.notes.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StudyPlanContext {
    pub week_start: NaiveDate,
    pub days: Vec<StudyDayActivity>,
    pub total_solved: usize,
}

/// Per-day solved/attempted problems and study notes across one week.
/// Notes are clipped to their first 120 characters.
pub fn study_plan_context(
    week_start: NaiveDate,
    days: &[(NaiveDate, DayRecord)],
) -> StudyPlanContext {
    let mut activity = Vec::new();
    let mut total_solved = 0;
    for (date, record) in days {
        let mut solved = Vec::new();
        let mut attempted = Vec::new();
        for (text, done) in checklist_of(record.section("leetcode")) {
            if done {
                solved.push(text);
            } else {
                attempted.push(text);
            }
        }
        total_solved += solved.len();
        let notes: String = text_of(record.section("studyNotes"))
            .chars()
            .take(120)
            .collect();
        let day = StudyDayActivity {
            date: *date,
            solved,
            attempted,
            notes,
        };
        if !day.is_empty() {
            activity.push(day);
        }
    }
    StudyPlanContext {
        week_start,
        days: activity,
        total_solved,
    }
}

impl StudyPlanContext {
    pub fn to_prompt_block(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "CURRENT WEEK ({}):", self.week_start);
        let _ = writeln!(out, "LEETCODE ACTIVITY:");
        let mut any_problems = false;
        for day in &self.days {
            if day.solved.is_empty() && day.attempted.is_empty() {
                continue;
            }
            any_problems = true;
            let mut line = format!(
                "  {}: solved [{}]",
                day.date.weekday(),
                if day.solved.is_empty() {
                    "none".to_string()
                } else {
                    day.solved.join(", ")
                }
            );
            if !day.attempted.is_empty() {
                let _ = write!(line, ", attempted [{}]", day.attempted.join(", "));
            }
            let _ = writeln!(out, "{line}");
        }
        if !any_problems {
            let _ = writeln!(out, "  (no problems recorded yet this week)");
        }
        let _ = writeln!(out, "STUDY NOTES:");
        let mut any_notes = false;
        for day in &self.days {
            if day.notes.is_empty() {
                continue;
            }
            any_notes = true;
            let _ = writeln!(out, "  {}: {}", day.date.weekday(), day.notes);
        }
        if !any_notes {
            let _ = writeln!(out, "  (no study notes recorded)");
        }
        let _ = writeln!(out, "TOTAL PROBLEMS SOLVED THIS WEEK: {}", self.total_solved);
        out
    }
}

pub fn run_study_plan(
    context: &StudyPlanContext,
    generator: &dyn TextGenerator,
    max_output_tokens: Option<u32>,
) -> Result<String> {
    let prompt = format!(
        "Build a five-day study plan from this week's activity: name the \
         gaps, how to address each, then one line per weekday.\n\n{}",
        context.to_prompt_block()
    );
    let generated = generator.generate(&GenerationRequest::text(prompt, max_output_tokens))?;
    Ok(generated.into_text())
}

/// Everything the daily brief needs from the selected day and week.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DailyBriefContext {
    pub date: Option<NaiveDate>,
    pub intention: String,
    pub priorities: Vec<(String, bool)>,
    pub timetable: Vec<(String, String)>,
    pub completed_today: Vec<String>,
    pub application_count: usize,
}

pub fn daily_brief_context(planner: &Planner, date: NaiveDate) -> DailyBriefContext {
    let intention = text_of(planner.section("intention"));
    let priorities = checklist_of(planner.section("priorities"));

    let timetable = planner
        .section("timetable")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|block| {
                    let time = block.get("time")?.as_str()?;
                    let activity = block.get("activity")?.as_str()?;
                    Some((time.to_string(), activity.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    let today = date.weekday();
    let completed_today = planner
        .week_record()
        .map(|record| {
            planner
                .habits()
                .habits
                .iter()
                .filter(|habit| record.contains(&CompletionKey::new(habit.as_str(), today)))
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    DailyBriefContext {
        date: Some(date),
        intention,
        priorities,
        timetable,
        completed_today,
        application_count: planner.applications().len(),
    }
}

impl DailyBriefContext {
    pub fn to_prompt_block(&self) -> String {
        let mut out = String::new();
        if let Some(date) = self.date {
            let _ = writeln!(out, "Today is {date} ({}).", date.weekday());
        }
        let _ = writeln!(out, "MORNING INTENTION:");
        let _ = writeln!(
            out,
            "{}",
            if self.intention.is_empty() {
                "(none set)"
            } else {
                &self.intention
            }
        );
        let _ = writeln!(out, "TOP PRIORITIES TODAY:");
        if self.priorities.is_empty() {
            let _ = writeln!(out, "  (none)");
        }
        for (text, done) in &self.priorities {
            let _ = writeln!(out, "  - {text}{}", if *done { " [done]" } else { "" });
        }
        let _ = writeln!(out, "SCHEDULE:");
        if self.timetable.is_empty() {
            let _ = writeln!(out, "  (no schedule set for today)");
        }
        for (time, activity) in &self.timetable {
            let _ = writeln!(out, "  {time}: {activity}");
        }
        let _ = writeln!(out, "HABITS COMPLETED TODAY:");
        if self.completed_today.is_empty() {
            let _ = writeln!(out, "  (none yet)");
        }
        for habit in &self.completed_today {
            let _ = writeln!(out, "  - {habit}");
        }
        let _ = writeln!(out, "APPLICATIONS TRACKED: {}", self.application_count);
        out
    }
}

pub fn run_daily_brief(
    context: &DailyBriefContext,
    generator: &dyn TextGenerator,
    max_output_tokens: Option<u32>,
) -> Result<String> {
    let prompt = format!(
        "Write a short, direct daily brief for this plan.\n\n{}",
        context.to_prompt_block()
    );
    let generated = generator.generate(&GenerationRequest::text(prompt, max_output_tokens))?;
    Ok(generated.into_text())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn week(week_start: (i32, u32, u32), keys: &[(&str, Weekday)]) -> (NaiveDate, WeekRecord) {
        let start = NaiveDate::from_ymd_opt(week_start.0, week_start.1, week_start.2).expect("date");
        let mut record = WeekRecord::default();
        for (habit, day) in keys {
            record.toggle(CompletionKey::new(*habit, *day));
        }
        (start, record)
    }

    #[test]
    fn analysis_ranks_habits_and_days_by_completions() {
        let habits = HabitList {
            habits: vec!["Read".to_string(), "Run".to_string()],
        };
        let weeks = vec![
            week(
                (2025, 1, 6),
                &[
                    ("Read", Weekday::Mon),
                    ("Read", Weekday::Wed),
                    ("Run", Weekday::Mon),
                ],
            ),
            week((2025, 1, 13), &[("Read", Weekday::Mon)]),
        ];

        let analysis = analyze_weeks(&habits, &weeks);
        assert_eq!(analysis.weeks_analyzed, 2);
        assert_eq!(analysis.per_habit[0].habit, "Read");
        assert_eq!(analysis.per_habit[0].completions, 3);
        assert_eq!(analysis.per_habit[0].possible, 14);
        assert_eq!(analysis.per_habit[1].habit, "Run");
        assert_eq!(analysis.per_habit[1].completions, 1);

        assert_eq!(analysis.per_day[0].day, Weekday::Mon);
        assert_eq!(analysis.per_day[0].completions, 3);
        assert_eq!(analysis.per_day[0].possible, 4);

        assert_eq!(analysis.week_summaries.len(), 2);
        assert!(analysis.week_summaries[0].contains("Read: 2/7 (Mon, Wed)"));
        assert!(analysis.week_summaries[1].contains("Run: 0/7 (missed)"));
    }

    #[test]
    fn weekly_wrap_context_collects_notable_days_and_week_applications() {
        let habits = HabitList {
            habits: vec!["Read".to_string()],
        };
        let mon = NaiveDate::from_ymd_opt(2025, 1, 6).expect("date");
        let mut week = WeekRecord::default();
        week.toggle(CompletionKey::new("Read", Weekday::Mon));
        week.toggle(CompletionKey::new("Read", Weekday::Tue));

        let mut monday = DayRecord::default();
        monday.set_section("intention", json!("ship the deck"));
        monday.set_section(
            "priorities",
            json!([
                { "text": "send deck", "done": true },
                { "text": "", "done": false },
            ]),
        );
        let days = vec![(mon, monday), (mon + Days::new(1), DayRecord::default())];

        let mut in_week = JobApplication::new("r1");
        in_week.company = "Acme".to_string();
        in_week.position = "SWE".to_string();
        in_week.date = Some(mon + Days::new(2));
        let mut next_week = JobApplication::new("r2");
        next_week.company = "Globex".to_string();
        next_week.date = Some(mon + Days::new(9));
        let undated = JobApplication::new("r3");

        let context =
            weekly_wrap_context(mon, &habits, &week, &days, &[in_week, next_week, undated]);
        assert_eq!(context.habit_percent, 29);
        assert_eq!(context.habit_lines, vec!["  Read: 2/7 (Mon, Tue)"]);
        // The empty Tuesday never makes it into the notes.
        assert_eq!(context.days.len(), 1);
        assert_eq!(
            context.days[0].priorities,
            vec![("send deck".to_string(), true)]
        );
        assert_eq!(
            context.applications,
            vec![(
                "Acme".to_string(),
                "SWE".to_string(),
                ApplicationStatus::Applied
            )]
        );

        let block = context.to_prompt_block();
        assert!(block.contains("Intention: ship the deck"));
        assert!(block.contains("- Acme / SWE [Applied]"));
        assert!(!block.contains("Globex"));
    }

    #[test]
    fn study_plan_context_splits_solved_from_attempted_and_clips_notes() {
        let mon = NaiveDate::from_ymd_opt(2025, 1, 6).expect("date");
        let mut monday = DayRecord::default();
        monday.set_section(
            "leetcode",
            json!([
                { "text": "two-sum", "done": true },
                { "text": "lru-cache", "done": false },
            ]),
        );
        monday.set_section("studyNotes", json!("x".repeat(200)));
        let days = vec![(mon, monday), (mon + Days::new(1), DayRecord::default())];

        let context = study_plan_context(mon, &days);
        assert_eq!(context.total_solved, 1);
        assert_eq!(context.days.len(), 1);
        assert_eq!(context.days[0].solved, vec!["two-sum"]);
        assert_eq!(context.days[0].attempted, vec!["lru-cache"]);
        assert_eq!(context.days[0].notes.chars().count(), 120);

        let block = context.to_prompt_block();
        assert!(block.contains("Mon: solved [two-sum], attempted [lru-cache]"));
        assert!(block.contains("TOTAL PROBLEMS SOLVED THIS WEEK: 1"));
    }

    #[test]
    fn percent_rounds_to_nearest() {
        let rate = HabitRate {
            habit: "Read".to_string(),
            completions: 1,
            possible: 3,
        };
        assert_eq!(rate.percent(), 33);
        let rate = HabitRate {
            habit: "Read".to_string(),
            completions: 2,
            possible: 3,
        };
        assert_eq!(rate.percent(), 67);
    }
}
