use std::sync::Mutex;

use chrono::NaiveDate;
use serde_json::json;

use dayloop::insights::{collect_week_days, run_study_plan, study_plan_context};
use dayloop::llm::{Generated, GenerationError, GenerationRequest, TextGenerator};
use dayloop::store::{InMemoryKeyedStore, KeyedStore, RecordKey};

struct FakeGenerator {
    prompts: Mutex<Vec<String>>,
}

impl FakeGenerator {
    fn new() -> Self {
        Self {
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn last_prompt(&self) -> String {
        self.prompts
            .lock()
            .expect("lock")
            .last()
            .cloned()
            .unwrap_or_default()
    }
}

impl TextGenerator for FakeGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<Generated, GenerationError> {
        self.prompts
            .lock()
            .expect("lock")
            .push(request.prompt.clone());
        Ok(Generated::Text("Monday: arrays".to_string()))
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("date")
}

#[test]
fn plan_prompt_carries_solved_attempted_and_notes_per_day() {
    let store = InMemoryKeyedStore::new();
    let mon = date(2025, 1, 6);

    store
        .upsert(
            &RecordKey::Day {
                user: "u1".to_string(),
                date: mon,
            },
            json!({
                "leetcode": [
                    { "text": "two-sum", "done": true },
                    { "text": "lru-cache", "done": false },
                ],
            }),
            0,
        )
        .expect("seed monday");
    store
        .upsert(
            &RecordKey::Day {
                user: "u1".to_string(),
                date: date(2025, 1, 7),
            },
            json!({ "studyNotes": "reviewed graph traversals" }),
            0,
        )
        .expect("seed tuesday");

    let days = collect_week_days(&store, "u1", mon).expect("collect week");
    assert_eq!(days.len(), 7);

    let context = study_plan_context(mon, &days);
    assert_eq!(context.total_solved, 1);

    let generator = FakeGenerator::new();
    let plan = run_study_plan(&context, &generator, Some(500)).expect("study plan");
    assert_eq!(plan, "Monday: arrays");

    let prompt = generator.last_prompt();
    assert!(prompt.contains("Mon: solved [two-sum], attempted [lru-cache]"));
    assert!(prompt.contains("Tue: reviewed graph traversals"));
    assert!(prompt.contains("TOTAL PROBLEMS SOLVED THIS WEEK: 1"));
}

#[test]
fn week_without_activity_reports_placeholders() {
    let store = InMemoryKeyedStore::new();
    let mon = date(2025, 1, 6);
    let days = collect_week_days(&store, "u1", mon).expect("collect week");
    let context = study_plan_context(mon, &days);
    assert_eq!(context.total_solved, 0);
    assert!(context.days.is_empty());

    let block = context.to_prompt_block();
    assert!(block.contains("(no problems recorded yet this week)"));
    assert!(block.contains("(no study notes recorded)"));
}
