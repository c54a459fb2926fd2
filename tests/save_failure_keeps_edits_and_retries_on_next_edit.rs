use chrono::NaiveDate;
use serde_json::json;

use dayloop::db::LocalStore;
use dayloop::planner::{Planner, StaticIdentity};
use dayloop::store::{InMemoryKeyedStore, KeyedStore, RecordKey};
use dayloop::sync::{DEBOUNCE_MS, EngineState, SubjectId};

#[test]
fn failed_save_keeps_the_edit_in_memory_and_retries_on_the_next_edit() {
    let store = InMemoryKeyedStore::new();
    let local = LocalStore::in_memory();
    let identity = StaticIdentity::signed_in("u1");
    let date = NaiveDate::from_ymd_opt(2025, 1, 6).expect("date");

    let mut planner = Planner::new();
    planner
        .select_date(&identity, &store, &local, date)
        .expect("select date");

    store.set_fail_writes(true);
    planner
        .update_section(0, "intention", json!("important edit"))
        .expect("edit");
    assert_eq!(planner.flush_due(&store, &local, DEBOUNCE_MS), 1);

    let subject = SubjectId::DaySection {
        date,
        section: "intention".to_string(),
    };
    assert_eq!(planner.subject_state(&subject), Some(EngineState::Error));
    // The optimistic edit is never rolled back.
    assert_eq!(planner.section("intention"), Some(&json!("important edit")));
    assert_eq!(store.row_count(), 0);

    // No automatic retry loop: nothing fires until the user edits again.
    store.set_fail_writes(false);
    assert_eq!(planner.flush_due(&store, &local, i64::MAX), 0);

    planner
        .update_section(10_000, "intention", json!("important edit, take two"))
        .expect("edit again");
    assert_eq!(planner.flush_due(&store, &local, 10_000 + DEBOUNCE_MS), 1);

    let key = RecordKey::Day {
        user: "u1".to_string(),
        date,
    };
    let row = store.get(&key).expect("get").expect("row");
    assert_eq!(
        row.payload.get("intention"),
        Some(&json!("important edit, take two"))
    );
}
