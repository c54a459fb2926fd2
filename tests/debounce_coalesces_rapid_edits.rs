use chrono::NaiveDate;
use serde_json::json;

use dayloop::db::LocalStore;
use dayloop::planner::{Planner, StaticIdentity};
use dayloop::store::{InMemoryKeyedStore, KeyedStore, RecordKey};
use dayloop::sync::DEBOUNCE_MS;

#[test]
fn n_rapid_edits_issue_exactly_one_write_with_the_final_value() {
    let store = InMemoryKeyedStore::new();
    let local = LocalStore::in_memory();
    let identity = StaticIdentity::signed_in("u1");
    let date = NaiveDate::from_ymd_opt(2025, 1, 6).expect("date");

    let mut planner = Planner::new();
    planner
        .select_date(&identity, &store, &local, date)
        .expect("select date");

    planner
        .update_section(0, "intention", json!("s"))
        .expect("edit");
    planner
        .update_section(200, "intention", json!("sh"))
        .expect("edit");
    planner
        .update_section(400, "intention", json!("ship"))
        .expect("edit");

    // Still inside the window of the last edit: nothing due yet.
    assert_eq!(planner.flush_due(&store, &local, 400 + DEBOUNCE_MS - 1), 0);
    assert_eq!(store.row_count(), 0);

    // Window expires: exactly one write, carrying the final value.
    assert_eq!(planner.flush_due(&store, &local, 400 + DEBOUNCE_MS), 1);
    let key = RecordKey::Day {
        user: "u1".to_string(),
        date,
    };
    let row = store.get(&key).expect("get").expect("row");
    assert_eq!(row.payload.get("intention"), Some(&json!("ship")));

    // Nothing left to flush.
    assert_eq!(planner.flush_due(&store, &local, i64::MAX), 0);
}

#[test]
fn saved_indicator_flashes_then_clears() {
    let store = InMemoryKeyedStore::new();
    let local = LocalStore::in_memory();
    let identity = StaticIdentity::signed_in("u1");
    let date = NaiveDate::from_ymd_opt(2025, 1, 6).expect("date");

    let mut planner = Planner::new();
    planner
        .select_date(&identity, &store, &local, date)
        .expect("select date");
    planner
        .update_section(0, "intention", json!("x"))
        .expect("edit");

    let saved_at = DEBOUNCE_MS;
    planner.flush_due(&store, &local, saved_at);
    assert!(planner.saved_indicator(saved_at + 100));
    assert!(!planner.saved_indicator(saved_at + dayloop::sync::SAVED_FLASH_MS));
}
