use chrono::NaiveDate;
use serde_json::json;

use super::*;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("date")
}

fn section_write(date: NaiveDate, section: &str, text: &str) -> QueuedWrite {
    QueuedWrite {
        target: SyncTarget::Remote {
            user: "u1".to_string(),
        },
        write: PendingWrite::MergeSection {
            date,
            section: section.to_string(),
            blob: json!({ "text": text }),
        },
    }
}

#[test]
fn mutation_before_load_never_arms_timer() {
    let mut engine = SubjectEngine::new(DEBOUNCE_MS);
    let armed = engine.note_mutation(1_000, section_write(date(2025, 1, 6), "goals", "x"));
    assert!(!armed);
    assert_eq!(engine.state(), EngineState::Idle);
    assert!(engine.take_due(i64::MAX).is_none());
}

#[test]
fn rapid_mutations_coalesce_to_latest_value() {
    let mut engine = SubjectEngine::new(DEBOUNCE_MS);
    engine.mark_loaded();
    let d = date(2025, 1, 6);
    engine.note_mutation(1_000, section_write(d, "goals", "a"));
    engine.note_mutation(1_200, section_write(d, "goals", "ab"));
    engine.note_mutation(1_400, section_write(d, "goals", "abc"));

    // The third edit restarted the timer; nothing is due at its old deadline.
    assert!(engine.take_due(1_400 + DEBOUNCE_MS - 1).is_none());

    let due = engine.take_due(1_400 + DEBOUNCE_MS).expect("due write");
    match due.write {
        PendingWrite::MergeSection { blob, .. } => assert_eq!(blob, json!({ "text": "abc" })),
        other => panic!("unexpected write: {other:?}"),
    }
    assert_eq!(engine.state(), EngineState::Saving);

    // Exactly one write: nothing else is pending.
    engine.complete(3_000, Ok(()));
    assert_eq!(engine.state(), EngineState::Saved);
    assert!(engine.take_due(i64::MAX).is_none());
}

#[test]
fn saved_indicator_auto_clears() {
    let mut engine = SubjectEngine::new(DEBOUNCE_MS);
    engine.mark_loaded();
    let d = date(2025, 1, 6);
    engine.note_mutation(0, section_write(d, "goals", "a"));
    engine.take_due(DEBOUNCE_MS).expect("due");
    engine.complete(1_000, Ok(()));
    assert!(engine.saved_indicator(1_000 + SAVED_FLASH_MS - 1));
    assert!(!engine.saved_indicator(1_000 + SAVED_FLASH_MS));
}

#[test]
fn failure_parks_in_error_and_rearms_on_next_mutation() {
    let mut engine = SubjectEngine::new(DEBOUNCE_MS);
    engine.mark_loaded();
    let d = date(2025, 1, 6);
    engine.note_mutation(0, section_write(d, "goals", "a"));
    engine.take_due(DEBOUNCE_MS).expect("due");
    engine.complete(1_000, Err("network down".to_string()));
    assert_eq!(engine.state(), EngineState::Error);
    assert_eq!(engine.last_error(), Some("network down"));

    // No automatic retry loop.
    assert!(engine.take_due(i64::MAX).is_none());

    // The next mutation re-arms with the latest value.
    engine.note_mutation(2_000, section_write(d, "goals", "ab"));
    assert_eq!(engine.state(), EngineState::Dirty);
    assert!(engine.take_due(2_000 + DEBOUNCE_MS).is_some());
}

#[test]
fn mutation_while_saving_stays_queued_for_next_cycle() {
    let mut engine = SubjectEngine::new(DEBOUNCE_MS);
    engine.mark_loaded();
    let d = date(2025, 1, 6);
    engine.note_mutation(0, section_write(d, "goals", "a"));
    engine.take_due(DEBOUNCE_MS).expect("due");

    // Edit lands while the first write is in flight.
    engine.note_mutation(800, section_write(d, "goals", "ab"));
    assert_eq!(engine.state(), EngineState::Saving);
    // Never a second write while one is in flight for the same subject.
    assert!(engine.take_due(i64::MAX).is_none());

    engine.complete(900, Ok(()));
    assert_eq!(engine.state(), EngineState::Dirty);
    let next = engine.take_due(800 + DEBOUNCE_MS).expect("queued write");
    match next.write {
        PendingWrite::MergeSection { blob, .. } => assert_eq!(blob, json!({ "text": "ab" })),
        other => panic!("unexpected write: {other:?}"),
    }
}

#[test]
fn immediate_mutations_are_due_at_once() {
    let mut engine = SubjectEngine::new(DEBOUNCE_MS);
    engine.mark_loaded();
    let w = date(2025, 1, 6);
    engine.note_mutation_immediate(
        500,
        QueuedWrite {
            target: SyncTarget::Local,
            write: PendingWrite::ReplaceWeek {
                week_start: w,
                payload: json!({}),
            },
        },
    );
    assert!(engine.take_due(500).is_some());
}

#[test]
fn scheduler_retires_subjects_for_old_selection_only() {
    let mut scheduler = SyncScheduler::new();
    let d1 = date(2025, 1, 6);
    let d2 = date(2025, 1, 7);
    for (d, text) in [(d1, "old"), (d2, "new")] {
        let id = SubjectId::DaySection {
            date: d,
            section: "goals".to_string(),
        };
        let engine = scheduler.engine(id);
        engine.mark_loaded();
        engine.note_mutation(0, section_write(d, "goals", text));
    }
    let field_id = SubjectId::EntityField {
        entity_id: "r1".to_string(),
        field: "company".to_string(),
    };
    scheduler.engine(field_id.clone()).mark_loaded();

    scheduler.retire(|id| id.is_day(d1));

    let due = scheduler.take_due(DEBOUNCE_MS);
    assert_eq!(due.len(), 1);
    match &due[0].1.write {
        PendingWrite::MergeSection { date, .. } => assert_eq!(*date, d2),
        other => panic!("unexpected write: {other:?}"),
    }
    // Selection-independent subjects survive.
    assert!(scheduler.get(&field_id).is_some());
}
