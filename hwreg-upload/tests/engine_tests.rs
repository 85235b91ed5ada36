//! Submission and polling engine tests
//!
//! Drive the engine against the in-memory registry with a recording sleeper,
//! so a full 20-attempt poll budget runs instantly.

mod helpers;

use helpers::fake_registry::{server_error, status};
use helpers::{build_engine, record, FakeRegistry, HangingSleeper, RecordingSleeper};
use hwreg_common::events::{EventBus, UploadEvent};
use hwreg_upload::models::{RowResult, RowStatus, ScanSettings};
use hwreg_upload::services::result_aggregator::{build_outcome, summarize};
use hwreg_upload::services::{DuplicateChecker, EngineRun, ImportStatus, RegistryError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn completed(run: EngineRun) -> (Vec<hwreg_upload::models::RecordOutcome>, usize, bool) {
    match run {
        EngineRun::Completed {
            outcomes,
            uploaded,
            cancelled,
        } => (outcomes, uploaded, cancelled),
        EngineRun::Blocked { serials } => panic!("unexpected blocked run: {:?}", serials),
    }
}

/// Fresh record, import reports complete on the first poll
#[tokio::test]
async fn test_fresh_record_completes() {
    let registry = Arc::new(FakeRegistry::new());
    registry.script_status(vec![Ok(status("complete"))]);
    let sleeper = Arc::new(RecordingSleeper::new());
    let engine = build_engine(registry.clone(), sleeper.clone(), EventBus::new(100));

    let run = engine
        .run(Uuid::new_v4(), vec![record("PF3ABC", "T0FB")], &CancellationToken::new())
        .await;
    let (outcomes, uploaded, cancelled) = completed(run);

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].row.result, RowResult::Success);
    assert_eq!(outcomes[0].row.status, RowStatus::Complete);
    assert_eq!(uploaded, 1);
    assert!(!cancelled);
    assert_eq!(sleeper.count(), 0);

    let rows: Vec<_> = outcomes.iter().map(|o| o.row.clone()).collect();
    let summary = summarize(&rows);
    assert_eq!(
        (summary.total, summary.success, summary.failed, summary.duplicate, summary.pending),
        (1, 1, 0, 0, 0)
    );
}

/// Pre-flight match: nothing is created and the run is blocked
#[tokio::test]
async fn test_preflight_match_blocks_run() {
    let registry = Arc::new(FakeRegistry::with_registered(&["pf3abc"]));
    let engine = build_engine(
        registry.clone(),
        Arc::new(RecordingSleeper::new()),
        EventBus::new(100),
    );

    let run = engine
        .run(Uuid::new_v4(), vec![record("PF3ABC", "T0FB")], &CancellationToken::new())
        .await;

    match run {
        EngineRun::Blocked { serials } => assert_eq!(serials, vec!["PF3ABC".to_string()]),
        other => panic!("expected blocked run, got {:?}", other),
    }
    assert_eq!(registry.creates(), 0);
    assert_eq!(registry.status_checks(), 0);
}

/// Import status errors on every poll and the serial never appears
#[tokio::test]
async fn test_unresolved_import_is_queued_after_poll_budget() {
    let registry = Arc::new(FakeRegistry::new());
    registry.set_default_status(Err(RegistryError::Network("timeout".to_string())));
    let sleeper = Arc::new(RecordingSleeper::new());
    let engine = build_engine(registry.clone(), sleeper.clone(), EventBus::new(100));

    let run = engine
        .run(Uuid::new_v4(), vec![record("PF3ABC", "T0FB")], &CancellationToken::new())
        .await;
    let (outcomes, uploaded, _) = completed(run);

    let row = &outcomes[0].row;
    assert_eq!(row.result, RowResult::Accepted);
    assert_eq!(row.status, RowStatus::Queued);
    assert!(row.reason.contains("20 attempts"), "reason: {}", row.reason);
    assert!(row.reason.contains("import-1"), "reason: {}", row.reason);
    assert_eq!(uploaded, 1);

    // Never more than max_attempts polls, sleeping only between attempts
    assert_eq!(registry.status_checks(), 20);
    assert_eq!(sleeper.count(), 19);
    assert!(sleeper.durations().iter().all(|d| *d == Duration::from_secs(15)));

    // Outcome keeps queued records out of the retry set
    let outcome = build_outcome(Uuid::nil(), false, chrono::Utc::now(), &outcomes, uploaded, None);
    assert!(outcome.failed_records.is_empty());
    assert!(outcome.success);
}

/// Create rejected with "already assigned"
#[tokio::test]
async fn test_already_assigned_create_is_duplicate() {
    let registry = Arc::new(FakeRegistry::new());
    registry.fail_create(
        "PF3ABC",
        RegistryError::Api {
            status: 400,
            code: Some("BadRequest".to_string()),
            message: "Device is already assigned to another tenant".to_string(),
        },
    );
    let engine = build_engine(
        registry.clone(),
        Arc::new(RecordingSleeper::new()),
        EventBus::new(100),
    );

    let run = engine
        .run(Uuid::new_v4(), vec![record("PF3ABC", "T0FB")], &CancellationToken::new())
        .await;
    let (outcomes, uploaded, _) = completed(run);

    assert_eq!(outcomes[0].row.result, RowResult::Skipped);
    assert_eq!(outcomes[0].row.status, RowStatus::Duplicate);
    assert_eq!(uploaded, 0);
    assert_eq!(registry.status_checks(), 0);
}

/// One valid record and one without a hardware hash
#[tokio::test]
async fn test_invalid_record_fails_validation_without_submission() {
    let registry = Arc::new(FakeRegistry::new());
    registry.set_default_status(Ok(status("complete")));
    let engine = build_engine(
        registry.clone(),
        Arc::new(RecordingSleeper::new()),
        EventBus::new(100),
    );

    let run = engine
        .run(
            Uuid::new_v4(),
            vec![record("GOOD1", "T0FB"), record("BAD1", "")],
            &CancellationToken::new(),
        )
        .await;
    let (outcomes, uploaded, _) = completed(run);

    assert_eq!(registry.submitted(), vec!["GOOD1".to_string()]);
    assert_eq!(outcomes[1].row.result, RowResult::Failed);
    assert_eq!(outcomes[1].row.status, RowStatus::Validation);

    let outcome = build_outcome(Uuid::nil(), false, chrono::Utc::now(), &outcomes, uploaded, None);
    assert_eq!(outcome.summary.total, 2);
    assert_eq!(outcome.summary.failed, 1);
    assert_eq!(outcome.failed_records.len(), 1);
    assert_eq!(outcome.failed_records[0].serial_number(), "BAD1");
    assert!(!outcome.success);
}

#[tokio::test]
async fn test_create_failure_is_upload_error_and_siblings_continue() {
    let registry = Arc::new(FakeRegistry::new());
    registry.set_default_status(Ok(status("completed")));
    registry.fail_create("A1", server_error("quota exceeded"));
    let engine = build_engine(
        registry.clone(),
        Arc::new(RecordingSleeper::new()),
        EventBus::new(100),
    );

    let run = engine
        .run(
            Uuid::new_v4(),
            vec![record("A1", "h1"), record("B2", "h2")],
            &CancellationToken::new(),
        )
        .await;
    let (outcomes, uploaded, _) = completed(run);

    assert_eq!(outcomes[0].row.status, RowStatus::UploadError);
    assert_eq!(outcomes[0].row.reason, "InternalServerError: quota exceeded");
    assert_eq!(outcomes[1].row.result, RowResult::Success);
    assert_eq!(uploaded, 1);
}

#[tokio::test]
async fn test_import_error_status_fails_record() {
    let registry = Arc::new(FakeRegistry::new());
    registry.script_status(vec![
        Ok(status("pending")),
        Ok(ImportStatus {
            status: "error".to_string(),
            error_name: Some("ZtdDeviceHardwareHashInvalid".to_string()),
            error_code: Some("808".to_string()),
        }),
    ]);
    let sleeper = Arc::new(RecordingSleeper::new());
    let engine = build_engine(registry.clone(), sleeper.clone(), EventBus::new(100));

    let run = engine
        .run(Uuid::new_v4(), vec![record("A1", "h1")], &CancellationToken::new())
        .await;
    let (outcomes, _, _) = completed(run);

    assert_eq!(outcomes[0].row.result, RowResult::Failed);
    assert_eq!(outcomes[0].row.status, RowStatus::ImportError);
    assert_eq!(outcomes[0].row.reason, "ZtdDeviceHardwareHashInvalid (808)");
    assert_eq!(registry.status_checks(), 2);
    assert_eq!(sleeper.count(), 1);
}

#[tokio::test]
async fn test_already_assigned_import_error_is_duplicate() {
    let registry = Arc::new(FakeRegistry::new());
    registry.set_default_status(Ok(ImportStatus {
        status: "error".to_string(),
        error_name: Some("ZtdDeviceAlreadyAssigned".to_string()),
        error_code: Some("806".to_string()),
    }));
    let engine = build_engine(
        registry.clone(),
        Arc::new(RecordingSleeper::new()),
        EventBus::new(100),
    );

    let run = engine
        .run(Uuid::new_v4(), vec![record("A1", "h1")], &CancellationToken::new())
        .await;
    let (outcomes, _, _) = completed(run);

    assert_eq!(outcomes[0].row.result, RowResult::Skipped);
    assert_eq!(outcomes[0].row.status, RowStatus::Duplicate);
}

/// The serial appearing in the registry resolves the record even while the
/// import status is still pending
#[tokio::test]
async fn test_registry_presence_resolves_before_import_status() {
    let registry = Arc::new(FakeRegistry::new());
    registry.set_register_on_create(true);
    let sleeper = Arc::new(RecordingSleeper::new());
    let engine = build_engine(registry.clone(), sleeper.clone(), EventBus::new(100));

    let run = engine
        .run(Uuid::new_v4(), vec![record("A1", "h1")], &CancellationToken::new())
        .await;
    let (outcomes, _, _) = completed(run);

    assert_eq!(outcomes[0].row.result, RowResult::Success);
    assert_eq!(registry.status_checks(), 1);
    assert_eq!(sleeper.count(), 0);
}

/// Partially registered input: registered records are skipped, the rest run
#[tokio::test]
async fn test_partial_preflight_match_skips_registered_only() {
    let registry = Arc::new(FakeRegistry::with_registered(&["OLD1"]));
    registry.set_default_status(Ok(status("success")));
    let engine = build_engine(
        registry.clone(),
        Arc::new(RecordingSleeper::new()),
        EventBus::new(100),
    );

    let run = engine
        .run(
            Uuid::new_v4(),
            vec![record("old1", "h1"), record("NEW1", "h2")],
            &CancellationToken::new(),
        )
        .await;
    let (outcomes, uploaded, _) = completed(run);

    assert_eq!(outcomes[0].row.result, RowResult::Skipped);
    assert_eq!(outcomes[1].row.result, RowResult::Success);
    assert_eq!(registry.submitted(), vec!["NEW1".to_string()]);
    assert_eq!(uploaded, 1);
}

/// Invalid records are never "registered", so they prevent a blocked run
#[tokio::test]
async fn test_invalid_record_prevents_blocked_outcome() {
    let registry = Arc::new(FakeRegistry::with_registered(&["OLD1"]));
    let engine = build_engine(
        registry.clone(),
        Arc::new(RecordingSleeper::new()),
        EventBus::new(100),
    );

    let run = engine
        .run(
            Uuid::new_v4(),
            vec![record("OLD1", "h1"), record("", "h2")],
            &CancellationToken::new(),
        )
        .await;
    let (outcomes, _, _) = completed(run);

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].row.status, RowStatus::Duplicate);
    assert_eq!(outcomes[1].row.status, RowStatus::Validation);
    assert_eq!(registry.creates(), 0);
}

#[tokio::test]
async fn test_empty_input_completes_with_no_rows() {
    let registry = Arc::new(FakeRegistry::new());
    let engine = build_engine(
        registry.clone(),
        Arc::new(RecordingSleeper::new()),
        EventBus::new(100),
    );

    let run = engine
        .run(Uuid::new_v4(), Vec::new(), &CancellationToken::new())
        .await;
    let (outcomes, uploaded, _) = completed(run);

    assert!(outcomes.is_empty());
    assert_eq!(uploaded, 0);
    assert_eq!(registry.finds(), 0);
}

/// Cancelling during a poll sleep reports the in-flight record as submitted
/// and every later record as not submitted
#[tokio::test]
async fn test_cancel_during_poll_marks_shutdown_rows() {
    let registry = Arc::new(FakeRegistry::new());
    let events = EventBus::new(100);
    let mut rx = events.subscribe();
    let engine = Arc::new(build_engine(registry.clone(), Arc::new(HangingSleeper), events));
    let cancel = CancellationToken::new();

    let task = {
        let engine = Arc::clone(&engine);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            engine
                .run(
                    Uuid::new_v4(),
                    vec![record("A1", "h1"), record("B2", "h2")],
                    &cancel,
                )
                .await
        })
    };

    // First poll attempt means A1 was submitted
    loop {
        if let UploadEvent::PollAttempt { .. } = rx.recv().await.unwrap() {
            break;
        }
    }
    cancel.cancel();

    let (outcomes, uploaded, cancelled) = completed(task.await.unwrap());
    assert!(cancelled);
    assert_eq!(uploaded, 1);
    assert_eq!(outcomes[0].row.result, RowResult::Accepted);
    assert_eq!(outcomes[0].row.status, RowStatus::Shutdown);
    assert!(outcomes[0].row.reason.contains("import-1"));
    assert_eq!(outcomes[1].row.result, RowResult::Failed);
    assert_eq!(outcomes[1].row.status, RowStatus::Shutdown);
    assert_eq!(registry.submitted(), vec!["A1".to_string()]);
}

#[tokio::test]
async fn test_events_follow_record_progress() {
    let registry = Arc::new(FakeRegistry::new());
    registry.set_default_status(Ok(status("complete")));
    let events = EventBus::new(100);
    let mut rx = events.subscribe();
    let engine = build_engine(registry, Arc::new(RecordingSleeper::new()), events);
    let run_id = Uuid::new_v4();

    engine
        .run(run_id, vec![record("A1", "h1")], &CancellationToken::new())
        .await;

    let mut types = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.run_id(), run_id);
        types.push(event.event_type());
    }
    assert_eq!(
        types,
        vec!["PreflightChecked", "RecordStarted", "PollAttempt", "RecordCompleted"]
    );
}

// ---------------------------------------------------------------------------
// Duplicate checker
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_duplicate_check_is_idempotent() {
    let registry = Arc::new(FakeRegistry::with_registered(&["A1"]));
    let checker = DuplicateChecker::new(registry.clone(), ScanSettings::default());

    let first = checker.check_serial("a1").await;
    let second = checker.check_serial("a1").await;
    assert_eq!(first, second);
    assert!(first.exists && first.blocking);
    assert_eq!(first.source, "indexed");
}

#[tokio::test]
async fn test_duplicate_check_falls_back_to_scan() {
    let serials: Vec<String> = (0..250).map(|i| format!("SN{:04}", i)).collect();
    let refs: Vec<&str> = serials.iter().map(String::as_str).collect();
    let registry = Arc::new(FakeRegistry::with_registered(&refs));
    registry.set_find_fails(true);
    let checker = DuplicateChecker::new(registry.clone(), ScanSettings::default());

    let found = checker.check_serial(" sn0210 ").await;
    assert!(found.exists);
    assert_eq!(found.source, "scan");
    assert_eq!(registry.lists(), 3);

    let missing = checker.check_serial("NOPE").await;
    assert!(!missing.exists);
    assert_eq!(registry.lists(), 6);
}

#[tokio::test]
async fn test_scan_respects_page_cap() {
    let serials: Vec<String> = (0..50).map(|i| format!("SN{:04}", i)).collect();
    let refs: Vec<&str> = serials.iter().map(String::as_str).collect();
    let registry = Arc::new(FakeRegistry::with_registered(&refs));
    registry.set_find_fails(true);
    let checker = DuplicateChecker::new(
        registry.clone(),
        ScanSettings {
            page_size: 10,
            max_pages: 2,
        },
    );

    let result = checker.check_serial("SN0045").await;
    assert!(!result.exists);
    assert_eq!(registry.lists(), 2);
}

#[tokio::test]
async fn test_scan_failure_degrades_to_not_found() {
    let registry = Arc::new(FakeRegistry::with_registered(&["A1"]));
    registry.set_find_fails(true);
    registry.set_list_fails(true);
    let checker = DuplicateChecker::new(registry.clone(), ScanSettings::default());

    let result = checker.check_serial("A1").await;
    assert!(!result.exists);
    assert!(!result.blocking);
    assert_eq!(result.source, "unavailable");
}

/// A record the checker reports as blocking is never submitted
#[tokio::test]
async fn test_blocking_record_never_submitted() {
    let registry = Arc::new(FakeRegistry::with_registered(&["A1"]));
    registry.set_default_status(Ok(status("complete")));
    let engine = build_engine(
        registry.clone(),
        Arc::new(RecordingSleeper::new()),
        EventBus::new(100),
    );

    for serial in ["A1", "a1", " A1 "] {
        let outcome = engine
            .process_record(Uuid::new_v4(), record(serial, "h"), &CancellationToken::new())
            .await;
        assert_eq!(outcome.row.status, RowStatus::Duplicate);
        assert!(!outcome.submitted);
    }
    assert_eq!(registry.creates(), 0);
}

/// Device registered by someone else between pre-flight and submission
#[tokio::test]
async fn test_registration_after_preflight_caught_by_guard() {
    let registry = Arc::new(FakeRegistry::new());
    registry.register_after_finds(1, "RACE1");
    let engine = build_engine(
        registry.clone(),
        Arc::new(RecordingSleeper::new()),
        EventBus::new(100),
    );

    let run = engine
        .run(Uuid::new_v4(), vec![record("RACE1", "h")], &CancellationToken::new())
        .await;
    let (outcomes, uploaded, _) = completed(run);

    assert_eq!(registry.finds(), 2);
    assert_eq!(outcomes[0].row.result, RowResult::Skipped);
    assert_eq!(outcomes[0].row.status, RowStatus::Duplicate);
    assert!(!outcomes[0].submitted);
    assert_eq!(uploaded, 0);
    assert_eq!(registry.creates(), 0);
}

#[tokio::test]
async fn test_scan_matches_non_ascii_serial_case_insensitively() {
    let registry = Arc::new(FakeRegistry::with_registered(&["äb1"]));
    registry.set_find_fails(true);
    let checker = DuplicateChecker::new(registry.clone(), ScanSettings::default());

    let result = checker.check_serial("ÄB1").await;
    assert!(result.exists);
    assert_eq!(result.source, "scan");
}
