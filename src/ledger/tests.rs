use super::*;
use crate::catalog::{CompletionPredicate, Metric};
use crate::clock::ManualClock;
use crate::model::schema::{COMPLETED_TASKS_FIELD, HISTORY_FIELD, POINTS_FIELD, POINT_BATCHES_FIELD};
use crate::store::{InMemoryMetafieldStore, StoreError};

struct Harness {
    ledger: PointsLedger,
    store: Arc<InMemoryMetafieldStore>,
    clock: Arc<ManualClock>,
}

fn start() -> DateTime<Utc> {
    // 10:00 at UTC+7
    DateTime::parse_from_rfc3339("2025-03-10T03:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryMetafieldStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    let ledger = PointsLedger::new(store.clone()).with_clock(clock.clone());
    Harness {
        ledger,
        store,
        clock,
    }
}

fn customer() -> CustomerId {
    CustomerId::parse("8105337946248").unwrap()
}

#[tokio::test]
async fn test_complete_task_credits_points() {
    let h = harness();

    let outcome = h
        .ledger
        .complete_task(&customer(), "login", json!({}))
        .await
        .unwrap();

    match &outcome {
        TaskOutcome::Completed {
            points_earned,
            new_balance,
            expires_at,
            ..
        } => {
            assert_eq!(*points_earned, 10);
            assert_eq!(*new_balance, 10);
            assert_eq!(*expires_at, start() + Duration::days(60));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(outcome.success());
    assert_eq!(h.ledger.get_balance(&customer()).await.unwrap(), 10);
    assert_eq!(
        h.store.raw(&customer(), POINTS_FIELD).await.as_deref(),
        Some("10")
    );
}

#[tokio::test]
async fn test_all_fields_written_in_one_batch() {
    let h = harness();
    h.ledger
        .complete_task(&customer(), "read_pages", json!({"pages": 12}))
        .await
        .unwrap();

    let writes = h.store.writes().await;
    assert_eq!(writes.len(), 1);
    let keys: Vec<&str> = writes[0].1.iter().map(|w| w.key.as_str()).collect();
    assert!(keys.contains(&COMPLETED_TASKS_FIELD));
    assert!(keys.contains(&POINT_BATCHES_FIELD));
    assert!(keys.contains(&HISTORY_FIELD));
    assert!(keys.contains(&POINTS_FIELD));
}

#[tokio::test]
async fn test_unknown_task_rejected_before_store_access() {
    let h = harness();
    let result = h
        .ledger
        .complete_task(&customer(), "fly_to_moon", json!({}))
        .await;

    assert!(matches!(result, Err(LedgerError::TaskNotFound(id)) if id == "fly_to_moon"));
    assert_eq!(h.store.read_count(), 0);
}

#[tokio::test]
async fn test_daily_task_once_per_store_day() {
    let h = harness();
    let c = customer();

    let first = h.ledger.complete_task(&c, "login", json!({})).await.unwrap();
    assert!(first.success());

    h.clock.advance(Duration::hours(13)); // 23:00 local, same day
    let second = h.ledger.complete_task(&c, "login", json!({})).await.unwrap();
    assert!(matches!(second, TaskOutcome::AlreadyCompleted { .. }));
    assert!(!second.success());
    assert_eq!(h.store.writes().await.len(), 1);

    let progress = h.ledger.progress(&c).await.unwrap();
    assert_eq!(progress.points, 10);
    assert_eq!(progress.history.len(), 1);
    assert_eq!(progress.completed_tasks["login"].count, 1);

    h.clock.advance(Duration::hours(1)); // 00:00 local, next day
    let third = h.ledger.complete_task(&c, "login", json!({})).await.unwrap();
    assert!(third.success());
    assert_eq!(h.ledger.get_balance(&c).await.unwrap(), 20);

    let progress = h.ledger.progress(&c).await.unwrap();
    assert_eq!(progress.completed_tasks["login"].count, 2);
    assert_eq!(progress.completed_tasks["login"].last_completed, "2025-03-11");
}

#[tokio::test]
async fn test_once_and_unlimited_cadence() {
    let store = Arc::new(InMemoryMetafieldStore::new());
    let catalog = TaskCatalog::from_tasks(vec![
        Task {
            id: "signup".to_string(),
            display_name: "Sign up".to_string(),
            points: 50,
            cadence: Cadence::Once,
            predicate: CompletionPredicate::Always,
            description: String::new(),
        },
        Task {
            id: "share".to_string(),
            display_name: "Share".to_string(),
            points: 5,
            cadence: Cadence::Unlimited,
            predicate: CompletionPredicate::Always,
            description: String::new(),
        },
    ])
    .unwrap();
    let clock = Arc::new(ManualClock::new(start()));
    let ledger = PointsLedger::new(store)
        .with_catalog(catalog)
        .with_clock(clock.clone());
    let c = customer();

    assert!(ledger.complete_task(&c, "signup", json!({})).await.unwrap().success());
    clock.advance(Duration::days(3));
    assert!(!ledger.complete_task(&c, "signup", json!({})).await.unwrap().success());

    for _ in 0..3 {
        assert!(ledger.complete_task(&c, "share", json!({})).await.unwrap().success());
    }
    assert_eq!(ledger.get_balance(&c).await.unwrap(), 65);
}

#[tokio::test]
async fn test_expired_batches_swept_on_write() {
    let h = harness();
    let c = customer();

    h.ledger.complete_task(&c, "login", json!({})).await.unwrap();
    h.clock.advance(Duration::days(61));
    h.ledger.complete_task(&c, "play_game", json!({})).await.unwrap();

    let progress = h.ledger.progress(&c).await.unwrap();
    assert_eq!(progress.points, 20);
    assert_eq!(progress.points_batches.len(), 1);
    assert_eq!(progress.points_batches[0].source, "task_play_game");

    let raw = h.store.raw(&c, POINT_BATCHES_FIELD).await.unwrap();
    let stored: Vec<PointBatch> = serde_json::from_str(&raw).unwrap();
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn test_balance_excludes_expired_without_write() {
    let h = harness();
    let c = customer();
    let ledger = h.ledger.with_cache(Arc::new(crate::cache::NoopBalanceCache));
    ledger.complete_task(&c, "login", json!({})).await.unwrap();

    h.clock.advance(Duration::days(60));
    assert_eq!(ledger.get_balance(&c).await.unwrap(), 0);
    assert_eq!(h.store.writes().await.len(), 1);
}

#[tokio::test]
async fn test_balance_read_is_idempotent_and_cached() {
    let h = harness();
    let c = customer();
    h.ledger.complete_task(&c, "read_pages", json!({})).await.unwrap();

    let reads_before = h.store.read_count();
    let first = h.ledger.get_balance(&c).await.unwrap();
    let second = h.ledger.get_balance(&c).await.unwrap();

    assert_eq!(first, 30);
    assert_eq!(first, second);
    assert_eq!(h.store.read_count(), reads_before + 1);
}

#[tokio::test]
async fn test_write_invalidates_cached_balance() {
    let h = harness();
    let c = customer();

    assert_eq!(h.ledger.get_balance(&c).await.unwrap(), 0);
    h.ledger.complete_task(&c, "login", json!({})).await.unwrap();
    assert_eq!(h.ledger.get_balance(&c).await.unwrap(), 10);
}

#[tokio::test]
async fn test_history_capped_newest_first() {
    let store = Arc::new(InMemoryMetafieldStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    let ledger = PointsLedger::new(store)
        .with_clock(clock.clone())
        .with_settings(LedgerSettings {
            history_limit: 3,
            ..LedgerSettings::default()
        });
    let c = customer();

    for _ in 0..5 {
        ledger.complete_task(&c, "login", json!({})).await.unwrap();
        clock.advance(Duration::days(1));
    }

    let progress = ledger.progress(&c).await.unwrap();
    assert_eq!(progress.history.len(), 3);
    let stamps: Vec<_> = progress.history.iter().map(HistoryEntry::timestamp).collect();
    assert!(stamps.windows(2).all(|w| w[0] > w[1]));
    assert_eq!(stamps[0], start() + Duration::days(4));
}

#[tokio::test]
async fn test_legacy_completed_tasks_repaired_on_next_write_only() {
    let h = harness();
    let c = customer();
    h.store
        .put_raw(&c, COMPLETED_TASKS_FIELD, r#"["login"]"#)
        .await;

    let progress = h.ledger.progress(&c).await.unwrap();
    assert!(progress.completed_tasks.is_empty());
    assert_eq!(
        h.store.raw(&c, COMPLETED_TASKS_FIELD).await.as_deref(),
        Some(r#"["login"]"#)
    );
    assert!(h.store.writes().await.is_empty());

    h.ledger.complete_task(&c, "login", json!({})).await.unwrap();
    let repaired = h.store.raw(&c, COMPLETED_TASKS_FIELD).await.unwrap();
    assert!(repaired.starts_with('{'));
}

#[tokio::test]
async fn test_submit_task_checks_predicate() {
    let h = harness();
    let c = customer();

    let short = h
        .ledger
        .submit_task(&c, "read_pages", json!({"pages": 4}))
        .await
        .unwrap();
    assert_eq!(
        short,
        TaskOutcome::NotQualified {
            task_id: "read_pages".to_string(),
            task_name: "Read a sample".to_string(),
            missing: 6,
            unit: "pages".to_string(),
        }
    );
    assert_eq!(h.store.read_count(), 0);

    let done = h
        .ledger
        .submit_task(&c, "read_pages", json!({"pages": 10}))
        .await
        .unwrap();
    assert_eq!(done.points_earned(), 30);

    let progress = h.ledger.progress(&c).await.unwrap();
    assert_eq!(progress.completed_tasks["read_pages"].metadata, json!({"pages": 10}));
}

#[tokio::test]
async fn test_custom_predicate_metric() {
    let h = harness();
    let task = h.ledger.catalog().get("browse_time").unwrap();
    assert_eq!(
        task.predicate,
        CompletionPredicate::AtLeast {
            metric: Metric::Minutes,
            minimum: 2
        }
    );
}

#[tokio::test]
async fn test_order_paid_credits_complete_order() {
    let h = harness();
    let c = customer();

    let outcome = h.ledger.record_order_paid(&c, "5551234").await.unwrap();
    assert_eq!(outcome.points_earned(), 100);

    let progress = h.ledger.progress(&c).await.unwrap();
    assert_eq!(
        progress.completed_tasks[COMPLETE_ORDER_TASK].metadata,
        json!({"orderId": "5551234"})
    );
}

#[tokio::test]
async fn test_submitted_order_task_needs_an_order() {
    let h = harness();
    let c = customer();

    let short = h
        .ledger
        .submit_task(&c, COMPLETE_ORDER_TASK, json!({}))
        .await
        .unwrap();
    assert!(matches!(
        short,
        TaskOutcome::NotQualified { missing: 1, ref unit, .. } if unit == "orders"
    ));
    assert!(h.store.writes().await.is_empty());

    let done = h
        .ledger
        .submit_task(&c, COMPLETE_ORDER_TASK, json!({"orders": 1}))
        .await
        .unwrap();
    assert_eq!(done.points_earned(), 100);
}

#[tokio::test]
async fn test_store_failure_surfaces_and_leaves_state() {
    let h = harness();
    let c = customer();
    h.store.set_fail_on_set(true).await;

    let result = h.ledger.complete_task(&c, "login", json!({})).await;
    assert!(matches!(result, Err(LedgerError::Store(StoreError::Unavailable(_)))));
    assert!(result.unwrap_err().is_retryable());

    h.store.set_fail_on_set(false).await;
    assert_eq!(h.ledger.get_balance(&c).await.unwrap(), 0);
}

#[tokio::test]
async fn test_store_read_failure_is_retryable_and_not_cached() {
    let h = harness();
    let c = customer();
    h.store.set_fail_on_get(true).await;

    let result = h.ledger.get_balance(&c).await;
    assert!(matches!(result, Err(LedgerError::Store(StoreError::Unavailable(_)))));
    assert!(result.unwrap_err().is_retryable());

    h.store.set_fail_on_get(false).await;
    h.ledger.complete_task(&c, "login", json!({})).await.unwrap();
    assert_eq!(h.ledger.get_balance(&c).await.unwrap(), 10);
}

#[tokio::test]
async fn test_unreadable_batch_blocks_write_instead_of_dropping_points() {
    let h = harness();
    let c = customer();
    let stored = r#"[{"points":500,"earnedAt":"2025-03-01T00:00:00Z","expiresAt":"2025-04-30T00:00:00Z","source":"task_complete_order"},{"points":"40","earnedAt":"2025-03-02T00:00:00Z","expiresAt":"2025-05-01T00:00:00Z","source":"task_read_pages"}]"#;
    h.store.put_raw(&c, POINT_BATCHES_FIELD, stored).await;

    // Reads stay tolerant.
    assert_eq!(h.ledger.get_balance(&c).await.unwrap(), 500);
    assert_eq!(h.ledger.progress(&c).await.unwrap().points, 500);

    let result = h.ledger.complete_task(&c, "login", json!({})).await;
    assert!(matches!(result, Err(LedgerError::Store(StoreError::Malformed(_)))));
    assert!(!result.unwrap_err().is_retryable());
    assert!(h.store.writes().await.is_empty());
    assert_eq!(
        h.store.raw(&c, POINT_BATCHES_FIELD).await.as_deref(),
        Some(stored)
    );
}

#[tokio::test]
async fn test_unknown_customer_in_strict_store() {
    let ledger = PointsLedger::new(Arc::new(InMemoryMetafieldStore::strict()));
    let result = ledger.complete_task(&customer(), "login", json!({})).await;
    assert!(matches!(
        result,
        Err(LedgerError::Store(StoreError::CustomerNotFound(_)))
    ));
}

#[tokio::test]
async fn test_progress_days_left() {
    let h = harness();
    let c = customer();
    h.ledger.complete_task(&c, "login", json!({})).await.unwrap();
    h.clock.advance(Duration::days(10) + Duration::hours(1));

    let progress = h.ledger.progress(&c).await.unwrap();
    assert_eq!(progress.points_batches[0].days_left, 50);
    assert_eq!(progress.available_tasks.len(), 6);
}

#[tokio::test]
async fn test_reset_clears_everything() {
    let h = harness();
    let c = customer();
    h.ledger.complete_task(&c, "login", json!({})).await.unwrap();
    assert_eq!(h.ledger.get_balance(&c).await.unwrap(), 10);

    h.ledger.reset(&c).await.unwrap();

    assert_eq!(h.ledger.get_balance(&c).await.unwrap(), 0);
    let progress = h.ledger.progress(&c).await.unwrap();
    assert!(progress.completed_tasks.is_empty());
    assert!(progress.history.is_empty());
}

#[test]
fn test_outcome_response_shape() {
    let outcome = TaskOutcome::AlreadyCompleted {
        task_id: "login".to_string(),
        task_name: "Daily login".to_string(),
    };
    let json = serde_json::to_value(outcome.response()).unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(json["status"], "already_completed");
    assert_eq!(json["taskId"], "login");
    assert!(json["message"].as_str().unwrap().contains("Daily login"));

    let completed = TaskOutcome::Completed {
        task_id: "login".to_string(),
        task_name: "Daily login".to_string(),
        points_earned: 10,
        new_balance: 40,
        expires_at: start(),
    };
    let json = serde_json::to_value(completed.response()).unwrap();
    assert_eq!(json["status"], "completed");
    assert_eq!(json["pointsEarned"], 10);
    assert_eq!(json["newBalance"], 40);
    assert!(json.get("new_balance").is_none());
}

#[test]
fn test_days_until_rounds_up() {
    let now = start();
    assert_eq!(days_until(now, now + Duration::days(2)), 2);
    assert_eq!(days_until(now, now + Duration::days(2) + Duration::seconds(1)), 3);
    assert_eq!(days_until(now, now + Duration::seconds(1)), 1);
}
