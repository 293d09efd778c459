//! Storage-level checks of the crediting invariants, run against a real
//! temporary SQLite database.

use chorecredit_server::reward::{
    self, AllocationStrategy, GrantRequest, approval, coded::CodedStrategy, ledger, pool, registry,
};
use chorecredit_server::storage::models::{NewChild, NewLedgerEntry, NewSubmission, NewTask};
use chorecredit_server::storage::{StorageError, Store};
use chorecredit_shared::domain::Device;
use chrono::{Duration, Utc};
use diesel::prelude::*;

async fn test_store() -> (Store, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    let store = Store::connect_sqlite(db_path.to_str().unwrap())
        .await
        .expect("db");
    store
        .transaction(|conn| {
            use chorecredit_server::storage::schema::{children, tasks};
            diesel::insert_into(children::table)
                .values(&NewChild {
                    id: "alice",
                    display_name: "Alice",
                })
                .execute(conn)?;
            diesel::insert_into(tasks::table)
                .values(&NewTask {
                    id: "homework",
                    name: "Homework",
                    reward_minutes: 20,
                    active: true,
                    auto_approve: false,
                })
                .execute(conn)?;
            reward::achievements::seed(conn)?;
            Ok(())
        })
        .await
        .expect("seed");
    (store, dir)
}

fn grant_req<'a>(family_id: Option<i32>, child_id: &'a str, device: Device) -> GrantRequest<'a> {
    GrantRequest {
        family_id,
        child_id,
        minutes: 20,
        device,
        submission_id: None,
        explicit_code: None,
        reason: None,
    }
}

#[tokio::test]
async fn units_are_claimed_oldest_first_then_pool_degrades() {
    let (store, _dir) = test_store().await;
    store
        .transaction(|conn| {
            pool::import(
                conn,
                Some(1),
                "OLD-1;20;2026-01-01;phone\nMID-2;20;2026-01-02;phone\nNEW-3;20;2026-01-03;phone\n",
            )?;
            Ok(())
        })
        .await
        .unwrap();

    let codes = store
        .transaction(|conn| {
            let mut codes = Vec::new();
            for _ in 0..4 {
                let entry = CodedStrategy.grant(conn, &grant_req(Some(1), "alice", Device::Phone))?;
                codes.push(entry.resource_code);
            }
            Ok(codes)
        })
        .await
        .unwrap();

    assert_eq!(
        codes,
        vec![
            Some("OLD-1".to_string()),
            Some("MID-2".to_string()),
            Some("NEW-3".to_string()),
            // Exhausted pool degrades to a codeless grant.
            None,
        ]
    );
}

#[tokio::test]
async fn family_pool_falls_back_to_shared_units() {
    let (store, _dir) = test_store().await;
    store
        .transaction(|conn| {
            // A shared (family-less) unit older than the family's own.
            pool::import(conn, None, "SHARED-1;20;2026-01-01;pc\n")?;
            pool::import(conn, Some(1), "FAM-1;20;2026-01-02;pc\n")?;
            Ok(())
        })
        .await
        .unwrap();

    let (first, second) = store
        .transaction(|conn| {
            let a = CodedStrategy.grant(conn, &grant_req(Some(1), "alice", Device::Pc))?;
            let b = CodedStrategy.grant(conn, &grant_req(Some(2), "alice", Device::Pc))?;
            Ok((a.resource_code, b.resource_code))
        })
        .await
        .unwrap();

    assert_eq!(first.as_deref(), Some("SHARED-1"));
    // Family 2 cannot see family 1's unit; only the shared pool, now empty.
    assert_eq!(second, None);
}

#[tokio::test]
async fn explicit_code_bypasses_the_pool() {
    let (store, _dir) = test_store().await;
    store
        .transaction(|conn| {
            pool::import(conn, Some(1), "POOL-1;20;2026-01-01;phone\n")?;
            Ok(())
        })
        .await
        .unwrap();

    let entry = store
        .transaction(|conn| {
            let mut req = grant_req(Some(1), "alice", Device::Phone);
            req.explicit_code = Some("HANDED-OVER");
            CodedStrategy.grant(conn, &req)
        })
        .await
        .unwrap();
    assert_eq!(entry.resource_code.as_deref(), Some("HANDED-OVER"));

    // The pool unit stays available.
    let stats = store
        .run(|conn| pool::stats(conn, Some(1)))
        .await
        .unwrap();
    assert_eq!(stats.available, 1);
    assert_eq!(stats.used, 0);
}

#[tokio::test]
async fn duplicate_resource_codes_are_a_conflict() {
    let (store, _dir) = test_store().await;

    let append_with_code = |conn: &mut SqliteConnection| {
        ledger::append(
            conn,
            NewLedgerEntry {
                child_id: "alice",
                family_id: None,
                submission_id: None,
                minutes: 20,
                target_device: Device::Phone.as_str(),
                resource_code: Some("DUP-1"),
                strategy: "coded",
                expires_at: None,
                reason: None,
                paid_out: false,
                created_at: Utc::now().naive_utc(),
            },
        )
    };

    store.transaction(append_with_code).await.unwrap();
    let err = store.transaction(append_with_code).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict(_)), "{err}");
}

#[tokio::test]
async fn approved_submissions_cannot_be_credited_twice() {
    let (store, _dir) = test_store().await;
    let registry = std::sync::Arc::new(registry::StrategyRegistry::builtin());
    let tz = chrono_tz::UTC;

    let reg = registry.clone();
    let sub_id = store
        .transaction(move |conn| {
            let outcome = approval::create(
                conn,
                &reg,
                tz,
                &approval::SubmissionInput {
                    task_id: "homework",
                    child_id: "alice",
                    family_id: None,
                    device: Device::Pc,
                    comment: None,
                    photo_path: None,
                },
            )?;
            Ok(outcome.submission.id)
        })
        .await
        .unwrap();

    let reg = registry.clone();
    store
        .transaction(move |conn| approval::approve(conn, &reg, tz, sub_id, None, None, None))
        .await
        .unwrap();

    let reg = registry.clone();
    let err = store
        .transaction(move |conn| approval::approve(conn, &reg, tz, sub_id, None, None, None))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidState(_)), "{err}");

    // Exactly one ledger entry exists for the submission.
    let entries = store
        .run(|conn| ledger::list_for_child(conn, "alice"))
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].submission_id, Some(sub_id));
}

#[tokio::test]
async fn achievement_unlocks_are_idempotent() {
    let (store, _dir) = test_store().await;
    let tz = chrono_tz::UTC;

    // Enough approved history to clear the tasks_5 threshold.
    store
        .transaction(move |conn| {
            use chorecredit_server::storage::schema::submissions::dsl as s;
            let now = Utc::now().naive_utc();
            for i in 0..5 {
                diesel::insert_into(s::submissions)
                    .values(&NewSubmission {
                        task_id: "homework",
                        child_id: "alice",
                        family_id: None,
                        status: "approved",
                        selected_device: "pc",
                        comment: None,
                        photo_path: None,
                        created_at: now - Duration::minutes(i),
                        updated_at: now,
                    })
                    .execute(conn)?;
            }
            Ok(())
        })
        .await
        .unwrap();

    let first = store
        .transaction(move |conn| reward::achievements::evaluate_for_child(conn, "alice", tz))
        .await
        .unwrap();
    assert!(first.iter().any(|a| a.code == "tasks_5"), "{first:?}");

    // Re-evaluating the same state unlocks nothing new.
    let second = store
        .transaction(move |conn| reward::achievements::evaluate_for_child(conn, "alice", tz))
        .await
        .unwrap();
    assert!(second.is_empty(), "{second:?}");

    // Unnotified unlocks drain exactly once.
    let drained = store
        .transaction(|conn| reward::achievements::take_unnotified(conn, "alice"))
        .await
        .unwrap();
    assert!(drained.iter().any(|a| a.code == "tasks_5"));
    let drained_again = store
        .transaction(|conn| reward::achievements::take_unnotified(conn, "alice"))
        .await
        .unwrap();
    assert!(drained_again.is_empty());
}

#[tokio::test]
async fn streak_counts_consecutive_days_with_same_day_grace() {
    let (store, _dir) = test_store().await;
    let tz = chrono_tz::UTC;

    // Approved activity yesterday and the day before, nothing today.
    store
        .transaction(move |conn| {
            use chorecredit_server::storage::schema::submissions::dsl as s;
            let now = Utc::now().naive_utc();
            for days_ago in [1, 2] {
                diesel::insert_into(s::submissions)
                    .values(&NewSubmission {
                        task_id: "homework",
                        child_id: "alice",
                        family_id: None,
                        status: "approved",
                        selected_device: "pc",
                        comment: None,
                        photo_path: None,
                        created_at: now - Duration::days(days_ago),
                        updated_at: now,
                    })
                    .execute(conn)?;
            }
            Ok(())
        })
        .await
        .unwrap();

    // Today without activity does not break the streak yet.
    let streak = store
        .run(move |conn| reward::streak::current_streak(conn, "alice", tz))
        .await
        .unwrap();
    assert_eq!(streak, 2);
}

#[tokio::test]
async fn mark_paid_is_idempotent_and_missing_rows_are_not_found() {
    let (store, _dir) = test_store().await;

    let entry = store
        .transaction(|conn| {
            ledger::manual_payout(conn, None, "alice", 10, Device::Tablet, None, None)
        })
        .await
        .unwrap();
    assert!(entry.paid_out);
    assert_eq!(entry.reason.as_deref(), Some("manual payout"));

    let id = entry.id;
    let again = store
        .transaction(move |conn| ledger::mark_paid(conn, id))
        .await
        .unwrap();
    assert!(again.paid_out);

    let err = store
        .transaction(|conn| ledger::mark_paid(conn, 424242))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)), "{err}");
}
