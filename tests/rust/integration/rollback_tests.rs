//! Mutation ledger rollback after a failed write or delete.

use joinery::adapter::{AdapterError, AdapterOperation};
use joinery::ledger::RollbackError;
use joinery::{Error, QueryNode, RunOptions};
use serde_json::json;

use super::fixtures::*;

fn company_with_user() -> QueryNode {
    QueryNode::write("Company").join(
        "users",
        QueryNode::write("User").payload(rows(json!([{"name": "gil"}]))),
    )
}

#[tokio::test]
async fn test_failed_write_is_reverted() {
    let h = harness();
    seed(&h.store).await;
    h.store.fail_on(AdapterOperation::Write, "User").await;

    let err = h
        .engine
        .run_write(
            rows(json!([{"name": "Hooli"}])),
            company_with_user(),
            RunOptions::new().rollback(true),
        )
        .await
        .unwrap_err();

    assert!(err.is_reverted(), "{:?}", err);
    assert!(matches!(
        err.root_cause(),
        Error::Adapter(AdapterError::Failed { operation: AdapterOperation::Write, .. })
    ));
    assert_eq!(h.store.rows("Company").await.len(), 2);

    let calls = h.store.calls().await;
    let undo = calls.last().unwrap();
    assert_eq!(undo.operation, AdapterOperation::Delete);
    assert_eq!(undo.model, "Company");
    assert_eq!(undo.filter, Some(json!({"id": 3})));
    assert!(undo.transaction.is_some());
    assert_eq!(h.store.transaction_counts().await, (1, 0));
}

#[tokio::test]
async fn test_failed_write_without_ledger_keeps_effects() {
    let h = harness();
    seed(&h.store).await;
    h.store.fail_on(AdapterOperation::Write, "User").await;

    let err = h
        .engine
        .run_write(
            rows(json!([{"name": "Hooli"}])),
            company_with_user(),
            RunOptions::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Adapter(AdapterError::Failed { .. })));
    assert_eq!(h.store.rows("Company").await.len(), 3);
}

#[tokio::test]
async fn test_updates_are_restored_from_snapshots() {
    let h = harness();
    seed(&h.store).await;
    h.store.fail_on(AdapterOperation::Write, "Note").await;

    let err = h
        .engine
        .run_write(
            rows(json!([{"name": "Acme Corp"}])),
            QueryNode::write("Company").filter(json!({"id": 1})).join(
                "users",
                QueryNode::write("User")
                    .payload(rows(json!([{"profile_type_id": 1}])))
                    .join(
                        "notes",
                        QueryNode::write("Note").payload(rows(json!([{"body": "hi"}]))),
                    ),
            ),
            RunOptions::new().rollback(true),
        )
        .await
        .unwrap_err();
    assert!(err.is_reverted(), "{:?}", err);

    let companies = h.store.rows("Company").await;
    assert_eq!(companies[0]["name"], json!("Acme"));
    let profile_types: Vec<_> = h
        .store
        .rows("User")
        .await
        .into_iter()
        .map(|u| (u["id"].clone(), u["profile_type_id"].clone()))
        .collect();
    assert_eq!(
        profile_types,
        vec![
            (json!(1), json!(1)),
            (json!(2), json!(2)),
            (json!(3), json!(2)),
            (json!(4), json!(null)),
        ]
    );
}

#[tokio::test]
async fn test_removed_rows_are_reinserted() {
    let h = harness();
    seed(&h.store).await;
    h.store.fail_on(AdapterOperation::Delete, "Company").await;

    let err = h
        .engine
        .run_delete(
            QueryNode::delete("Company")
                .filter(json!({"id": 1}))
                .join("users", QueryNode::delete("User")),
            RunOptions::new().rollback(true),
        )
        .await
        .unwrap_err();
    assert!(err.is_reverted(), "{:?}", err);

    let mut names: Vec<String> = h
        .store
        .rows("User")
        .await
        .into_iter()
        .filter_map(|u| u["name"].as_str().map(str::to_string))
        .collect();
    names.sort();
    assert_eq!(names, vec!["ada", "bob", "cy", "dee"]);
    assert_eq!(h.store.rows("Company").await.len(), 2);
}

#[tokio::test]
async fn test_failed_rollback_reports_pending_entries() {
    let h = harness();
    seed(&h.store).await;
    h.store.fail_on(AdapterOperation::Write, "User").await;
    h.store.fail_on(AdapterOperation::Delete, "Company").await;

    let err = h
        .engine
        .run_write(
            rows(json!([{"name": "Hooli"}])),
            company_with_user(),
            RunOptions::new().rollback(true),
        )
        .await
        .unwrap_err();

    match &err {
        Error::RollbackFailed {
            rollback: RollbackError::Adapter { model, .. },
            pending,
            ..
        } => {
            assert_eq!(model, "Company");
            assert_eq!(*pending, 1);
        }
        other => panic!("expected a rollback failure, got {:?}", other),
    }
    assert!(err.is_rollback_failure());
    assert!(matches!(err.root_cause(), Error::Adapter(_)));
    assert_eq!(h.store.rows("Company").await.len(), 3);
    assert_eq!(h.store.transaction_counts().await, (0, 1));
}

#[tokio::test]
async fn test_rollback_runs_one_span_per_connection() {
    let h = split_harness();
    h.main.fail_on(AdapterOperation::Write, "Note").await;

    let err = h
        .engine
        .run_write(
            rows(json!([{"name": "Hooli"}])),
            QueryNode::write("Company").join(
                "users",
                QueryNode::write("User")
                    .payload(rows(json!([{"name": "gil"}])))
                    .join(
                        "notes",
                        QueryNode::write("Note").payload(rows(json!([{"body": "hi"}]))),
                    ),
            ),
            RunOptions::new().rollback(true),
        )
        .await
        .unwrap_err();
    assert!(err.is_reverted(), "{:?}", err);

    assert!(h.main.rows("Company").await.is_empty());
    assert!(h.users.rows("User").await.is_empty());
    assert_eq!(h.main.transaction_counts().await, (1, 0));
    assert_eq!(h.users.transaction_counts().await, (1, 0));

    let user_undo = h.users.calls().await.pop().unwrap();
    assert_eq!(user_undo.operation, AdapterOperation::Delete);
    let company_undo = h.main.calls().await.pop().unwrap();
    assert_eq!(company_undo.operation, AdapterOperation::Delete);
    assert_eq!(company_undo.model, "Company");
}

#[tokio::test]
async fn test_reads_never_keep_a_ledger() {
    let h = harness();
    seed(&h.store).await;

    h.engine
        .run_read(QueryNode::read("User"), RunOptions::new().rollback(true))
        .await
        .unwrap();
    assert_eq!(call_sequence(&h.store).await, vec![step("read", "User")]);
}
