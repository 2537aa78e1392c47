//! Adapter transactions: owned, aborted, and inherited from the caller.

use joinery::adapter::{AdapterError, AdapterOperation};
use joinery::{Adapter, Error, QueryNode, RunOptions, TransactionHandle};
use serde_json::json;

use super::fixtures::*;

fn company_with_user() -> QueryNode {
    QueryNode::write("Company").join(
        "users",
        QueryNode::write("User").payload(rows(json!([{"name": "gil"}]))),
    )
}

#[tokio::test]
async fn test_successful_write_commits_its_transaction() {
    let h = harness();
    seed(&h.store).await;

    h.engine
        .run_write(
            rows(json!([{"name": "Hooli"}])),
            company_with_user(),
            RunOptions::new().transactional(true),
        )
        .await
        .unwrap();

    let calls = h.store.calls().await;
    assert_eq!(calls.len(), 2);
    assert!(calls[0].transaction.is_some());
    assert_eq!(calls[0].transaction, calls[1].transaction);
    assert_eq!(h.store.transaction_counts().await, (1, 0));
    assert_eq!(h.store.rows("Company").await.len(), 3);
}

#[tokio::test]
async fn test_aborted_transaction_counts_as_reverted() {
    let h = harness();
    seed(&h.store).await;
    h.store.fail_on(AdapterOperation::Write, "User").await;

    let err = h
        .engine
        .run_write(
            rows(json!([{"name": "Hooli"}])),
            company_with_user(),
            RunOptions::new().transactional(true),
        )
        .await
        .unwrap_err();

    assert!(err.is_reverted(), "{:?}", err);
    assert_eq!(h.store.transaction_counts().await, (0, 1));
    assert_eq!(h.store.rows("Company").await.len(), 2);
}

#[tokio::test]
async fn test_aborted_connections_are_not_undone_twice() {
    let h = harness();
    seed(&h.store).await;
    h.store.fail_on(AdapterOperation::Write, "User").await;

    let err = h
        .engine
        .run_write(
            rows(json!([{"name": "Hooli"}])),
            company_with_user(),
            RunOptions::new().transactional(true).rollback(true),
        )
        .await
        .unwrap_err();

    assert!(err.is_reverted(), "{:?}", err);
    assert_eq!(
        call_sequence(&h.store).await,
        vec![step("write", "Company"), step("write", "User")]
    );
    assert_eq!(h.store.transaction_counts().await, (0, 1));
    assert_eq!(h.store.rows("Company").await.len(), 2);
}

#[tokio::test]
async fn test_inherited_transaction_is_used_and_left_open() {
    let h = harness();
    seed(&h.store).await;
    let id = h.store.begin_transaction().await.unwrap();

    h.engine
        .run_write(
            rows(json!([{"name": "Hooli"}])),
            company_with_user(),
            RunOptions::new().transactional(true).inherit(TransactionHandle {
                connection: "default".to_string(),
                id,
            }),
        )
        .await
        .unwrap();

    let calls = h.store.calls().await;
    assert!(calls.iter().all(|c| c.transaction == Some(id)));
    assert_eq!(h.store.transaction_counts().await, (0, 0));

    h.store.abort_transaction(id).await.unwrap();
    assert_eq!(h.store.rows("Company").await.len(), 2);
}

#[tokio::test]
async fn test_rollback_reuses_inherited_transaction() {
    let h = harness();
    seed(&h.store).await;
    h.store.fail_on(AdapterOperation::Write, "User").await;
    let id = h.store.begin_transaction().await.unwrap();

    let err = h
        .engine
        .run_write(
            rows(json!([{"name": "Hooli"}])),
            company_with_user(),
            RunOptions::new().rollback(true).inherit(TransactionHandle {
                connection: "default".to_string(),
                id,
            }),
        )
        .await
        .unwrap_err();
    assert!(err.is_reverted(), "{:?}", err);

    let undo = h.store.calls().await.pop().unwrap();
    assert_eq!(undo.operation, AdapterOperation::Delete);
    assert_eq!(undo.transaction, Some(id));
    assert_eq!(h.store.transaction_counts().await, (0, 0));

    h.store.commit_transaction(id).await.unwrap();
    assert_eq!(h.store.rows("Company").await.len(), 2);
}

#[tokio::test]
async fn test_inherited_transaction_without_ledger_is_left_to_caller() {
    let h = harness();
    seed(&h.store).await;
    h.store.fail_on(AdapterOperation::Write, "User").await;
    let id = h.store.begin_transaction().await.unwrap();

    let err = h
        .engine
        .run_write(
            rows(json!([{"name": "Hooli"}])),
            company_with_user(),
            RunOptions::new().inherit(TransactionHandle {
                connection: "default".to_string(),
                id,
            }),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Adapter(AdapterError::Failed { .. })));
    assert_eq!(h.store.rows("Company").await.len(), 3);
    h.store.abort_transaction(id).await.unwrap();
    assert_eq!(h.store.rows("Company").await.len(), 2);
}

#[tokio::test]
async fn test_inherited_transaction_on_unknown_connection() {
    let h = harness();

    let err = h
        .engine
        .run_read(
            QueryNode::read("User"),
            RunOptions::new().inherit(TransactionHandle {
                connection: "archive".to_string(),
                id: joinery::TransactionId(7),
            }),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Adapter(AdapterError::UnknownConnection(_))));
}
