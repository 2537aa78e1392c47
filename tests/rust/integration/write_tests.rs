//! Nested creates and updates: write order, key splicing, narrowing.

use joinery::engine::EngineError;
use joinery::query::Operation;
use joinery::query_planner::PlanError;
use joinery::{Error, QueryNode, RunOptions};
use serde_json::json;

use super::fixtures::*;

#[tokio::test]
async fn test_forward_children_are_created_before_parent() {
    let h = harness();
    seed(&h.store).await;

    let users = h
        .engine
        .run_write(
            rows(json!([{"name": "eve"}])),
            QueryNode::write("User")
                .join(
                    "company",
                    QueryNode::write("Company").payload(rows(json!([{"name": "Initech"}]))),
                )
                .join(
                    "profile_type",
                    QueryNode::write("ProfileType").payload(rows(json!([{"name": "guest"}]))),
                ),
            RunOptions::new(),
        )
        .await
        .unwrap();

    let calls = call_sequence(&h.store).await;
    assert_eq!(calls.len(), 3);
    assert!(calls[..2].contains(&step("write", "Company")));
    assert!(calls[..2].contains(&step("write", "ProfileType")));
    assert_eq!(calls[2], step("write", "User"));

    assert_eq!(users.len(), 1);
    let eve = &users[0];
    assert_eq!(eve.get("id"), Some(&json!(5)));
    assert_eq!(eve.get("company_id"), Some(&json!(3)));
    assert_eq!(eve.get("profile_type_id"), Some(&json!(3)));
    assert_eq!(eve.one("company").and_then(|c| c.get("name")), Some(&json!("Initech")));
    assert_eq!(eve.one("profile_type").and_then(|p| p.get("name")), Some(&json!("guest")));

    let stored = h.store.rows("User").await;
    assert_eq!(stored.last().and_then(|u| u.get("company_id")), Some(&json!(3)));
}

#[tokio::test]
async fn test_reverse_children_receive_parent_key() {
    let h = harness();
    seed(&h.store).await;

    let companies = h
        .engine
        .run_write(
            rows(json!([{"name": "Hooli"}])),
            QueryNode::write("Company").join(
                "users",
                QueryNode::write("User").payload(rows(json!([{"name": "gil"}, {"name": "hal"}]))),
            ),
            RunOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        call_sequence(&h.store).await,
        vec![step("write", "Company"), step("write", "User")]
    );
    assert_eq!(h.store.calls().await[1].rows, 2);

    let hooli = &companies[0];
    assert_eq!(hooli.get("id"), Some(&json!(3)));
    let users = hooli.many("users");
    assert_eq!(users.len(), 2);
    assert!(users.iter().all(|u| u.get("company_id") == Some(&json!(3))));
}

#[tokio::test]
async fn test_created_tree_reads_back() {
    let h = harness();

    h.engine
        .run_write(
            rows(json!([{"name": "eve"}])),
            QueryNode::write("User").join(
                "company",
                QueryNode::write("Company").payload(rows(json!([{"name": "Initech"}]))),
            ),
            RunOptions::new(),
        )
        .await
        .unwrap();

    let users = h
        .engine
        .run_read(
            QueryNode::read("User")
                .filter(json!({"name": "eve"}))
                .join("company", QueryNode::read("Company")),
            RunOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(
        users[0].one("company").and_then(|c| c.get("name")),
        Some(&json!("Initech"))
    );
}

#[tokio::test]
async fn test_created_rows_follow_field_selection() {
    let h = harness();

    let users = h
        .engine
        .run_write(
            rows(json!([{"name": "eve", "company_id": 1}])),
            QueryNode::write("User").fields(["name"]),
            RunOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(users[0].to_json(), json!({"name": "eve"}));
}

#[tokio::test]
async fn test_filtered_read_child_links_created_parent() {
    let h = harness();
    seed(&h.store).await;

    let users = h
        .engine
        .run_write(
            rows(json!([{"name": "fay"}])),
            QueryNode::write("User")
                .join("company", QueryNode::read("Company").filter(json!({"name": "Globex"}))),
            RunOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        call_sequence(&h.store).await,
        vec![step("read", "Company"), step("write", "User")]
    );
    assert_eq!(users[0].get("company_id"), Some(&json!(2)));
}

#[tokio::test]
async fn test_update_cascades_to_unfiltered_children() {
    let h = harness();
    seed(&h.store).await;

    let companies = h
        .engine
        .run_write(
            rows(json!([{"name": "Acme Corp"}])),
            QueryNode::write("Company").filter(json!({"id": 1})).join(
                "users",
                QueryNode::write("User").payload(rows(json!([{"profile_type_id": 1}]))),
            ),
            RunOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        call_sequence(&h.store).await,
        vec![step("write", "Company"), step("write", "User")]
    );
    let calls = h.store.calls().await;
    assert_eq!(calls[0].filter, Some(json!({"id": 1})));
    assert_eq!(calls[1].filter, Some(json!({"company_id": {"in": [1]}})));

    assert_eq!(companies[0].get("name"), Some(&json!("Acme Corp")));
    assert_eq!(companies[0].many("users").len(), 2);

    let profile_types: Vec<_> = h
        .store
        .rows("User")
        .await
        .into_iter()
        .map(|u| u["profile_type_id"].clone())
        .collect();
    assert_eq!(profile_types, vec![json!(1), json!(1), json!(2), json!(null)]);
}

#[tokio::test]
async fn test_filtered_child_narrows_update() {
    let h = harness();
    seed(&h.store).await;

    let users = h
        .engine
        .run_write(
            rows(json!([{"name": "renamed"}])),
            QueryNode::write("User")
                .filter(json!({"profile_type_id": 2}))
                .join("company", QueryNode::read("Company").filter(json!({"name": "Globex"}))),
            RunOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        call_sequence(&h.store).await,
        vec![step("read", "Company"), step("write", "User")]
    );
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].get("id"), Some(&json!(3)));
    let names: Vec<_> = h
        .store
        .rows("User")
        .await
        .into_iter()
        .map(|u| u["name"].clone())
        .collect();
    assert_eq!(names, vec![json!("ada"), json!("bob"), json!("renamed"), json!("dee")]);
}

#[tokio::test]
async fn test_key_count_mismatch_fails_the_write() {
    let h = harness();

    let err = h
        .engine
        .run_write(
            rows(json!([{"name": "a"}, {"name": "b"}, {"name": "c"}])),
            QueryNode::write("User").join(
                "company",
                QueryNode::write("Company").payload(rows(json!([{"name": "x"}, {"name": "y"}]))),
            ),
            RunOptions::new(),
        )
        .await
        .unwrap_err();

    assert!(
        matches!(
            err,
            Error::Engine(EngineError::SpliceMismatch { keys: 2, rows: 3, .. })
        ),
        "{:?}",
        err
    );
    assert!(h.store.rows("User").await.is_empty());
    // Without a ledger the created companies stay.
    assert_eq!(h.store.rows("Company").await.len(), 2);
}

#[tokio::test]
async fn test_entry_point_checks_root_operation() {
    let h = harness();

    let err = h
        .engine
        .run_write(vec![], QueryNode::read("User"), RunOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::WrongOperation {
            expected: Operation::Write,
            found: Operation::Read,
            ..
        }
    ));

    let err = h
        .engine
        .run_read(QueryNode::delete("User").force(), RunOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::WrongOperation { expected: Operation::Read, .. }));
    assert!(h.store.calls().await.is_empty());
}

#[tokio::test]
async fn test_write_plan_errors() {
    let h = harness();
    seed(&h.store).await;

    let err = h
        .engine
        .run_write(
            rows(json!([{"name": "Initech"}])),
            QueryNode::write("Company")
                .join("users", QueryNode::read("User").filter(json!({"name": "ada"}))),
            RunOptions::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Plan(PlanError::FilteredReverseChildOnCreate { .. })
    ));

    let err = h
        .engine
        .run_write(
            rows(json!([{"name": "a"}, {"name": "b"}])),
            QueryNode::write("User").filter(json!({"id": 1})),
            RunOptions::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Plan(PlanError::MultipleUpdatePayloads { rows: 2, .. })
    ));

    let err = h
        .engine
        .run_write(
            rows(json!([{"nickname": "a"}])),
            QueryNode::write("User"),
            RunOptions::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Plan(PlanError::UnknownField { usage: "payload", .. })
    ));
    assert!(h.store.calls().await.is_empty());
}

#[tokio::test]
async fn test_nested_create_pins_call_order_and_keys() {
    let h = harness();
    seed(&h.store).await;

    let companies = h
        .engine
        .run_write(
            rows(json!([{"name": "Hooli"}])),
            QueryNode::write("Company").join(
                "users",
                QueryNode::write("User")
                    .payload(rows(json!([{"name": "gil"}, {"name": "hal"}])))
                    .join(
                        "profile_type",
                        QueryNode::write("ProfileType").payload(rows(json!([{"name": "guest"}]))),
                    ),
            ),
            RunOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        call_sequence(&h.store).await,
        vec![
            step("write", "Company"),
            step("write", "ProfileType"),
            step("write", "User"),
        ]
    );

    let users = h.store.rows("User").await;
    let created: Vec<_> = users.iter().filter(|u| u["id"].as_i64() > Some(4)).collect();
    assert_eq!(created.len(), 2);
    for user in created {
        assert_eq!(user["company_id"], json!(3));
        assert_eq!(user["profile_type_id"], json!(3));
    }

    let hooli = &companies[0];
    assert_eq!(hooli.get("id"), Some(&json!(3)));
    for user in hooli.many("users") {
        assert_eq!(
            user.one("profile_type").and_then(|p| p.get("name")),
            Some(&json!("guest"))
        );
    }
}

#[tokio::test]
async fn test_filtered_child_update_stays_inside_parent() {
    let h = harness();
    seed(&h.store).await;

    // cy works for company 2; a company 1 tree must not reach them.
    let companies = h
        .engine
        .run_write(
            Vec::new(),
            QueryNode::write("Company").filter(json!({"id": 1})).join(
                "users",
                QueryNode::write("User")
                    .filter(json!({"name": "cy"}))
                    .payload(rows(json!({"name": "renamed"}))),
            ),
            RunOptions::new(),
        )
        .await
        .unwrap();

    assert!(companies.is_empty());
    assert_eq!(
        call_sequence(&h.store).await,
        vec![step("read", "User"), step("read", "Company")]
    );
    assert_eq!(h.store.rows("User").await[2]["name"], json!("cy"));
}

#[tokio::test]
async fn test_filtered_child_update_is_bounded_by_parent_keys() {
    let h = harness();
    seed(&h.store).await;

    let companies = h
        .engine
        .run_write(
            Vec::new(),
            QueryNode::write("Company").filter(json!({"id": 2})).join(
                "users",
                QueryNode::write("User")
                    .filter(json!({"name": "cy"}))
                    .payload(rows(json!({"name": "renamed"}))),
            ),
            RunOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        call_sequence(&h.store).await,
        vec![step("read", "User"), step("read", "Company"), step("write", "User")]
    );
    assert_eq!(
        h.store.calls().await[2].filter,
        Some(json!({"company_id": {"in": [2]}, "name": "cy"}))
    );
    assert_eq!(companies[0].many("users").len(), 1);
    let names: Vec<_> = h
        .store
        .rows("User")
        .await
        .into_iter()
        .map(|u| u["name"].clone())
        .collect();
    assert_eq!(names, vec![json!("ada"), json!("bob"), json!("renamed"), json!("dee")]);
}
