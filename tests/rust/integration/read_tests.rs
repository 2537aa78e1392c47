//! Reads: traversal order, merge consistency, memoization and degradation.

use std::sync::Arc;

use joinery::adapter::AdapterError;
use joinery::query::SortDirection;
use joinery::query_planner::PlanError;
use joinery::relation_catalog::CatalogConfig;
use joinery::{AdapterRegistry, Engine, EngineConfig, Error, MemoryAdapter, QueryNode, RunOptions};
use serde_json::json;

use super::fixtures::*;

#[tokio::test]
async fn test_unfiltered_read_resolves_parent_first() {
    let h = harness();
    seed(&h.store).await;

    let companies = h
        .engine
        .run_read(
            QueryNode::read("Company").join("users", QueryNode::read("User")),
            RunOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        call_sequence(&h.store).await,
        vec![step("read", "Company"), step("read", "User")]
    );
    let calls = h.store.calls().await;
    assert_eq!(calls[0].filter, None);
    assert_eq!(calls[1].filter, Some(json!({"company_id": {"in": [1, 2]}})));

    assert_eq!(companies.len(), 2);
    for company in &companies {
        let users = company.many("users");
        assert_eq!(users.len(), 2);
        for user in users {
            assert_eq!(user.get("company_id"), company.get("id"));
        }
    }
}

#[tokio::test]
async fn test_filtered_child_narrows_parent() {
    let h = harness();
    seed(&h.store).await;

    let companies = h
        .engine
        .run_read(
            QueryNode::read("Company")
                .join("users", QueryNode::read("User").filter(json!({"name": "cy"}))),
            RunOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        call_sequence(&h.store).await,
        vec![step("read", "User"), step("read", "Company")]
    );
    assert_eq!(h.store.calls().await[1].filter, Some(json!({"id": {"in": [2]}})));
    assert_eq!(companies.len(), 1);
    assert_eq!(companies[0].get("name"), Some(&json!("Globex")));
    let users = companies[0].many("users");
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].get("name"), Some(&json!("cy")));
}

#[tokio::test]
async fn test_filtered_child_without_matches_skips_parent() {
    let h = harness();
    seed(&h.store).await;

    let companies = h
        .engine
        .run_read(
            QueryNode::read("Company")
                .join("users", QueryNode::read("User").filter(json!({"name": "nobody"}))),
            RunOptions::new(),
        )
        .await
        .unwrap();

    assert!(companies.is_empty());
    assert_eq!(call_sequence(&h.store).await, vec![step("read", "User")]);
}

#[tokio::test]
async fn test_forward_relation_merges_single_record() {
    let h = harness();
    seed(&h.store).await;

    let users = h
        .engine
        .run_read(
            QueryNode::read("User")
                .filter(json!({"id": {"in": [1, 4]}}))
                .join("company", QueryNode::read("Company"))
                .join("profile_type", QueryNode::read("ProfileType")),
            RunOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(users.len(), 2);
    let ada = &users[0];
    assert_eq!(ada.one("company").and_then(|c| c.get("name")), Some(&json!("Acme")));
    assert_eq!(ada.one("profile_type").and_then(|p| p.get("name")), Some(&json!("admin")));

    let dee = &users[1];
    assert_eq!(dee.one("company").and_then(|c| c.get("name")), Some(&json!("Globex")));
    assert!(dee.one("profile_type").is_none());
    assert_eq!(
        dee.to_json()["profile_type"],
        serde_json::Value::Null,
        "a missing single relation serializes as null"
    );
}

#[tokio::test]
async fn test_shared_node_is_read_once() {
    let h = harness();
    seed(&h.store).await;

    let company = Arc::new(QueryNode::read("Company"));
    let orders = h
        .engine
        .run_read(
            QueryNode::read("Order")
                .join_shared("billing_company", company.clone())
                .join_shared("shipping_company", company),
            RunOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        call_sequence(&h.store).await,
        vec![step("read", "Order"), step("read", "Company")]
    );
    assert_eq!(
        orders[1].one("shipping_company").and_then(|c| c.get("name")),
        Some(&json!("Globex"))
    );
    assert_eq!(
        orders[0].one("billing_company").and_then(|c| c.get("name")),
        Some(&json!("Acme"))
    );
}

#[tokio::test]
async fn test_distinct_nodes_are_read_separately() {
    let h = harness();
    seed(&h.store).await;

    h.engine
        .run_read(
            QueryNode::read("Order")
                .join("billing_company", QueryNode::read("Company"))
                .join("shipping_company", QueryNode::read("Company")),
            RunOptions::new(),
        )
        .await
        .unwrap();

    let company_reads = call_sequence(&h.store)
        .await
        .into_iter()
        .filter(|(_, model)| model == "Company")
        .count();
    assert_eq!(company_reads, 2);
}

#[tokio::test]
async fn test_invalid_filter_degrades_to_empty_result() {
    let h = harness();
    seed(&h.store).await;

    let root = h
        .engine
        .run_read(
            QueryNode::read("User").filter(json!({"id": {"in": []}})),
            RunOptions::new(),
        )
        .await
        .unwrap();
    assert!(root.is_empty());

    let nested = h
        .engine
        .run_read(
            QueryNode::read("Company")
                .join("users", QueryNode::read("User").filter(json!({"name": {"between": [1]}}))),
            RunOptions::new(),
        )
        .await
        .unwrap();
    assert!(nested.is_empty());
    assert!(h.store.calls().await.is_empty());
}

#[tokio::test]
async fn test_transient_join_fields_are_stripped() {
    let h = harness();
    seed(&h.store).await;
    let tree = QueryNode::read("User")
        .fields(["name"])
        .filter(json!({"id": 1}))
        .join("company", QueryNode::read("Company").fields(["name"]));

    let users = h.engine.run_read(tree.clone(), RunOptions::new()).await.unwrap();
    assert_eq!(users[0].to_json(), json!({"name": "ada", "company": {"name": "Acme"}}));

    let h = harness_with(EngineConfig {
        strip_transient_fields: false,
        ..Default::default()
    });
    seed(&h.store).await;
    let users = h.engine.run_read(tree, RunOptions::new()).await.unwrap();
    assert_eq!(users[0].get("company_id"), Some(&json!(1)));
    assert_eq!(users[0].one("company").and_then(|c| c.get("id")), Some(&json!(1)));
}

#[tokio::test]
async fn test_ordering_and_window() {
    let h = harness();
    seed(&h.store).await;

    let users = h
        .engine
        .run_read(
            QueryNode::read("User")
                .order_by("name", SortDirection::Desc)
                .offset(1)
                .limit(2),
            RunOptions::new(),
        )
        .await
        .unwrap();
    let names: Vec<_> = users.iter().filter_map(|u| u.get("name")).collect();
    assert_eq!(names, vec![&json!("cy"), &json!("bob")]);
}

#[tokio::test]
async fn test_planning_errors_precede_adapter_calls() {
    let h = harness_with(EngineConfig {
        max_join_depth: 1,
        ..Default::default()
    });
    seed(&h.store).await;

    let err = h
        .engine
        .run_read(
            QueryNode::read("User").join(
                "company",
                QueryNode::read("Company").join("users", QueryNode::read("User")),
            ),
            RunOptions::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Plan(PlanError::DepthExceeded { max: 1 })));

    let err = h
        .engine
        .run_read(
            QueryNode::read("Company").join("employees", QueryNode::read("User")),
            RunOptions::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Plan(PlanError::Catalog(_))));
    assert!(h.store.calls().await.is_empty());
}

#[tokio::test]
async fn test_unregistered_connection_is_an_adapter_error() {
    init_logging();
    let catalog = CatalogConfig::from_yaml_str(&catalog_yaml("users_db"))
        .unwrap()
        .to_catalog()
        .unwrap();
    let adapters = AdapterRegistry::new().with("default", Arc::new(MemoryAdapter::new()));
    let engine = Engine::new(catalog, adapters);

    let err = engine
        .run_read(QueryNode::read("User"), RunOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Adapter(AdapterError::UnknownConnection(ref c)) if c == "users_db"));
}

#[tokio::test]
async fn test_plan_explains_edges() {
    let h = harness();
    let plan = h
        .engine
        .plan(
            QueryNode::read("Company")
                .join("users", QueryNode::read("User").filter(json!({"name": "ada"}))),
        )
        .unwrap();
    let text = plan.to_string();
    assert!(text.contains("users <reverse, before> read User [*] filtered"), "{}", text);
}
