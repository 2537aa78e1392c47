//! Joinery - relational query orchestration over storage adapters
//!
//! Given a root entity and a tree of requested relations, this crate reads,
//! writes or deletes records through per-connection adapters that only know
//! flat operations, and stitches the partial results back into one nested
//! result tree:
//! - Relation catalog built in a closed registration phase (or from YAML)
//! - Copy-on-write query nodes
//! - Per-edge traversal planning (parent-first or child-first)
//! - Concurrent execution with memoized reads and structured cancellation
//! - Mutation ledger with rollback across adapters

pub mod adapter;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod filter;
pub mod ledger;
pub mod query;
pub mod query_planner;
pub mod relation_catalog;

pub use adapter::{Adapter, AdapterRegistry, MemoryAdapter, TransactionHandle, TransactionId};
pub use config::EngineConfig;
pub use engine::{Engine, RunOptions};
pub use errors::{Error, Result};
pub use events::{MutationEvent, MutationKind};
pub use filter::Filter;
pub use query::{records_from_json, QueryNode, Record, RelationValue, ResultRecord};
pub use relation_catalog::{CatalogBuilder, RelationCatalog};
