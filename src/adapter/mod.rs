//! Storage adapter boundary
//!
//! The engine never talks to storage directly. Every flat read, write and
//! delete goes through an [`Adapter`] registered for the entity's connection.
//! Requests are owned values so that adapter calls can be scheduled as
//! independent tasks.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::filter::Filter;
use crate::query::{OrderBy, Record};
use crate::relation_catalog::EntityDescriptor;

pub mod errors;
pub mod memory;
pub mod registry;

pub use errors::AdapterError;
pub use memory::{AdapterCall, MemoryAdapter};
pub use registry::AdapterRegistry;

/// Adapter-issued transaction token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

/// An open adapter-native transaction on one connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionHandle {
    pub connection: String,
    pub id: TransactionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdapterOperation {
    Read,
    Write,
    Delete,
}

impl fmt::Display for AdapterOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterOperation::Read => write!(f, "read"),
            AdapterOperation::Write => write!(f, "write"),
            AdapterOperation::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadRequest {
    pub entity: Arc<EntityDescriptor>,
    pub filter: Option<Filter>,
    /// Empty means every field.
    pub fields: Vec<String>,
    pub ordering: Vec<OrderBy>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ReadRequest {
    pub fn new(entity: Arc<EntityDescriptor>) -> Self {
        Self {
            entity,
            filter: None,
            fields: Vec::new(),
            ordering: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Create rows (`filter` is `None`) or update the rows matching `filter`.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub entity: Arc<EntityDescriptor>,
    pub filter: Option<Filter>,
    pub payload: Vec<Record>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteRequest {
    pub entity: Arc<EntityDescriptor>,
    pub filter: Filter,
}

/// One row touched by a write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub was_updated: bool,
    pub record: Record,
}

/// Per-storage-engine executor of flat operations.
///
/// Adapters must accept a transaction id they issued themselves on any call
/// and treat `None` as autocommit.
#[async_trait]
pub trait Adapter: Send + Sync {
    async fn read(
        &self,
        request: ReadRequest,
        transaction: Option<TransactionId>,
    ) -> anyhow::Result<Vec<Record>>;

    async fn write(
        &self,
        request: WriteRequest,
        transaction: Option<TransactionId>,
    ) -> anyhow::Result<Vec<WriteOutcome>>;

    /// Remove matching rows and return them as they were before removal.
    async fn delete(
        &self,
        request: DeleteRequest,
        transaction: Option<TransactionId>,
    ) -> anyhow::Result<Vec<Record>>;

    async fn begin_transaction(&self) -> anyhow::Result<TransactionId>;

    async fn commit_transaction(&self, transaction: TransactionId) -> anyhow::Result<()>;

    async fn abort_transaction(&self, transaction: TransactionId) -> anyhow::Result<()>;
}
