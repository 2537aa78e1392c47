//! Query nodes
//!
//! A [`QueryNode`] describes one operation against one entity type plus the
//! relations joined below it. Nodes are built by successive copy-on-write
//! calls: every builder method leaves the receiver untouched and returns a new
//! node (with a new [`NodeId`]) layered on top of it. Children are shared
//! through `Arc`, so layering is cheap and a node handed to the engine can
//! never change underneath it.
//!
//! ```ignore
//! let base = QueryNode::read("Company").fields(["id", "name"]);
//! let acme = base.filter(json!({"name": "Acme"}));
//! let tree = acme.join("users", QueryNode::read("User"));
//! // `base` and `acme` are still usable and unchanged.
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::record::Record;
use crate::filter::{Filter, FilterError};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one node version; a new id is allocated by every builder call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Read,
    Write,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Read => write!(f, "read"),
            Operation::Write => write!(f, "write"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

/// Filter as supplied by the caller. An invalid filter is kept, not rejected,
/// so that the branch carrying it can degrade to an empty result.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeFilter {
    Valid(Filter),
    Invalid { raw: Value, error: FilterError },
}

#[derive(Debug, Clone)]
pub struct QueryNode {
    id: NodeId,
    model: String,
    operation: Operation,
    fields: Vec<String>,
    filter: Option<NodeFilter>,
    ordering: Vec<OrderBy>,
    limit: Option<usize>,
    offset: Option<usize>,
    payload: Vec<Record>,
    children: BTreeMap<String, Arc<QueryNode>>,
    force: bool,
}

impl QueryNode {
    fn new(model: impl Into<String>, operation: Operation) -> Self {
        Self {
            id: NodeId::next(),
            model: model.into(),
            operation,
            fields: Vec::new(),
            filter: None,
            ordering: Vec::new(),
            limit: None,
            offset: None,
            payload: Vec::new(),
            children: BTreeMap::new(),
            force: false,
        }
    }

    pub fn read(model: impl Into<String>) -> Self {
        Self::new(model, Operation::Read)
    }

    pub fn write(model: impl Into<String>) -> Self {
        Self::new(model, Operation::Write)
    }

    /// A node whose matched rows are removed from storage.
    pub fn delete(model: impl Into<String>) -> Self {
        Self::new(model, Operation::Delete)
    }

    /// Copy of `self` with a fresh identity, for the builder methods.
    fn layer(&self) -> Self {
        let mut next = self.clone();
        next.id = NodeId::next();
        next
    }

    /// Restrict the returned fields. An empty list means every field.
    pub fn fields<I, S>(&self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut next = self.layer();
        next.fields = fields.into_iter().map(Into::into).collect();
        next
    }

    /// Set the filter from its wire shape. Parse errors are recorded on the
    /// node and surface when the node executes.
    pub fn filter(&self, raw: Value) -> Self {
        let mut next = self.layer();
        next.filter = Some(match Filter::from_json(&raw) {
            Ok(filter) => NodeFilter::Valid(filter),
            Err(error) => NodeFilter::Invalid { raw, error },
        });
        next
    }

    pub fn with_filter(&self, filter: Filter) -> Self {
        let mut next = self.layer();
        next.filter = Some(NodeFilter::Valid(filter));
        next
    }

    pub fn order_by(&self, field: impl Into<String>, direction: SortDirection) -> Self {
        let mut next = self.layer();
        next.ordering.push(OrderBy {
            field: field.into(),
            direction,
        });
        next
    }

    pub fn limit(&self, limit: usize) -> Self {
        let mut next = self.layer();
        next.limit = Some(limit);
        next
    }

    pub fn offset(&self, offset: usize) -> Self {
        let mut next = self.layer();
        next.offset = Some(offset);
        next
    }

    /// Replace the payload rows.
    pub fn payload<I>(&self, rows: I) -> Self
    where
        I: IntoIterator<Item = Record>,
    {
        let mut next = self.layer();
        next.payload = rows.into_iter().collect();
        next
    }

    /// Join `child` under the relation (or related) name `relation`.
    pub fn join(&self, relation: impl Into<String>, child: QueryNode) -> Self {
        let mut next = self.layer();
        next.children.insert(relation.into(), Arc::new(child));
        next
    }

    /// Join an already shared child node, keeping its identity.
    pub fn join_shared(&self, relation: impl Into<String>, child: Arc<QueryNode>) -> Self {
        let mut next = self.layer();
        next.children.insert(relation.into(), child);
        next
    }

    /// Allow a delete without a filter to remove every row of the entity.
    pub fn force(&self) -> Self {
        let mut next = self.layer();
        next.force = true;
        next
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn selected_fields(&self) -> &[String] {
        &self.fields
    }

    pub fn node_filter(&self) -> Option<&NodeFilter> {
        self.filter.as_ref()
    }

    /// The parsed filter, if one was given and it is valid.
    pub fn valid_filter(&self) -> Option<&Filter> {
        match &self.filter {
            Some(NodeFilter::Valid(filter)) => Some(filter),
            _ => None,
        }
    }

    pub fn ordering(&self) -> &[OrderBy] {
        &self.ordering
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<usize> {
        self.offset
    }

    pub fn payload_rows(&self) -> &[Record] {
        &self.payload
    }

    pub fn children(&self) -> &BTreeMap<String, Arc<QueryNode>> {
        &self.children
    }

    /// A filter was supplied, valid or not. An empty filter object counts as
    /// no filter.
    pub fn has_filter(&self) -> bool {
        match &self.filter {
            Some(NodeFilter::Valid(filter)) => !filter.is_empty(),
            Some(NodeFilter::Invalid { .. }) => true,
            None => false,
        }
    }

    pub fn has_payload(&self) -> bool {
        !self.payload.is_empty()
    }

    pub fn marked_for_delete(&self) -> bool {
        self.operation == Operation::Delete
    }

    pub fn is_forced(&self) -> bool {
        self.force
    }
}
