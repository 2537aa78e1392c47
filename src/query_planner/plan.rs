//! Planned query tree
//!
//! The planner turns a [`QueryNode`] tree into a tree of [`PlannedNode`]s
//! where every edge knows its timing relative to the parent call and, for
//! writes, which side's key gets spliced into the other side's payload.

use std::fmt;
use std::sync::Arc;

use crate::query::{Operation, QueryNode};
use crate::relation_catalog::{EntityDescriptor, ResolvedRelation};

/// When a child edge is resolved relative to its parent's own adapter call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeTiming {
    /// Child first; its keys narrow the parent or are spliced into it.
    Before,
    /// Parent first; its keys bound the child or are spliced into it.
    After,
}

/// Direction of a generated-key substitution between payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySplice {
    /// The child's key goes into the parent payload under the owning field.
    ChildToParent,
    /// The parent's key goes into every child payload row.
    ParentToChild,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Create,
    Update,
}

#[derive(Debug, Clone)]
pub struct PlannedEdge {
    /// Relation or related name used in the join.
    pub name: String,
    pub relation: ResolvedRelation,
    pub timing: EdgeTiming,
    pub splice: Option<KeySplice>,
    /// A `Before` child that mutates: the early pass only reads to narrow
    /// the parent, and the mutation runs after the parent, bounded by its keys.
    pub mutate_after: bool,
    pub child: PlannedNode,
}

#[derive(Debug, Clone)]
pub struct PlannedNode {
    pub node: Arc<QueryNode>,
    pub entity: Arc<EntityDescriptor>,
    pub depth: usize,
    /// `Some` for write nodes that carry payload.
    pub write_mode: Option<WriteMode>,
    /// Fields requested from the adapter; empty means every field.
    pub fetch_fields: Vec<String>,
    /// Fields fetched only to serve a join, removed from the final result.
    pub transient_fields: Vec<String>,
    pub edges: Vec<PlannedEdge>,
}

impl PlannedNode {
    pub fn model(&self) -> &str {
        self.node.model()
    }

    pub fn edges_with(&self, timing: EdgeTiming) -> impl Iterator<Item = &PlannedEdge> {
        self.edges.iter().filter(move |e| e.timing == timing)
    }

    /// Whether this node or anything below it writes or deletes.
    pub fn mutates(&self) -> bool {
        self.write_mode.is_some()
            || self.node.marked_for_delete()
            || self.edges.iter().any(|e| e.child.mutates())
    }

    /// Number of planned nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        1 + self.edges.iter().map(|e| e.child.node_count()).sum::<usize>()
    }

    fn describe(&self) -> String {
        let mode = match self.write_mode {
            Some(WriteMode::Create) => " (create)",
            Some(WriteMode::Update) => " (update)",
            None => "",
        };
        let fields = if self.fetch_fields.is_empty() {
            "*".to_string()
        } else {
            self.fetch_fields.join(", ")
        };
        let mut out = format!(
            "{} {}{} [{}]",
            self.node.operation(),
            self.model(),
            mode,
            fields
        );
        if self.node.has_filter() {
            out.push_str(" filtered");
        }
        out
    }

    fn fmt_tree(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        for edge in &self.edges {
            let splice = match edge.splice {
                Some(KeySplice::ChildToParent) => ", child->parent",
                Some(KeySplice::ParentToChild) => ", parent->child",
                None => "",
            };
            let timing = match edge.timing {
                EdgeTiming::Before => "before",
                EdgeTiming::After => "after",
            };
            let deferred = if edge.mutate_after { ", mutate after" } else { "" };
            writeln!(
                f,
                "{:indent$}└─ {} <{}, {}{}{}> {}",
                "",
                edge.name,
                edge.relation.direction,
                timing,
                splice,
                deferred,
                edge.child.describe(),
                indent = indent
            )?;
            edge.child.fmt_tree(f, indent + 3)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub operation: Operation,
    pub root: PlannedNode,
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.root.describe())?;
        self.root.fmt_tree(f, 0)
    }
}
