//! Traversal planner
//!
//! Classifies every join edge of a query tree independently of its siblings:
//!
//! 1. A filtered child is resolved before its parent; its keys narrow the
//!    parent (or, for a forward edge under a parent write, are spliced in).
//! 2. In a write, a forward child being created is written before the
//!    parent so its generated key can be spliced into the parent payload.
//!    A reverse child is written after the parent and receives the parent's
//!    key instead.
//! 3. Everything else runs after the parent, bounded by the parent's keys.
//!
//! A filtered child that deletes or updates is resolved first only as a
//! read that narrows the parent. Its mutation is deferred until the parent's
//! keys are known, so it never touches rows outside the parent's relation.
//!
//! Any edge that does not resolve to exactly one relation fails the whole
//! plan before an adapter is touched.

use std::sync::Arc;

use crate::query::{NodeFilter, Operation, QueryNode};
use crate::relation_catalog::{RelationCatalog, ResolvedRelation};

pub mod errors;
pub mod plan;

pub use errors::PlanError;
pub use plan::{EdgeTiming, KeySplice, PlannedEdge, PlannedNode, QueryPlan, WriteMode};

/// Plan a query tree rooted at `root`.
pub fn plan_query(
    catalog: &RelationCatalog,
    root: Arc<QueryNode>,
    max_depth: usize,
) -> Result<QueryPlan, PlanError> {
    let operation = root.operation();

    if operation == Operation::Delete && !root.has_filter() && !root.is_forced() {
        return Err(PlanError::MissingFilter {
            model: root.model().to_string(),
        });
    }

    let planner = Planner {
        catalog,
        operation,
        max_depth,
    };
    let root = planner.plan_node(root, 0, false, None)?;
    log::debug!("Planned {} over {} node(s)", operation, root.node_count());
    Ok(QueryPlan { operation, root })
}

/// Timing and splice direction for one edge.
pub fn classify_edge(
    parent_mode: Option<WriteMode>,
    relation: &ResolvedRelation,
    child: &QueryNode,
    child_mode: Option<WriteMode>,
) -> Result<(EdgeTiming, Option<KeySplice>), PlanError> {
    if child.has_filter() {
        return match (relation.is_forward(), parent_mode) {
            (true, Some(WriteMode::Create)) => {
                Ok((EdgeTiming::Before, Some(KeySplice::ChildToParent)))
            }
            (true, Some(WriteMode::Update)) if child.has_payload() => {
                Ok((EdgeTiming::Before, Some(KeySplice::ChildToParent)))
            }
            (false, Some(WriteMode::Create)) => Err(PlanError::FilteredReverseChildOnCreate {
                model: relation.parent_model().to_string(),
                relation: relation.descriptor.related_name.clone(),
            }),
            _ => Ok((EdgeTiming::Before, None)),
        };
    }

    // An unfiltered child update is bounded by the parent's keys, so it has to
    // wait for the parent in either direction.
    match (child_mode, relation.is_forward()) {
        (Some(WriteMode::Create), true) => Ok((
            EdgeTiming::Before,
            parent_mode.map(|_| KeySplice::ChildToParent),
        )),
        (Some(WriteMode::Create), false) => Ok((EdgeTiming::After, Some(KeySplice::ParentToChild))),
        _ => Ok((EdgeTiming::After, None)),
    }
}

struct Planner<'a> {
    catalog: &'a RelationCatalog,
    operation: Operation,
    max_depth: usize,
}

impl Planner<'_> {
    /// `link_field` is the field on this node that joins it to its parent.
    fn plan_node(
        &self,
        node: Arc<QueryNode>,
        depth: usize,
        filtered_above: bool,
        link_field: Option<&str>,
    ) -> Result<PlannedNode, PlanError> {
        if depth > self.max_depth {
            return Err(PlanError::DepthExceeded {
                max: self.max_depth,
            });
        }

        let entity = self.catalog.entity(node.model())?;
        self.check_fields(&node, &entity)?;
        if node.marked_for_delete()
            && entity.single_primary_key().is_none()
            && (node.limit_value().is_some() || node.offset_value().is_some())
        {
            return Err(PlanError::WindowedDeleteWithoutKey {
                model: node.model().to_string(),
            });
        }

        let write_mode = self.write_mode(&node, filtered_above)?;
        let filtered = filtered_above || node.has_filter();

        let mut edges = Vec::with_capacity(node.children().len());
        for (name, child) in node.children() {
            self.check_child_operation(name, child)?;
            let relation = self
                .catalog
                .resolve_edge(node.model(), name, child.model())?;
            let child_mode = self.write_mode(child, filtered)?;
            let (timing, splice) = classify_edge(write_mode, &relation, child, child_mode)?;
            log::debug!(
                "Edge {}.{} ({}): {:?}{}",
                node.model(),
                name,
                relation.direction,
                timing,
                splice.map(|s| format!(", splice {:?}", s)).unwrap_or_default()
            );
            let child = self.plan_node(
                child.clone(),
                depth + 1,
                filtered,
                Some(relation.child_key()),
            )?;
            let mutate_after = timing == EdgeTiming::Before && splice.is_none() && child.mutates();
            edges.push(PlannedEdge {
                name: name.clone(),
                relation,
                timing,
                splice,
                mutate_after,
                child,
            });
        }

        let (fetch_fields, transient_fields) =
            fetch_fields(&node, &entity.primary_key, link_field, &edges);

        Ok(PlannedNode {
            node,
            entity,
            depth,
            write_mode,
            fetch_fields,
            transient_fields,
            edges,
        })
    }

    fn write_mode(
        &self,
        node: &QueryNode,
        filtered_above: bool,
    ) -> Result<Option<WriteMode>, PlanError> {
        if node.operation() != Operation::Write {
            if node.has_payload() {
                return Err(PlanError::UnexpectedPayload {
                    model: node.model().to_string(),
                    operation: node.operation(),
                });
            }
            return Ok(None);
        }
        if !node.has_payload() {
            // A write node without payload only materializes the relation.
            return Ok(None);
        }
        if filtered_above || node.has_filter() {
            let rows = node.payload_rows().len();
            if rows > 1 {
                return Err(PlanError::MultipleUpdatePayloads {
                    model: node.model().to_string(),
                    rows,
                });
            }
            Ok(Some(WriteMode::Update))
        } else {
            Ok(Some(WriteMode::Create))
        }
    }

    fn check_child_operation(&self, relation: &str, child: &QueryNode) -> Result<(), PlanError> {
        let allowed = match self.operation {
            Operation::Read => child.operation() == Operation::Read,
            Operation::Write => child.operation() != Operation::Delete,
            Operation::Delete => child.operation() != Operation::Write,
        };
        if allowed {
            Ok(())
        } else {
            Err(PlanError::OperationMismatch {
                relation: relation.to_string(),
                model: child.model().to_string(),
                root: self.operation,
                child: child.operation(),
            })
        }
    }

    fn check_fields(
        &self,
        node: &QueryNode,
        entity: &crate::relation_catalog::EntityDescriptor,
    ) -> Result<(), PlanError> {
        let unknown = |field: &str, usage: &'static str| PlanError::UnknownField {
            model: node.model().to_string(),
            field: field.to_string(),
            usage,
        };
        for field in node.selected_fields() {
            if !entity.has_field(field) {
                return Err(unknown(field, "field selection"));
            }
        }
        for order in node.ordering() {
            if !entity.has_field(&order.field) {
                return Err(unknown(&order.field, "ordering"));
            }
        }
        if let Some(NodeFilter::Valid(filter)) = node.node_filter() {
            if let Some(field) = filter.fields().find(|f| !entity.has_field(f)) {
                return Err(unknown(field, "filter"));
            }
        }
        for row in node.payload_rows() {
            if let Some(field) = row.keys().find(|f| !entity.has_field(f)) {
                return Err(unknown(field, "payload"));
            }
        }
        Ok(())
    }
}

/// Fields to fetch for a node and which of them the caller did not ask for.
fn fetch_fields(
    node: &QueryNode,
    primary_key: &[String],
    link_field: Option<&str>,
    edges: &[PlannedEdge],
) -> (Vec<String>, Vec<String>) {
    let selected = node.selected_fields();
    if selected.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let mut fetch: Vec<String> = selected.to_vec();
    let mut transient = Vec::new();
    let required = primary_key
        .iter()
        .map(String::as_str)
        .chain(link_field)
        .chain(edges.iter().map(|e| e.relation.parent_key()));
    for field in required {
        if !fetch.iter().any(|f| f == field) {
            fetch.push(field.to_string());
            transient.push(field.to_string());
        }
    }
    (fetch, transient)
}
