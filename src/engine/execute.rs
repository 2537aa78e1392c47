//! Plan execution
//!
//! Walks a [`PlannedNode`] tree. For every node:
//!
//! 1. `before` children run concurrently; their keys narrow the node's filter
//!    or are spliced into its payload.
//! 2. The node's own adapter call is issued (at most once, reads memoized).
//! 3. `after` children run concurrently, bounded by (or spliced with) the
//!    node's keys.
//! 4. Every child batch is merged into the node's rows by lookup table.
//!
//! Deletes materialize their rows first, let `after` children run, then
//! remove the rows they materialized. A filtered child that mutates is read
//! in step 1 only to narrow the node, and mutated in step 3.

use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;

use super::context::OperationContext;
use super::errors::EngineError;
use super::fan_out::{fan_out, CancelScope};
use super::merge::{
    key_values, merge_edge, project, replicate_for_parents, splice_child_keys,
};
use crate::adapter::{
    Adapter, AdapterError, AdapterOperation, AdapterRegistry, DeleteRequest, ReadRequest,
    TransactionId, WriteOutcome, WriteRequest,
};
use crate::events::MutationKind;
use crate::filter::Filter;
use crate::ledger::{LedgerRow, Origin};
use crate::query::{NodeFilter, Operation, Record, ResultRecord};
use crate::query_planner::{EdgeTiming, KeySplice, PlannedEdge, PlannedNode, WriteMode};
use crate::relation_catalog::EntityDescriptor;

/// Constraint a parent places on a child resolved after it.
#[derive(Debug, Clone, PartialEq)]
pub enum Bound {
    Unbounded,
    /// Only rows whose `field` is one of `values`.
    Keys { field: String, values: Vec<Value> },
    /// Create the payload once per value, with `field` set to that value.
    Splice { field: String, values: Vec<Value> },
}

pub struct Executor<'a> {
    pub adapters: &'a AdapterRegistry,
    pub ctx: &'a OperationContext,
}

fn adapter_failure(
    entity: &EntityDescriptor,
    operation: AdapterOperation,
) -> impl FnOnce(anyhow::Error) -> AdapterError + '_ {
    move |cause| AdapterError::failed(&entity.connection, &entity.name, operation, cause)
}

/// The node's own filter conjoined with `field in values` for every key set.
fn effective_filter(own: Option<&Filter>, keys: &[(String, Vec<Value>)]) -> Option<Filter> {
    let mut filter = own.cloned();
    for (field, values) in keys {
        filter = Some(filter.unwrap_or_default().and_in(field.clone(), values.clone()));
    }
    filter.filter(|f| !f.is_empty())
}

fn search_key(filter: Option<&Filter>) -> String {
    filter.map(ToString::to_string).unwrap_or_else(|| "null".to_string())
}

impl Executor<'_> {
    pub fn execute<'b>(
        &'b self,
        planned: &'b PlannedNode,
        bound: Bound,
        scope: CancelScope,
    ) -> BoxFuture<'b, Result<Vec<ResultRecord>, EngineError>> {
        async move {
            scope.check()?;
            let node = planned.node.as_ref();

            if let Some(NodeFilter::Invalid { raw, error }) = node.node_filter() {
                log::warn!(
                    "[{}] Branch {} has an invalid filter {}, returning no rows: {}",
                    self.ctx.id,
                    node.model(),
                    raw,
                    error
                );
                return Ok(Vec::new());
            }

            let mut keys: Vec<(String, Vec<Value>)> = Vec::new();
            let mut payload: Vec<Record> = node.payload_rows().to_vec();
            match bound {
                Bound::Unbounded => {}
                Bound::Keys { field, values } => keys.push((field, values)),
                Bound::Splice { field, values } => {
                    payload = replicate_for_parents(&payload, &field, &values)
                }
            }

            let mut merged: Vec<(&PlannedEdge, Vec<ResultRecord>)> = Vec::new();
            let before: Vec<&PlannedEdge> = planned.edges_with(EdgeTiming::Before).collect();
            if !before.is_empty() {
                let group = scope.child();
                let branches: Vec<_> = before
                    .iter()
                    .copied()
                    .map(|edge| {
                        if edge.mutate_after {
                            self.narrow(&edge.child, group.clone())
                        } else {
                            self.execute(&edge.child, Bound::Unbounded, group.clone())
                        }
                    })
                    .collect();
                let results = fan_out(&group, branches).await?;
                for (edge, children) in before.into_iter().zip(results) {
                    self.apply_before(edge, &children, &mut keys, &mut payload)?;
                    if !edge.mutate_after {
                        merged.push((edge, children));
                    }
                }
            }

            if let Some((field, _)) = keys.iter().find(|(_, values)| values.is_empty()) {
                log::debug!(
                    "[{}] No {} values to bound {}, skipping its call",
                    self.ctx.id,
                    field,
                    node.model()
                );
                return Ok(Vec::new());
            }
            let filter = effective_filter(node.valid_filter(), &keys);

            scope.check()?;
            let entity = &planned.entity;
            let adapter = self.adapters.get(&entity.connection)?;
            let transaction = self.ctx.transaction(&entity.connection, &adapter).await?;

            let records = match (node.operation(), planned.write_mode) {
                (Operation::Write, Some(WriteMode::Create)) => {
                    self.create(planned, payload, &adapter, transaction).await?
                }
                (Operation::Write, Some(WriteMode::Update)) => {
                    self.update(planned, filter.clone(), payload, &adapter, transaction)
                        .await?
                }
                (Operation::Delete, _) => {
                    // Materialize without the memo: these rows are about to go.
                    adapter
                        .read(self.read_request(planned, filter.clone()), transaction)
                        .await
                        .map_err(adapter_failure(entity, AdapterOperation::Read))?
                }
                _ => {
                    self.ctx
                        .memo
                        .read(
                            node.id(),
                            adapter.clone(),
                            self.read_request(planned, filter.clone()),
                            transaction,
                        )
                        .await?
                }
            };
            let mut rows: Vec<ResultRecord> = records.into_iter().map(ResultRecord::from).collect();

            let after: Vec<&PlannedEdge> = planned
                .edges
                .iter()
                .filter(|e| e.timing == EdgeTiming::After || e.mutate_after)
                .collect();
            if !after.is_empty() && !rows.is_empty() {
                let group = scope.child();
                let branches: Vec<_> = after
                    .iter()
                    .copied()
                    .map(|edge| {
                        let values =
                            key_values(rows.iter().map(|r| &r.fields), edge.relation.parent_key());
                        let field = edge.relation.child_key().to_string();
                        let bound = match edge.splice {
                            Some(KeySplice::ParentToChild) => Bound::Splice { field, values },
                            _ => Bound::Keys { field, values },
                        };
                        self.execute(&edge.child, bound, group.clone())
                    })
                    .collect();
                let results = fan_out(&group, branches).await?;
                merged.extend(after.into_iter().zip(results));
            }

            if node.marked_for_delete() && !rows.is_empty() {
                scope.check()?;
                self.remove(planned, &rows, filter, &adapter, transaction)
                    .await?;
            }

            for (edge, children) in &merged {
                merge_edge(&mut rows, edge, children);
            }
            Ok(rows)
        }
        .boxed()
    }

    /// Read-only pass over a deferred mutation branch: the rows its filter
    /// (and its own filtered children) select, without writing or removing.
    fn narrow<'b>(
        &'b self,
        planned: &'b PlannedNode,
        scope: CancelScope,
    ) -> BoxFuture<'b, Result<Vec<ResultRecord>, EngineError>> {
        async move {
            scope.check()?;
            let node = planned.node.as_ref();
            if let Some(NodeFilter::Invalid { raw, error }) = node.node_filter() {
                log::warn!(
                    "[{}] Branch {} has an invalid filter {}, returning no rows: {}",
                    self.ctx.id,
                    node.model(),
                    raw,
                    error
                );
                return Ok(Vec::new());
            }

            let narrowing: Vec<&PlannedEdge> = planned
                .edges_with(EdgeTiming::Before)
                .filter(|e| e.splice.is_none() && e.child.node.has_filter())
                .collect();
            let mut keys: Vec<(String, Vec<Value>)> = Vec::new();
            if !narrowing.is_empty() {
                let group = scope.child();
                let branches: Vec<_> = narrowing
                    .iter()
                    .copied()
                    .map(|edge| self.narrow(&edge.child, group.clone()))
                    .collect();
                let results = fan_out(&group, branches).await?;
                for (edge, children) in narrowing.into_iter().zip(results) {
                    let values =
                        key_values(children.iter().map(|c| &c.fields), edge.relation.child_key());
                    keys.push((edge.relation.parent_key().to_string(), values));
                }
            }
            if keys.iter().any(|(_, values)| values.is_empty()) {
                return Ok(Vec::new());
            }

            scope.check()?;
            let entity = &planned.entity;
            let adapter = self.adapters.get(&entity.connection)?;
            let transaction = self.ctx.transaction(&entity.connection, &adapter).await?;
            let filter = effective_filter(node.valid_filter(), &keys);
            let records = self
                .ctx
                .memo
                .read(
                    node.id(),
                    adapter.clone(),
                    self.read_request(planned, filter),
                    transaction,
                )
                .await?;
            Ok(records.into_iter().map(ResultRecord::from).collect())
        }
        .boxed()
    }

    /// Fold a resolved `before` child into the parent's filter or payload.
    fn apply_before(
        &self,
        edge: &PlannedEdge,
        children: &[ResultRecord],
        keys: &mut Vec<(String, Vec<Value>)>,
        payload: &mut [Record],
    ) -> Result<(), EngineError> {
        let child_key = edge.relation.child_key();
        match edge.splice {
            Some(KeySplice::ChildToParent) => {
                let spliced = children
                    .iter()
                    .map(|child| match child.get(child_key) {
                        Some(value) if !value.is_null() => Ok(value.clone()),
                        _ => Err(EngineError::MissingJoinKey {
                            model: edge.child.model().to_string(),
                            field: child_key.to_string(),
                        }),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                splice_child_keys(
                    payload,
                    edge.relation.parent_key(),
                    &spliced,
                    edge.relation.parent_model(),
                    &edge.name,
                )
            }
            _ if edge.child.node.has_filter() => {
                let values = key_values(children.iter().map(|c| &c.fields), child_key);
                keys.push((edge.relation.parent_key().to_string(), values));
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn read_request(&self, planned: &PlannedNode, filter: Option<Filter>) -> ReadRequest {
        let node = planned.node.as_ref();
        ReadRequest {
            entity: planned.entity.clone(),
            filter,
            fields: planned.fetch_fields.clone(),
            ordering: node.ordering().to_vec(),
            limit: node.limit_value(),
            offset: node.offset_value(),
        }
    }

    async fn create(
        &self,
        planned: &PlannedNode,
        payload: Vec<Record>,
        adapter: &Arc<dyn Adapter>,
        transaction: Option<TransactionId>,
    ) -> Result<Vec<Record>, EngineError> {
        if payload.is_empty() {
            return Ok(Vec::new());
        }
        let entity = &planned.entity;
        log::debug!(
            "[{}] create {} row(s) of {}",
            self.ctx.id,
            payload.len(),
            entity.name
        );
        let request = WriteRequest {
            entity: entity.clone(),
            filter: None,
            payload,
        };
        let outcomes = adapter
            .write(request, transaction)
            .await
            .map_err(adapter_failure(entity, AdapterOperation::Write))?;

        let created = outcomes
            .iter()
            .filter(|o| !o.was_updated)
            .map(|o| LedgerRow {
                was_created: true,
                record: o.record.clone(),
            })
            .collect();
        self.record(planned, "null", Origin::Set, created).await?;
        Ok(self.finish_write(planned, outcomes))
    }

    async fn update(
        &self,
        planned: &PlannedNode,
        filter: Option<Filter>,
        payload: Vec<Record>,
        adapter: &Arc<dyn Adapter>,
        transaction: Option<TransactionId>,
    ) -> Result<Vec<Record>, EngineError> {
        let entity = &planned.entity;
        let Some(filter) = filter else {
            return Err(EngineError::UnboundedUpdate {
                model: entity.name.clone(),
            });
        };
        let search = search_key(Some(&filter));
        log::debug!("[{}] update {} where {}", self.ctx.id, entity.name, search);

        let snapshot = self.snapshot(entity, &filter, adapter, transaction).await?;

        let request = WriteRequest {
            entity: entity.clone(),
            filter: Some(filter),
            payload,
        };
        let outcomes = adapter
            .write(request, transaction)
            .await
            .map_err(adapter_failure(entity, AdapterOperation::Write))?;
        self.record(planned, &search, Origin::Set, snapshot).await?;
        Ok(self.finish_write(planned, outcomes))
    }

    /// Emit events for a finished write and shape its rows like a read.
    fn finish_write(&self, planned: &PlannedNode, outcomes: Vec<WriteOutcome>) -> Vec<Record> {
        let (updated, created): (Vec<_>, Vec<_>) =
            outcomes.into_iter().partition(|o| o.was_updated);
        let created: Vec<Record> = created.into_iter().map(|o| o.record).collect();
        let updated: Vec<Record> = updated.into_iter().map(|o| o.record).collect();
        self.ctx
            .emit(&planned.entity, MutationKind::Created, created.clone());
        self.ctx
            .emit(&planned.entity, MutationKind::Updated, updated.clone());

        created
            .into_iter()
            .chain(updated)
            .map(|record| project(record, &planned.fetch_fields))
            .collect()
    }

    /// Remove the materialized `rows` of a delete node.
    async fn remove(
        &self,
        planned: &PlannedNode,
        rows: &[ResultRecord],
        filter: Option<Filter>,
        adapter: &Arc<dyn Adapter>,
        transaction: Option<TransactionId>,
    ) -> Result<(), EngineError> {
        let entity = &planned.entity;
        let filter = match entity.single_primary_key() {
            Some(pk) if rows.iter().all(|r| r.get(pk).is_some_and(|v| !v.is_null())) => {
                Filter::any_of(pk, key_values(rows.iter().map(|r| &r.fields), pk))
            }
            _ => filter.unwrap_or_default(),
        };
        let search = search_key(Some(&filter));
        log::debug!("[{}] delete {} where {}", self.ctx.id, entity.name, search);

        // Full rows, not the projection the caller asked for.
        let snapshot = self.snapshot(entity, &filter, adapter, transaction).await?;

        let removed = adapter
            .delete(
                DeleteRequest {
                    entity: entity.clone(),
                    filter,
                },
                transaction,
            )
            .await
            .map_err(adapter_failure(entity, AdapterOperation::Delete))?;
        self.record(planned, &search, Origin::Remove, snapshot).await?;
        self.ctx.emit(entity, MutationKind::Removed, removed);
        Ok(())
    }

    /// Pre-images of the rows `filter` matches, read only when a ledger is
    /// kept. They are recorded once the mutation itself went through.
    async fn snapshot(
        &self,
        entity: &Arc<EntityDescriptor>,
        filter: &Filter,
        adapter: &Arc<dyn Adapter>,
        transaction: Option<TransactionId>,
    ) -> Result<Vec<LedgerRow>, EngineError> {
        if !self.ctx.records_mutations() {
            return Ok(Vec::new());
        }
        let rows = adapter
            .read(
                ReadRequest::new(entity.clone()).with_filter(filter.clone()),
                transaction,
            )
            .await
            .map_err(adapter_failure(entity, AdapterOperation::Read))?;
        Ok(rows
            .into_iter()
            .map(|record| LedgerRow {
                was_created: false,
                record,
            })
            .collect())
    }

    async fn record(
        &self,
        planned: &PlannedNode,
        search: &str,
        origin: Origin,
        rows: Vec<LedgerRow>,
    ) -> Result<(), EngineError> {
        if let Some(ledger) = &self.ctx.ledger {
            ledger
                .lock()
                .await
                .record(planned.depth, &planned.entity, search, origin, rows)?;
        }
        Ok(())
    }
}
