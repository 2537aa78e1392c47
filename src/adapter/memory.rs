//! In-process adapter
//!
//! Keeps rows per model in memory and evaluates filters with the crate's own
//! evaluator. Every call is appended to a call log, and failures can be
//! injected per (operation, model), which makes it the adapter of choice for
//! tests and for prototyping against a catalog before real storage exists.
//!
//! Transactions snapshot every table on begin and restore the snapshot on
//! abort. Only one transaction may be open at a time.

use std::cmp::Ordering;
use std::collections::HashMap;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{
    Adapter, AdapterOperation, DeleteRequest, ReadRequest, TransactionId, WriteOutcome,
    WriteRequest,
};
use crate::filter::{compare, Filter};
use crate::query::{Record, SortDirection};
use crate::relation_catalog::EntityDescriptor;

/// One logged adapter call.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterCall {
    pub operation: AdapterOperation,
    pub model: String,
    /// Serialized filter, if the call carried one.
    pub filter: Option<Value>,
    /// Payload rows for writes, zero otherwise.
    pub rows: usize,
    pub transaction: Option<TransactionId>,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: HashMap<String, Vec<Record>>,
    sequences: HashMap<String, i64>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: Tables,
    calls: Vec<AdapterCall>,
    failures: Vec<(AdapterOperation, String)>,
    next_transaction: u64,
    open: Option<(TransactionId, Tables)>,
    committed: usize,
    aborted: usize,
}

#[derive(Debug, Default)]
pub struct MemoryAdapter {
    state: Mutex<MemoryState>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert rows directly, bypassing the call log.
    pub async fn seed(&self, model: &str, rows: Vec<Record>) {
        let mut state = self.state.lock().await;
        for row in &rows {
            if let Some(Value::Number(n)) = row.get("id") {
                if let Some(id) = n.as_i64() {
                    let seq = state.tables.sequences.entry(model.to_string()).or_insert(0);
                    *seq = (*seq).max(id);
                }
            }
        }
        state
            .tables
            .rows
            .entry(model.to_string())
            .or_default()
            .extend(rows);
    }

    /// Current rows of `model`, in insertion order.
    pub async fn rows(&self, model: &str) -> Vec<Record> {
        let state = self.state.lock().await;
        state.tables.rows.get(model).cloned().unwrap_or_default()
    }

    pub async fn calls(&self) -> Vec<AdapterCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    /// Make every subsequent `operation` on `model` fail.
    pub async fn fail_on(&self, operation: AdapterOperation, model: &str) {
        self.state
            .lock()
            .await
            .failures
            .push((operation, model.to_string()));
    }

    pub async fn clear_failures(&self) {
        self.state.lock().await.failures.clear();
    }

    /// (committed, aborted) transaction counts.
    pub async fn transaction_counts(&self) -> (usize, usize) {
        let state = self.state.lock().await;
        (state.committed, state.aborted)
    }
}

impl MemoryState {
    fn log(
        &mut self,
        operation: AdapterOperation,
        model: &str,
        filter: Option<&Filter>,
        rows: usize,
        transaction: Option<TransactionId>,
    ) -> anyhow::Result<()> {
        self.calls.push(AdapterCall {
            operation,
            model: model.to_string(),
            filter: filter.map(Filter::to_json),
            rows,
            transaction,
        });
        if self
            .failures
            .iter()
            .any(|(op, m)| *op == operation && m == model)
        {
            bail!("injected {} failure on `{}`", operation, model);
        }
        if let Some(id) = transaction {
            match &self.open {
                Some((open, _)) if *open == id => {}
                _ => bail!("transaction {:?} is not open", id),
            }
        }
        Ok(())
    }

    fn insert(&mut self, entity: &EntityDescriptor, mut row: Record) -> Record {
        for field in entity.generated_fields() {
            if row.get(&field.name).map_or(true, Value::is_null) {
                let seq = self
                    .tables
                    .sequences
                    .entry(entity.name.clone())
                    .or_insert(0);
                *seq += 1;
                row.insert(field.name.clone(), Value::from(*seq));
            }
        }
        for field in &entity.fields {
            if !row.contains_key(&field.name) && field.nullable {
                row.insert(field.name.clone(), Value::Null);
            }
        }
        self.tables
            .rows
            .entry(entity.name.clone())
            .or_default()
            .push(row.clone());
        row
    }
}

fn project(row: &Record, fields: &[String]) -> Record {
    if fields.is_empty() {
        return row.clone();
    }
    fields
        .iter()
        .filter_map(|f| row.get(f).map(|v| (f.clone(), v.clone())))
        .collect()
}

#[async_trait]
impl Adapter for MemoryAdapter {
    async fn read(
        &self,
        request: ReadRequest,
        transaction: Option<TransactionId>,
    ) -> anyhow::Result<Vec<Record>> {
        let mut state = self.state.lock().await;
        let model = request.entity.name.as_str();
        state.log(
            AdapterOperation::Read,
            model,
            request.filter.as_ref(),
            0,
            transaction,
        )?;

        let mut rows: Vec<&Record> = state
            .tables
            .rows
            .get(model)
            .map(|rows| {
                rows.iter()
                    .filter(|r| request.filter.as_ref().map_or(true, |f| f.matches(r)))
                    .collect()
            })
            .unwrap_or_default();

        if !request.ordering.is_empty() {
            rows.sort_by(|a, b| {
                for order in &request.ordering {
                    let left = a.get(&order.field).unwrap_or(&Value::Null);
                    let right = b.get(&order.field).unwrap_or(&Value::Null);
                    let ord = compare(left, right).unwrap_or(Ordering::Equal);
                    let ord = match order.direction {
                        SortDirection::Asc => ord,
                        SortDirection::Desc => ord.reverse(),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        Ok(rows
            .into_iter()
            .skip(request.offset.unwrap_or(0))
            .take(request.limit.unwrap_or(usize::MAX))
            .map(|row| project(row, &request.fields))
            .collect())
    }

    async fn write(
        &self,
        request: WriteRequest,
        transaction: Option<TransactionId>,
    ) -> anyhow::Result<Vec<WriteOutcome>> {
        let mut state = self.state.lock().await;
        let entity = request.entity.as_ref();
        state.log(
            AdapterOperation::Write,
            &entity.name,
            request.filter.as_ref(),
            request.payload.len(),
            transaction,
        )?;

        match &request.filter {
            None => Ok(request
                .payload
                .into_iter()
                .map(|row| WriteOutcome {
                    was_updated: false,
                    record: state.insert(entity, row),
                })
                .collect()),
            Some(filter) => {
                let changes = request
                    .payload
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow!("update of `{}` without payload", entity.name))?;
                let rows = state.tables.rows.entry(entity.name.clone()).or_default();
                Ok(rows
                    .iter_mut()
                    .filter(|row| filter.matches(row))
                    .map(|row| {
                        for (field, value) in &changes {
                            row.insert(field.clone(), value.clone());
                        }
                        WriteOutcome {
                            was_updated: true,
                            record: row.clone(),
                        }
                    })
                    .collect())
            }
        }
    }

    async fn delete(
        &self,
        request: DeleteRequest,
        transaction: Option<TransactionId>,
    ) -> anyhow::Result<Vec<Record>> {
        let mut state = self.state.lock().await;
        let model = request.entity.name.as_str();
        state.log(
            AdapterOperation::Delete,
            model,
            Some(&request.filter),
            0,
            transaction,
        )?;

        let rows = state.tables.rows.entry(model.to_string()).or_default();
        let (removed, kept): (Vec<Record>, Vec<Record>) =
            rows.drain(..).partition(|row| request.filter.matches(row));
        *rows = kept;
        Ok(removed)
    }

    async fn begin_transaction(&self) -> anyhow::Result<TransactionId> {
        let mut state = self.state.lock().await;
        if let Some((open, _)) = &state.open {
            bail!("transaction {:?} is already open", open);
        }
        state.next_transaction += 1;
        let id = TransactionId(state.next_transaction);
        let snapshot = state.tables.clone();
        state.open = Some((id, snapshot));
        Ok(id)
    }

    async fn commit_transaction(&self, transaction: TransactionId) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        match state.open.take() {
            Some((open, _)) if open == transaction => {
                state.committed += 1;
                Ok(())
            }
            other => {
                state.open = other;
                bail!("transaction {:?} is not open", transaction)
            }
        }
    }

    async fn abort_transaction(&self, transaction: TransactionId) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        match state.open.take() {
            Some((open, snapshot)) if open == transaction => {
                state.tables = snapshot;
                state.aborted += 1;
                Ok(())
            }
            other => {
                state.open = other;
                bail!("transaction {:?} is not open", transaction)
            }
        }
    }
}
