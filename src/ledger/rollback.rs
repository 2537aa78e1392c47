use std::collections::HashMap;

use crate::adapter::{
    Adapter, AdapterError, AdapterOperation, AdapterRegistry, DeleteRequest, TransactionId,
    WriteRequest,
};
use crate::filter::{Condition, Filter};
use crate::query::Record;
use crate::relation_catalog::EntityDescriptor;

use super::errors::{LedgerError, RollbackError};
use super::{LedgerEntry, LedgerState, MutationLedger, Origin};

/// Summary of one undone span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolledBackSpan {
    pub connection: String,
    pub entries: usize,
    pub rows: usize,
}

impl MutationLedger {
    /// Undo the highest-order run of entries belonging to one connection,
    /// inside one adapter transaction on that connection.
    ///
    /// `inherited` maps connections to transactions the caller already holds;
    /// those are reused and left open. Returns `None` once the ledger is empty.
    pub async fn rollback_span(
        &mut self,
        adapters: &AdapterRegistry,
        inherited: &HashMap<String, TransactionId>,
    ) -> Result<Option<RolledBackSpan>, RollbackError> {
        if self.state == LedgerState::Committed {
            return Err(LedgerError::InvalidState {
                state: self.state,
                action: "roll back",
            }
            .into());
        }
        let Some((connection, span)) = self.top_span() else {
            self.state = LedgerState::Empty;
            return Ok(None);
        };
        self.state = LedgerState::RollingBack;

        let adapter = adapters
            .get(&connection)
            .map_err(|source| RollbackError::Transaction {
                connection: connection.clone(),
                source,
            })?;
        let (transaction, owned) = match inherited.get(&connection) {
            Some(id) => (*id, false),
            None => {
                let id = adapter.begin_transaction().await.map_err(|e| {
                    RollbackError::Transaction {
                        connection: connection.clone(),
                        source: AdapterError::transaction(&connection, "begin", e),
                    }
                })?;
                (id, true)
            }
        };

        let mut rows = 0;
        for (done, index) in span.iter().enumerate() {
            let entry = &self.entries[*index];
            if let Err(err) = undo_entry(adapter.as_ref(), entry, transaction).await {
                log::error!(
                    "Rollback of {} (order {}) on '{}' failed: {}",
                    entry.model(),
                    entry.order,
                    connection,
                    err
                );
                if owned {
                    if let Err(abort) = adapter.abort_transaction(transaction).await {
                        log::error!("Aborting rollback transaction on '{}' failed: {}", connection, abort);
                    }
                } else {
                    // No transaction of ours to abort: what was undone stays undone.
                    self.remove_entries(&span[..done]);
                }
                return Err(err);
            }
            rows += entry.rows.len();
        }

        if owned {
            adapter
                .commit_transaction(transaction)
                .await
                .map_err(|e| RollbackError::Transaction {
                    connection: connection.clone(),
                    source: AdapterError::transaction(&connection, "commit", e),
                })?;
        }

        self.remove_entries(&span);
        if self.entries.is_empty() {
            self.state = LedgerState::Empty;
        }
        log::info!(
            "Rolled back {} entr(y/ies), {} row(s) on '{}'",
            span.len(),
            rows,
            connection
        );
        Ok(Some(RolledBackSpan {
            connection,
            entries: span.len(),
            rows,
        }))
    }

    /// Undo every entry, one connection span at a time.
    pub async fn rollback_all(
        &mut self,
        adapters: &AdapterRegistry,
        inherited: &HashMap<String, TransactionId>,
    ) -> Result<Vec<RolledBackSpan>, RollbackError> {
        let mut spans = Vec::new();
        while let Some(span) = self.rollback_span(adapters, inherited).await? {
            spans.push(span);
        }
        Ok(spans)
    }
}

async fn undo_entry(
    adapter: &dyn Adapter,
    entry: &LedgerEntry,
    transaction: TransactionId,
) -> Result<(), RollbackError> {
    let fail = |operation: AdapterOperation, cause: anyhow::Error| RollbackError::Adapter {
        order: entry.order,
        model: entry.model().to_string(),
        source: AdapterError::failed(entry.connection(), entry.model(), operation, cause),
    };

    match entry.origin {
        Origin::Set => {
            for row in entry.rows.iter().rev() {
                let filter = key_filter(&entry.entity, &row.record)?;
                if row.was_created {
                    let request = DeleteRequest {
                        entity: entry.entity.clone(),
                        filter,
                    };
                    adapter
                        .delete(request, Some(transaction))
                        .await
                        .map_err(|e| fail(AdapterOperation::Delete, e))?;
                } else {
                    let request = WriteRequest {
                        entity: entry.entity.clone(),
                        filter: Some(filter),
                        payload: vec![row.record.clone()],
                    };
                    adapter
                        .write(request, Some(transaction))
                        .await
                        .map_err(|e| fail(AdapterOperation::Write, e))?;
                }
            }
        }
        Origin::Remove => {
            let payload: Vec<Record> = entry.rows.iter().map(|r| r.record.clone()).collect();
            let request = WriteRequest {
                entity: entry.entity.clone(),
                filter: None,
                payload,
            };
            adapter
                .write(request, Some(transaction))
                .await
                .map_err(|e| fail(AdapterOperation::Write, e))?;
        }
    }
    Ok(())
}

/// Equality filter on the primary key of `record`.
fn key_filter(entity: &EntityDescriptor, record: &Record) -> Result<Filter, RollbackError> {
    entity
        .primary_key
        .iter()
        .try_fold(Filter::new(), |filter, field| match record.get(field) {
            Some(value) if !value.is_null() => {
                Ok(filter.with(field.clone(), Condition::Eq(value.clone())))
            }
            _ => Err(RollbackError::MissingKey {
                model: entity.name.clone(),
                field: field.clone(),
            }),
        })
}
