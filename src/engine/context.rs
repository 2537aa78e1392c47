//! Per-operation context
//!
//! One [`OperationContext`] is created for every top-level call and dropped
//! when it returns. It owns what the nodes of that call share: the transaction
//! scope of each connection, the read memo, the mutation ledger and the event
//! sink. Nothing here outlives the operation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::memo::ReadMemo;
use crate::adapter::{Adapter, AdapterError, AdapterRegistry, TransactionHandle, TransactionId};
use crate::events::{EventBus, MutationEvent, MutationKind};
use crate::ledger::MutationLedger;
use crate::query::Record;
use crate::relation_catalog::EntityDescriptor;

/// Identity of one top-level operation, carried in logs and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct OperationId(Uuid);

impl OperationId {
    pub fn new() -> Self {
        OperationId(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct ConnectionScope {
    adapter: Arc<dyn Adapter>,
    transaction: TransactionId,
    inherited: bool,
}

/// How the transaction scopes ended.
#[derive(Debug, Default)]
pub struct ScopeOutcome {
    /// Connections whose engine-owned transaction was aborted.
    pub aborted: Vec<String>,
    /// First failure to commit or abort, if any.
    pub failure: Option<AdapterError>,
}

pub struct OperationContext {
    pub id: OperationId,
    transactional: bool,
    connections: Mutex<HashMap<String, ConnectionScope>>,
    pub memo: ReadMemo,
    pub ledger: Option<Mutex<MutationLedger>>,
    /// `None` when events are suppressed for this call.
    events: Option<EventBus>,
}

impl OperationContext {
    pub fn new(
        adapters: &AdapterRegistry,
        inherited: &[TransactionHandle],
        transactional: bool,
        rollback: bool,
        events: Option<EventBus>,
    ) -> Result<Self, AdapterError> {
        let mut connections = HashMap::new();
        for handle in inherited {
            let adapter = adapters.get(&handle.connection)?;
            connections.insert(
                handle.connection.clone(),
                ConnectionScope {
                    adapter,
                    transaction: handle.id,
                    inherited: true,
                },
            );
        }
        Ok(Self {
            id: OperationId::new(),
            transactional,
            connections: Mutex::new(connections),
            memo: ReadMemo::new(),
            ledger: rollback.then(|| Mutex::new(MutationLedger::new())),
            events,
        })
    }

    /// The transaction calls on `connection` must run in, opening one on
    /// first use when the operation is transactional. An inherited or already
    /// open transaction is always reused; scopes never nest.
    pub async fn transaction(
        &self,
        connection: &str,
        adapter: &Arc<dyn Adapter>,
    ) -> Result<Option<TransactionId>, AdapterError> {
        let mut connections = self.connections.lock().await;
        if let Some(scope) = connections.get(connection) {
            return Ok(Some(scope.transaction));
        }
        if !self.transactional {
            return Ok(None);
        }
        let transaction = adapter
            .begin_transaction()
            .await
            .map_err(|e| AdapterError::transaction(connection, "begin", e))?;
        log::debug!("[{}] Began transaction {:?} on '{}'", self.id, transaction, connection);
        connections.insert(
            connection.to_string(),
            ConnectionScope {
                adapter: adapter.clone(),
                transaction,
                inherited: false,
            },
        );
        Ok(Some(transaction))
    }

    /// Transactions held by the caller, by connection.
    pub async fn inherited_transactions(&self) -> HashMap<String, TransactionId> {
        self.connections
            .lock()
            .await
            .iter()
            .filter(|(_, scope)| scope.inherited)
            .map(|(connection, scope)| (connection.clone(), scope.transaction))
            .collect()
    }

    /// Commit (on success) or abort every transaction this operation opened.
    /// Inherited transactions are left to their owner.
    pub async fn close_scopes(&self, success: bool) -> ScopeOutcome {
        let mut outcome = ScopeOutcome::default();
        let mut connections = self.connections.lock().await;
        let owned: Vec<String> = connections
            .iter()
            .filter(|(_, scope)| !scope.inherited)
            .map(|(connection, _)| connection.clone())
            .collect();

        for connection in owned {
            let Some(scope) = connections.remove(&connection) else {
                continue;
            };
            let (action, result) = if success {
                ("commit", scope.adapter.commit_transaction(scope.transaction).await)
            } else {
                ("abort", scope.adapter.abort_transaction(scope.transaction).await)
            };
            match result {
                Ok(()) => {
                    log::debug!("[{}] {} transaction on '{}'", self.id, action, connection);
                    if !success {
                        outcome.aborted.push(connection);
                    }
                }
                Err(e) => {
                    log::error!(
                        "[{}] Could not {} transaction on '{}': {}",
                        self.id,
                        action,
                        connection,
                        e
                    );
                    if outcome.failure.is_none() {
                        outcome.failure = Some(AdapterError::transaction(connection, action, e));
                    }
                }
            }
        }
        outcome
    }

    pub fn emit(&self, entity: &EntityDescriptor, kind: MutationKind, records: Vec<Record>) {
        if let Some(events) = &self.events {
            events.publish(MutationEvent {
                operation_id: self.id,
                connection: entity.connection.clone(),
                model: entity.name.clone(),
                kind,
                records,
            });
        }
    }

    pub fn records_mutations(&self) -> bool {
        self.ledger.is_some()
    }
}
