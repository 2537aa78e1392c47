//! Execution engine
//!
//! [`Engine`] is the entry point for callers: it plans a query tree against the
//! relation catalog, executes it through the registered adapters and returns
//! the merged result tree. Each call runs in its own operation context; when
//! the call fails, everything it opened is aborted and, if a mutation ledger
//! was requested, every recorded mutation is undone.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::adapter::{AdapterRegistry, TransactionHandle};
use crate::config::{ConfigError, EngineConfig};
use crate::errors::{Error, Result};
use crate::events::{EventBus, MutationEvent};
use crate::query::{Operation, QueryNode, Record, ResultRecord};
use crate::query_planner::{plan_query, QueryPlan};
use crate::relation_catalog::{CatalogConfig, RelationCatalog};

pub mod context;
pub mod errors;
pub mod execute;
pub mod fan_out;
pub mod memo;
pub mod merge;

pub use context::{OperationContext, OperationId};
pub use errors::EngineError;

use execute::{Bound, Executor};
use fan_out::CancelScope;

/// Per-call switches. Unset fields fall back to [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub rollback: Option<bool>,
    pub suppress_events: Option<bool>,
    pub transactional: Option<bool>,
    /// Transactions the caller already holds. They are used for every call on
    /// their connection and never committed or aborted by the engine.
    pub inherited_transactions: Vec<TransactionHandle>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rollback(mut self, enabled: bool) -> Self {
        self.rollback = Some(enabled);
        self
    }

    pub fn suppress_events(mut self, suppress: bool) -> Self {
        self.suppress_events = Some(suppress);
        self
    }

    pub fn transactional(mut self, enabled: bool) -> Self {
        self.transactional = Some(enabled);
        self
    }

    pub fn inherit(mut self, handle: TransactionHandle) -> Self {
        self.inherited_transactions.push(handle);
        self
    }
}

pub struct Engine {
    catalog: Arc<RelationCatalog>,
    adapters: AdapterRegistry,
    config: EngineConfig,
    events: EventBus,
}

impl Engine {
    pub fn new(catalog: RelationCatalog, adapters: AdapterRegistry) -> Self {
        Self::with_config(catalog, adapters, EngineConfig::default())
    }

    pub fn with_config(
        catalog: RelationCatalog,
        adapters: AdapterRegistry,
        config: EngineConfig,
    ) -> Self {
        let events = EventBus::new(config.event_channel_capacity);
        Self {
            catalog: Arc::new(catalog),
            adapters,
            config,
            events,
        }
    }

    /// Build an engine whose catalog is read from `config.catalog_path`.
    pub fn from_config(config: EngineConfig, adapters: AdapterRegistry) -> Result<Self> {
        let path = config
            .catalog_path
            .as_deref()
            .ok_or(ConfigError::MissingCatalogPath)?;
        let catalog = CatalogConfig::from_yaml_file(path)?.to_catalog()?;
        log::info!(
            "Loaded relation catalog from {} ({} entities, {} relations)",
            path,
            catalog.entities().count(),
            catalog.relations().len()
        );
        Ok(Self::with_config(catalog, adapters, config))
    }

    pub fn catalog(&self) -> &RelationCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    /// Receive a [`MutationEvent`] for every write or delete not suppressed.
    pub fn subscribe(&self) -> broadcast::Receiver<MutationEvent> {
        self.events.subscribe()
    }

    /// Plan `node` without executing it.
    pub fn plan(&self, node: impl Into<Arc<QueryNode>>) -> Result<QueryPlan> {
        Ok(plan_query(
            &self.catalog,
            node.into(),
            self.config.max_join_depth,
        )?)
    }

    pub async fn run_read(
        &self,
        node: impl Into<Arc<QueryNode>>,
        options: RunOptions,
    ) -> Result<Vec<ResultRecord>> {
        self.run(node.into(), Operation::Read, options).await
    }

    /// Create or update. A non-empty `payload` replaces the payload of the
    /// root node.
    pub async fn run_write(
        &self,
        payload: Vec<Record>,
        node: impl Into<Arc<QueryNode>>,
        options: RunOptions,
    ) -> Result<Vec<ResultRecord>> {
        let node = node.into();
        let node = if payload.is_empty() {
            node
        } else {
            Arc::new(node.payload(payload))
        };
        self.run(node, Operation::Write, options).await
    }

    /// Returns the removed rows as they were before removal.
    pub async fn run_delete(
        &self,
        node: impl Into<Arc<QueryNode>>,
        options: RunOptions,
    ) -> Result<Vec<ResultRecord>> {
        self.run(node.into(), Operation::Delete, options).await
    }

    async fn run(
        &self,
        node: Arc<QueryNode>,
        expected: Operation,
        options: RunOptions,
    ) -> Result<Vec<ResultRecord>> {
        if node.operation() != expected {
            return Err(Error::WrongOperation {
                model: node.model().to_string(),
                expected,
                found: node.operation(),
            });
        }
        let plan = self.plan(node)?;

        let rollback = expected != Operation::Read
            && options.rollback.unwrap_or(self.config.rollback_by_default);
        let suppress = options
            .suppress_events
            .unwrap_or(self.config.suppress_events_by_default);
        let transactional = options
            .transactional
            .unwrap_or(self.config.transactional_by_default);
        let ctx = OperationContext::new(
            &self.adapters,
            &options.inherited_transactions,
            transactional,
            rollback,
            (!suppress).then(|| self.events.clone()),
        )?;

        log::info!(
            "[{}] {} {} started (rollback={}, transactional={})",
            ctx.id,
            expected,
            plan.root.model(),
            rollback,
            transactional
        );
        log::debug!("[{}] plan:\n{}", ctx.id, plan);

        let executor = Executor {
            adapters: &self.adapters,
            ctx: &ctx,
        };
        let outcome = executor
            .execute(&plan.root, Bound::Unbounded, CancelScope::root())
            .await;

        let mut rows = match outcome {
            Ok(rows) => rows,
            Err(err) => return Err(self.recover(&ctx, err).await),
        };

        let scopes = ctx.close_scopes(true).await;
        if let Some(failure) = scopes.failure {
            return Err(self.recover(&ctx, failure.into()).await);
        }
        if let Some(ledger) = &ctx.ledger {
            ledger.lock().await.commit().map_err(EngineError::from)?;
        }

        if self.config.strip_transient_fields {
            merge::strip_transient(&mut rows, &plan.root);
        }
        log::info!(
            "[{}] {} {} finished with {} row(s), {} memoized read(s)",
            ctx.id,
            expected,
            plan.root.model(),
            rows.len(),
            ctx.memo.hits()
        );
        Ok(rows)
    }

    /// Undo what a failed operation did and describe how far that got.
    async fn recover(&self, ctx: &OperationContext, cause: EngineError) -> Error {
        log::warn!("[{}] Operation failed: {}", ctx.id, cause);
        let scopes = ctx.close_scopes(false).await;
        let inherited = ctx.inherited_transactions().await;
        let cause = Box::new(Error::from(cause));

        let Some(ledger) = &ctx.ledger else {
            // Without a ledger only transactions we opened and aborted undo anything.
            return if !scopes.aborted.is_empty() && inherited.is_empty() && scopes.failure.is_none()
            {
                Error::Reverted { cause }
            } else {
                *cause
            };
        };

        let mut ledger = ledger.lock().await;
        if let Some(failure) = scopes.failure {
            return Error::RollbackFailed {
                cause,
                rollback: crate::ledger::RollbackError::Transaction {
                    connection: failure.connection().to_string(),
                    source: failure,
                },
                pending: ledger.len(),
            };
        }
        for connection in &scopes.aborted {
            let dropped = ledger.discard_connection(connection);
            log::debug!(
                "[{}] {} ledger entr(y/ies) on '{}' reverted by transaction abort",
                ctx.id,
                dropped,
                connection
            );
        }

        match ledger.rollback_all(&self.adapters, &inherited).await {
            Ok(spans) => {
                log::info!(
                    "[{}] Rolled back {} span(s), {} row(s)",
                    ctx.id,
                    spans.len(),
                    spans.iter().map(|s| s.rows).sum::<usize>()
                );
                Error::Reverted { cause }
            }
            Err(rollback) => {
                log::error!(
                    "[{}] Rollback failed, {} ledger entr(y/ies) left: {}",
                    ctx.id,
                    ledger.len(),
                    rollback
                );
                Error::RollbackFailed {
                    cause,
                    rollback,
                    pending: ledger.len(),
                }
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("adapters", &self.adapters)
            .field("config", &self.config)
            .finish()
    }
}
