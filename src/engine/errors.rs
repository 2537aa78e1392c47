use thiserror::Error;

use crate::adapter::AdapterError;
use crate::ledger::LedgerError;

/// Failures while executing a planned tree.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("`{relation}` produced {keys} key(s) for {rows} payload row(s) of `{model}`; expected 1 or {rows}")]
    SpliceMismatch {
        model: String,
        relation: String,
        keys: usize,
        rows: usize,
    },

    #[error("A `{model}` row returned by the adapter has no value for join field `{field}`")]
    MissingJoinKey { model: String, field: String },

    #[error("Refusing to update `{model}` without any bounding filter")]
    UnboundedUpdate { model: String },

    #[error("Branch cancelled after a sibling failed")]
    Cancelled,
}

impl EngineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }
}
