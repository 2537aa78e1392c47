use thiserror::Error;

use super::LedgerState;
use crate::adapter::AdapterError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Cannot {action} a mutation ledger in state {state:?}")]
    InvalidState {
        state: LedgerState,
        action: &'static str,
    },
}

/// A rollback step failed. The ledger keeps every entry it could not undo.
#[derive(Debug, Clone, Error)]
pub enum RollbackError {
    #[error("Rollback of `{model}` (order {order}) failed: {source}")]
    Adapter {
        order: usize,
        model: String,
        #[source]
        source: AdapterError,
    },

    #[error("Rollback transaction on `{connection}` failed: {source}")]
    Transaction {
        connection: String,
        #[source]
        source: AdapterError,
    },

    #[error("Cannot undo `{model}`: recorded row has no value for key field `{field}`")]
    MissingKey { model: String, field: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
