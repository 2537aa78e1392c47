use thiserror::Error;

use crate::adapter::AdapterError;
use crate::config::ConfigError;
use crate::engine::EngineError;
use crate::ledger::RollbackError;
use crate::query::Operation;
use crate::query_planner::PlanError;
use crate::relation_catalog::CatalogError;

/// Everything a top-level call can fail with.
///
/// Planning and catalog errors happen before any adapter call. A failure
/// during execution is returned as is when nothing needed undoing, as
/// [`Error::Reverted`] when the operation's effects were undone, and as
/// [`Error::RollbackFailed`] when undoing them failed part way.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Engine(EngineError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Expected a {expected} node for `{model}`, got a {found} node")]
    WrongOperation {
        model: String,
        expected: Operation,
        found: Operation,
    },

    #[error("Operation failed and was reverted: {cause}")]
    Reverted { cause: Box<Error> },

    #[error("Operation failed and could not be reverted ({pending} ledger entries left): {cause}; rollback error: {rollback}")]
    RollbackFailed {
        cause: Box<Error>,
        rollback: RollbackError,
        pending: usize,
    },
}

impl From<EngineError> for Error {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Adapter(adapter) => Error::Adapter(adapter),
            other => Error::Engine(other),
        }
    }
}

impl Error {
    pub fn is_reverted(&self) -> bool {
        matches!(self, Error::Reverted { .. })
    }

    pub fn is_rollback_failure(&self) -> bool {
        matches!(self, Error::RollbackFailed { .. })
    }

    /// The failure that started it all, looking through rollback outcomes.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Reverted { cause } | Error::RollbackFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
