use thiserror::Error;

use crate::query::Operation;
use crate::relation_catalog::CatalogError;

/// Errors raised while planning, before any adapter call is made.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlanError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Refusing to delete from `{model}` without a filter; use force() to remove every row")]
    MissingFilter { model: String },

    #[error("Update of `{model}` carries {rows} payload rows; an update takes exactly one")]
    MultipleUpdatePayloads { model: String, rows: usize },

    #[error("Cannot join a {child} node `{model}` under `{relation}` in a {root} operation")]
    OperationMismatch {
        relation: String,
        model: String,
        root: Operation,
        child: Operation,
    },

    #[error("A {operation} node for `{model}` cannot carry payload rows")]
    UnexpectedPayload { model: String, operation: Operation },

    #[error("Field `{field}` does not exist on `{model}` (used in {usage})")]
    UnknownField {
        model: String,
        field: String,
        usage: &'static str,
    },

    #[error("Join tree is deeper than the configured maximum of {max}")]
    DepthExceeded { max: usize },

    #[error("`{relation}` on `{model}` is filtered, but the parent row is being created and has no key to narrow")]
    FilteredReverseChildOnCreate { model: String, relation: String },

    #[error("Delete from `{model}` uses limit/offset, but `{model}` has no single-field primary key to remove exactly those rows")]
    WindowedDeleteWithoutKey { model: String },
}
