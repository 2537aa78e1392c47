use std::sync::Arc;

use thiserror::Error;

use super::AdapterOperation;

/// Failure at the adapter boundary.
///
/// The underlying adapter error is shared (`Arc`) so the same failure can be
/// observed by every merge site waiting on a memoized call.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    #[error("No adapter registered for connection `{0}`")]
    UnknownConnection(String),

    #[error("{operation} of `{model}` on connection `{connection}` failed: {cause}")]
    Failed {
        connection: String,
        model: String,
        operation: AdapterOperation,
        cause: Arc<anyhow::Error>,
    },

    #[error("Could not {action} transaction on connection `{connection}`: {cause}")]
    Transaction {
        connection: String,
        action: &'static str,
        cause: Arc<anyhow::Error>,
    },
}

impl AdapterError {
    pub fn failed(
        connection: impl Into<String>,
        model: impl Into<String>,
        operation: AdapterOperation,
        cause: anyhow::Error,
    ) -> Self {
        AdapterError::Failed {
            connection: connection.into(),
            model: model.into(),
            operation,
            cause: Arc::new(cause),
        }
    }

    pub fn transaction(
        connection: impl Into<String>,
        action: &'static str,
        cause: anyhow::Error,
    ) -> Self {
        AdapterError::Transaction {
            connection: connection.into(),
            action,
            cause: Arc::new(cause),
        }
    }

    pub fn connection(&self) -> &str {
        match self {
            AdapterError::UnknownConnection(connection)
            | AdapterError::Failed { connection, .. }
            | AdapterError::Transaction { connection, .. } => connection,
        }
    }
}
