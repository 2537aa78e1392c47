use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FilterError {
    #[error("A filter must be an object mapping field names to conditions, got: {0}")]
    NotAnObject(String),

    #[error("Operator `{operator}` on field `{field}` needs at least {min} operand(s), found {found}")]
    TooFewOperands {
        field: String,
        operator: &'static str,
        min: usize,
        found: usize,
    },

    #[error("Operator `{operator}` on field `{field}` needs exactly {expected} operand(s), found {found}")]
    WrongOperandCount {
        field: String,
        operator: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Operator `{operator}` on field `{field}` has an invalid operand: {reason}")]
    InvalidOperand {
        field: String,
        operator: &'static str,
        reason: String,
    },

    #[error("Condition on field `{field}` mixes operator keys with plain keys: {keys}")]
    MixedOperatorObject { field: String, keys: String },
}
