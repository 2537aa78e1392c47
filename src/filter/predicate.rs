//! Filter predicates
//!
//! Callers describe filters per field, either as a literal (equality) or as
//! an operator object:
//!
//! ```json
//! {
//!   "name": "Acme",
//!   "age": { "between": [18, 65] },
//!   "email": { "not": { "like": "%@spam.test" } },
//!   "id": { "in": [1, 2, 3] }
//! }
//! ```
//!
//! Parsing validates operand cardinality up front so that an impossible
//! query never reaches an adapter.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use super::errors::FilterError;

const OP_EQ: &str = "eq";
const OP_IS: &str = "is";
const OP_OR: &str = "or";
const OP_AND: &str = "and";
const OP_IN: &str = "in";
const OP_GT: &str = "greaterThan";
const OP_GTE: &str = "greaterThanOrEqual";
const OP_LT: &str = "lessThan";
const OP_LTE: &str = "lessThanOrEqual";
const OP_BETWEEN: &str = "between";
const OP_LIKE: &str = "like";
const OP_NOT: &str = "not";

const OPERATORS: [&str; 12] = [
    OP_EQ, OP_IS, OP_OR, OP_AND, OP_IN, OP_GT, OP_GTE, OP_LT, OP_LTE, OP_BETWEEN, OP_LIKE, OP_NOT,
];

/// Minimum member counts for the collection operators.
pub const MIN_AND_OPERANDS: usize = 2;
pub const MIN_OR_OPERANDS: usize = 1;
pub const MIN_IN_VALUES: usize = 1;
pub const BETWEEN_BOUNDS: usize = 2;

/// Condition on a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    /// Identity check, typically against `null` or a boolean.
    Is(Value),
    In(Vec<Value>),
    GreaterThan(Value),
    GreaterThanOrEqual(Value),
    LessThan(Value),
    LessThanOrEqual(Value),
    Between(Value, Value),
    /// SQL-style pattern: `%` matches any run, `_` matches one character.
    Like(String),
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
}

impl Condition {
    pub fn parse(field: &str, raw: &Value) -> Result<Self, FilterError> {
        let Value::Object(map) = raw else {
            return Ok(Condition::Eq(raw.clone()));
        };

        let operator_keys = map.keys().filter(|k| OPERATORS.contains(&k.as_str())).count();
        if operator_keys == 0 {
            // Plain object literal (e.g. a JSON column value).
            return Ok(Condition::Eq(raw.clone()));
        }
        if operator_keys != map.len() {
            return Err(FilterError::MixedOperatorObject {
                field: field.to_string(),
                keys: map.keys().cloned().collect::<Vec<_>>().join(", "),
            });
        }

        let mut parsed = map
            .iter()
            .map(|(op, operand)| Self::parse_operator(field, op, operand))
            .collect::<Result<Vec<_>, _>>()?;

        if parsed.len() == 1 {
            Ok(parsed.remove(0))
        } else {
            // Several operators in one object are conjunctive.
            Ok(Condition::And(parsed))
        }
    }

    fn parse_operator(field: &str, op: &str, operand: &Value) -> Result<Self, FilterError> {
        match op {
            OP_EQ => Ok(Condition::Eq(operand.clone())),
            OP_IS => Ok(Condition::Is(operand.clone())),
            OP_GT => Ok(Condition::GreaterThan(operand.clone())),
            OP_GTE => Ok(Condition::GreaterThanOrEqual(operand.clone())),
            OP_LT => Ok(Condition::LessThan(operand.clone())),
            OP_LTE => Ok(Condition::LessThanOrEqual(operand.clone())),
            OP_NOT => Ok(Condition::Not(Box::new(Self::parse(field, operand)?))),
            OP_LIKE => match operand {
                Value::String(pattern) => Ok(Condition::Like(pattern.clone())),
                other => Err(FilterError::InvalidOperand {
                    field: field.to_string(),
                    operator: OP_LIKE,
                    reason: format!("expected a string pattern, got {}", other),
                }),
            },
            OP_IN => {
                let values = expect_array(field, OP_IN, operand)?;
                Ok(Condition::In(values.to_vec()))
            }
            OP_BETWEEN => {
                let bounds = expect_array(field, OP_BETWEEN, operand)?;
                match bounds {
                    [low, high] => Ok(Condition::Between(low.clone(), high.clone())),
                    _ => Err(FilterError::WrongOperandCount {
                        field: field.to_string(),
                        operator: OP_BETWEEN,
                        expected: BETWEEN_BOUNDS,
                        found: bounds.len(),
                    }),
                }
            }
            OP_AND | OP_OR => {
                let operator = if op == OP_AND { OP_AND } else { OP_OR };
                let members = expect_array(field, operator, operand)?
                    .iter()
                    .map(|member| Self::parse(field, member))
                    .collect::<Result<Vec<_>, _>>()?;
                if operator == OP_AND {
                    Ok(Condition::And(members))
                } else {
                    Ok(Condition::Or(members))
                }
            }
            // Only reachable if OPERATORS and this match drift apart.
            other => Err(FilterError::InvalidOperand {
                field: field.to_string(),
                operator: OP_EQ,
                reason: format!("unsupported operator `{}`", other),
            }),
        }
    }

    /// Check operand cardinalities, recursively.
    pub fn validate(&self, field: &str) -> Result<(), FilterError> {
        match self {
            Condition::In(values) if values.len() < MIN_IN_VALUES => Err(FilterError::TooFewOperands {
                field: field.to_string(),
                operator: OP_IN,
                min: MIN_IN_VALUES,
                found: values.len(),
            }),
            Condition::And(members) => {
                if members.len() < MIN_AND_OPERANDS {
                    return Err(FilterError::TooFewOperands {
                        field: field.to_string(),
                        operator: OP_AND,
                        min: MIN_AND_OPERANDS,
                        found: members.len(),
                    });
                }
                members.iter().try_for_each(|m| m.validate(field))
            }
            Condition::Or(members) => {
                if members.len() < MIN_OR_OPERANDS {
                    return Err(FilterError::TooFewOperands {
                        field: field.to_string(),
                        operator: OP_OR,
                        min: MIN_OR_OPERANDS,
                        found: members.len(),
                    });
                }
                members.iter().try_for_each(|m| m.validate(field))
            }
            Condition::Not(inner) => inner.validate(field),
            _ => Ok(()),
        }
    }

    /// Wire representation, the inverse of [`Condition::parse`].
    pub fn to_json(&self) -> Value {
        fn op(name: &str, operand: Value) -> Value {
            let mut map = Map::new();
            map.insert(name.to_string(), operand);
            Value::Object(map)
        }
        match self {
            Condition::Eq(v) => match v {
                // Objects would be mistaken for operator objects on re-parse.
                Value::Object(_) => op(OP_EQ, v.clone()),
                _ => v.clone(),
            },
            Condition::Is(v) => op(OP_IS, v.clone()),
            Condition::In(vs) => op(OP_IN, Value::Array(vs.clone())),
            Condition::GreaterThan(v) => op(OP_GT, v.clone()),
            Condition::GreaterThanOrEqual(v) => op(OP_GTE, v.clone()),
            Condition::LessThan(v) => op(OP_LT, v.clone()),
            Condition::LessThanOrEqual(v) => op(OP_LTE, v.clone()),
            Condition::Between(lo, hi) => op(OP_BETWEEN, Value::Array(vec![lo.clone(), hi.clone()])),
            Condition::Like(p) => op(OP_LIKE, Value::String(p.clone())),
            Condition::And(ms) => op(OP_AND, Value::Array(ms.iter().map(Condition::to_json).collect())),
            Condition::Or(ms) => op(OP_OR, Value::Array(ms.iter().map(Condition::to_json).collect())),
            Condition::Not(inner) => op(OP_NOT, inner.to_json()),
        }
    }
}

fn expect_array<'a>(
    field: &str,
    operator: &'static str,
    operand: &'a Value,
) -> Result<&'a [Value], FilterError> {
    match operand {
        Value::Array(values) => Ok(values.as_slice()),
        other => Err(FilterError::InvalidOperand {
            field: field.to_string(),
            operator,
            reason: format!("expected an array, got {}", other),
        }),
    }
}

/// A parsed, validated filter: field name to condition, all conjunctive.
///
/// Field order is canonical (sorted) so the serialized form can be used as a
/// stable search key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter {
    conditions: BTreeMap<String, Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the caller wire shape and validate it.
    pub fn from_json(raw: &Value) -> Result<Self, FilterError> {
        let Value::Object(map) = raw else {
            return Err(FilterError::NotAnObject(raw.to_string()));
        };
        let mut filter = Filter::new();
        for (field, condition) in map {
            filter
                .conditions
                .insert(field.clone(), Condition::parse(field, condition)?);
        }
        filter.validate()?;
        Ok(filter)
    }

    /// Single-field equality filter.
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::new().with(field, Condition::Eq(value))
    }

    /// Single-field membership filter.
    pub fn any_of(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new().with(field, Condition::In(values))
    }

    pub fn with(mut self, field: impl Into<String>, condition: Condition) -> Self {
        self.constrain(field.into(), condition);
        self
    }

    /// Add `field in values`, conjoined with any condition already on `field`.
    pub fn and_in(self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.with(field, Condition::In(values))
    }

    fn constrain(&mut self, field: String, condition: Condition) {
        let merged = match self.conditions.remove(&field) {
            None => condition,
            Some(Condition::And(mut members)) => {
                members.push(condition);
                Condition::And(members)
            }
            Some(existing) => Condition::And(vec![existing, condition]),
        };
        self.conditions.insert(field, merged);
    }

    pub fn validate(&self) -> Result<(), FilterError> {
        self.conditions
            .iter()
            .try_for_each(|(field, condition)| condition.validate(field))
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&Condition> {
        self.conditions.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.conditions.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Condition)> {
        self.conditions.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.conditions
                .iter()
                .map(|(field, condition)| (field.clone(), condition.to_json()))
                .collect(),
        )
    }
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}
