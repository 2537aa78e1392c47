//! Result records
//!
//! A [`ResultRecord`] is the flat row one adapter call produced, plus an
//! explicit overlay of relation fields filled in by the merge step. Keeping the
//! overlay separate means a relation never shadows a stored column.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Flat row as exchanged with adapters.
pub type Record = Map<String, Value>;

/// Parse a JSON object or array of objects into records.
pub fn records_from_json(value: Value) -> Result<Vec<Record>, serde_json::Error> {
    match value {
        Value::Array(_) => serde_json::from_value(value),
        other => Ok(vec![serde_json::from_value(other)?]),
    }
}

/// Value of a relation field on a merged record.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationValue {
    /// Forward or unique relation: zero or one related record.
    One(Option<Box<ResultRecord>>),
    /// Non-unique reverse relation.
    Many(Vec<ResultRecord>),
}

impl RelationValue {
    pub fn to_json(&self) -> Value {
        match self {
            RelationValue::One(Some(record)) => record.to_json(),
            RelationValue::One(None) => Value::Null,
            RelationValue::Many(records) => {
                Value::Array(records.iter().map(ResultRecord::to_json).collect())
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RelationValue::One(r) => usize::from(r.is_some()),
            RelationValue::Many(rs) => rs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultRecord {
    pub fields: Record,
    pub relations: BTreeMap<String, RelationValue>,
}

impl ResultRecord {
    pub fn new(fields: Record) -> Self {
        Self {
            fields,
            relations: BTreeMap::new(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationValue> {
        self.relations.get(name)
    }

    /// The related record of a single-valued relation.
    pub fn one(&self, name: &str) -> Option<&ResultRecord> {
        match self.relations.get(name) {
            Some(RelationValue::One(Some(record))) => Some(record),
            _ => None,
        }
    }

    /// The related records of a list-valued relation (empty if absent).
    pub fn many(&self, name: &str) -> &[ResultRecord] {
        match self.relations.get(name) {
            Some(RelationValue::Many(records)) => records,
            _ => &[],
        }
    }

    /// Nested JSON with relation fields inlined next to stored fields.
    pub fn to_json(&self) -> Value {
        let mut out = self.fields.clone();
        for (name, relation) in &self.relations {
            out.insert(name.clone(), relation.to_json());
        }
        Value::Object(out)
    }
}

impl From<Record> for ResultRecord {
    fn from(fields: Record) -> Self {
        Self::new(fields)
    }
}

impl Serialize for ResultRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}
