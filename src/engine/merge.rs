//! Merge utilities
//!
//! Child batches are attached to parent rows through lookup tables keyed by
//! the join value, never by nested iteration over both sides. Key splicing
//! moves generated keys between payloads before a write, and the strip pass
//! removes join-only fields once the whole tree is merged.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use super::errors::EngineError;
use crate::query::{Record, RelationValue, ResultRecord};
use crate::query_planner::{PlannedEdge, PlannedNode};

/// Lookup key of a join value. `null` never joins.
pub fn join_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Distinct non-null values of `field`, in first-seen order.
pub fn key_values<'a, I>(rows: I, field: &str) -> Vec<Value>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut seen = HashSet::new();
    let mut values = Vec::new();
    for row in rows {
        if let Some(value) = row.get(field) {
            if let Some(key) = join_key(value) {
                if seen.insert(key) {
                    values.push(value.clone());
                }
            }
        }
    }
    values
}

/// Attach `children` to every parent row of `edge`.
pub fn merge_edge(parents: &mut [ResultRecord], edge: &PlannedEdge, children: &[ResultRecord]) {
    let mut table: HashMap<String, Vec<&ResultRecord>> = HashMap::new();
    for child in children {
        if let Some(key) = child.get(edge.relation.child_key()).and_then(join_key) {
            table.entry(key).or_default().push(child);
        }
    }

    let parent_key = edge.relation.parent_key();
    let single = edge.relation.is_single();
    for parent in parents.iter_mut() {
        let matches = parent
            .get(parent_key)
            .and_then(join_key)
            .and_then(|key| table.get(&key))
            .map(Vec::as_slice)
            .unwrap_or_default();
        let value = if single {
            RelationValue::One(matches.first().map(|r| Box::new((*r).clone())))
        } else {
            RelationValue::Many(matches.iter().map(|r| (*r).clone()).collect())
        };
        parent.relations.insert(edge.name.clone(), value);
    }
}

/// Write child keys into `field` of every payload row: one key is broadcast,
/// one key per row is zipped, anything else is an error.
pub fn splice_child_keys(
    payload: &mut [Record],
    field: &str,
    keys: &[Value],
    model: &str,
    relation: &str,
) -> Result<(), EngineError> {
    if payload.is_empty() {
        return Ok(());
    }
    match keys.len() {
        1 => {
            for row in payload.iter_mut() {
                row.insert(field.to_string(), keys[0].clone());
            }
        }
        n if n == payload.len() => {
            for (row, key) in payload.iter_mut().zip(keys) {
                row.insert(field.to_string(), key.clone());
            }
        }
        n => {
            return Err(EngineError::SpliceMismatch {
                model: model.to_string(),
                relation: relation.to_string(),
                keys: n,
                rows: payload.len(),
            })
        }
    }
    Ok(())
}

/// One copy of `payload` per parent key, each carrying that key in `field`.
pub fn replicate_for_parents(payload: &[Record], field: &str, parent_keys: &[Value]) -> Vec<Record> {
    parent_keys
        .iter()
        .flat_map(|key| {
            payload.iter().map(move |row| {
                let mut row = row.clone();
                row.insert(field.to_string(), key.clone());
                row
            })
        })
        .collect()
}

/// Keep only `fields` of `record`; an empty list keeps everything.
pub fn project(record: Record, fields: &[String]) -> Record {
    if fields.is_empty() {
        return record;
    }
    record
        .into_iter()
        .filter(|(name, _)| fields.iter().any(|f| f == name))
        .collect()
}

/// Remove the fields `planned` fetched only for joins, through the whole tree.
pub fn strip_transient(rows: &mut [ResultRecord], planned: &PlannedNode) {
    for row in rows.iter_mut() {
        for field in &planned.transient_fields {
            row.fields.remove(field);
        }
        for edge in &planned.edges {
            match row.relations.get_mut(&edge.name) {
                Some(RelationValue::One(Some(child))) => {
                    strip_transient(std::slice::from_mut(child.as_mut()), &edge.child)
                }
                Some(RelationValue::Many(children)) => strip_transient(children, &edge.child),
                _ => {}
            }
        }
    }
}
