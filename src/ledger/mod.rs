//! Mutation ledger
//!
//! Journal of every write and delete batch applied during one top-level
//! operation, kept so the operation can be undone if a later step fails.
//!
//! Entries carry an order index. A new index is allocated the first time a
//! (stage, connection, model) triple is recorded, so siblings resolved in the
//! same fan-out stage against the same model share one index while the index
//! sequence as a whole follows execution order. Within one index, entries are
//! further told apart by their serialized search and their origin.
//!
//! ```text
//! empty ──record──▶ recording ──commit──▶ committed
//!                        │
//!                        └──rollback──▶ rolling-back ──(exhausted)──▶ empty
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::query::Record;
use crate::relation_catalog::EntityDescriptor;

pub mod errors;
pub mod rollback;

pub use errors::{LedgerError, RollbackError};
pub use rollback::RolledBackSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LedgerState {
    Empty,
    Recording,
    Committed,
    RollingBack,
}

/// What produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Origin {
    /// A create or update.
    Set,
    /// A delete.
    Remove,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerRow {
    /// `true` for a row that did not exist before, `false` for a pre-update
    /// snapshot or a removed row.
    pub was_created: bool,
    pub record: Record,
}

#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub order: usize,
    pub stage: usize,
    pub entity: Arc<EntityDescriptor>,
    pub search: String,
    pub origin: Origin,
    pub rows: Vec<LedgerRow>,
}

impl LedgerEntry {
    pub fn connection(&self) -> &str {
        &self.entity.connection
    }

    pub fn model(&self) -> &str {
        &self.entity.name
    }
}

#[derive(Debug)]
pub struct MutationLedger {
    state: LedgerState,
    entries: Vec<LedgerEntry>,
    orders: HashMap<(usize, String, String), usize>,
    next_order: usize,
}

impl Default for MutationLedger {
    fn default() -> Self {
        Self {
            state: LedgerState::Empty,
            entries: Vec::new(),
            orders: HashMap::new(),
            next_order: 0,
        }
    }
}

impl MutationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LedgerState {
        self.state
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append `rows` affected at `stage` by one adapter call.
    pub fn record(
        &mut self,
        stage: usize,
        entity: &Arc<EntityDescriptor>,
        search: &str,
        origin: Origin,
        rows: Vec<LedgerRow>,
    ) -> Result<(), LedgerError> {
        match self.state {
            LedgerState::Empty | LedgerState::Recording => {}
            state => {
                return Err(LedgerError::InvalidState {
                    state,
                    action: "record into",
                })
            }
        }
        if rows.is_empty() {
            return Ok(());
        }
        self.state = LedgerState::Recording;

        let slot = (stage, entity.connection.clone(), entity.name.clone());
        let order = match self.orders.get(&slot) {
            Some(order) => *order,
            None => {
                self.next_order += 1;
                self.orders.insert(slot, self.next_order);
                self.next_order
            }
        };

        let existing = self.entries.iter_mut().find(|e| {
            e.order == order && e.model() == entity.name && e.search == search && e.origin == origin
        });
        match existing {
            Some(entry) => entry.rows.extend(rows),
            None => self.entries.push(LedgerEntry {
                order,
                stage,
                entity: entity.clone(),
                search: search.to_string(),
                origin,
                rows,
            }),
        }
        Ok(())
    }

    /// The operation succeeded; forget everything.
    pub fn commit(&mut self) -> Result<(), LedgerError> {
        match self.state {
            LedgerState::Empty | LedgerState::Recording => {
                self.entries.clear();
                self.orders.clear();
                self.state = LedgerState::Committed;
                Ok(())
            }
            state => Err(LedgerError::InvalidState {
                state,
                action: "commit",
            }),
        }
    }

    /// Drop the entries of a connection whose effects were reverted by other
    /// means (an aborted transaction). Returns how many were dropped.
    pub fn discard_connection(&mut self, connection: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.connection() != connection);
        let dropped = before - self.entries.len();
        if self.entries.is_empty() && self.state == LedgerState::Recording {
            self.state = LedgerState::Empty;
        }
        dropped
    }

    /// Indices of the highest-order contiguous run of entries that share one
    /// connection, highest order first.
    fn top_span(&self) -> Option<(String, Vec<usize>)> {
        let mut ordered: Vec<usize> = (0..self.entries.len()).collect();
        ordered.sort_by(|a, b| {
            self.entries[*b]
                .order
                .cmp(&self.entries[*a].order)
                .then(b.cmp(a))
        });
        let first = *ordered.first()?;
        let connection = self.entries[first].connection().to_string();
        let span = ordered
            .into_iter()
            .take_while(|i| self.entries[*i].connection() == connection)
            .collect();
        Some((connection, span))
    }

    fn remove_entries(&mut self, indices: &[usize]) {
        let mut sorted = indices.to_vec();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        for index in sorted {
            self.entries.remove(index);
        }
    }
}
