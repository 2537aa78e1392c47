use serde::{Deserialize, Serialize};

/// A foreign key from `owner.owner_field` to `target.target_field`.
///
/// From the owner it is addressed by `relation_name` (forward), from the
/// target by `related_name` (reverse).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    pub owner: String,
    pub owner_field: String,
    pub target: String,
    pub target_field: String,
    pub relation_name: String,
    pub related_name: String,
    /// One-to-one: at most one owner row points at a given target row.
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub allow_null: bool,
}

/// Which side of the foreign key the parent of a join edge is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// The parent owns the foreign key toward the child.
    Forward,
    /// The child owns the foreign key toward the parent.
    Reverse,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Reverse => write!(f, "reverse"),
        }
    }
}

/// A relation seen from one parent model through one edge name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRelation {
    pub descriptor: RelationDescriptor,
    pub direction: Direction,
}

impl ResolvedRelation {
    pub fn parent_model(&self) -> &str {
        match self.direction {
            Direction::Forward => &self.descriptor.owner,
            Direction::Reverse => &self.descriptor.target,
        }
    }

    pub fn child_model(&self) -> &str {
        match self.direction {
            Direction::Forward => &self.descriptor.target,
            Direction::Reverse => &self.descriptor.owner,
        }
    }

    /// Field on the parent rows whose values link to the child.
    pub fn parent_key(&self) -> &str {
        match self.direction {
            Direction::Forward => &self.descriptor.owner_field,
            Direction::Reverse => &self.descriptor.target_field,
        }
    }

    /// Field on the child rows whose values link to the parent.
    pub fn child_key(&self) -> &str {
        match self.direction {
            Direction::Forward => &self.descriptor.target_field,
            Direction::Reverse => &self.descriptor.owner_field,
        }
    }

    /// Whether each parent row relates to at most one child row.
    pub fn is_single(&self) -> bool {
        self.direction == Direction::Forward || self.descriptor.unique
    }

    pub fn is_forward(&self) -> bool {
        self.direction == Direction::Forward
    }
}
