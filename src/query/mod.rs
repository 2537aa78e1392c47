pub mod node;
pub mod record;

pub use node::{NodeFilter, NodeId, Operation, OrderBy, QueryNode, SortDirection};
pub use record::{records_from_json, Record, RelationValue, ResultRecord};
