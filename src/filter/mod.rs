pub mod errors;
pub mod eval;
pub mod predicate;

pub use errors::FilterError;
pub use eval::{compare, values_equal};
pub use predicate::{Condition, Filter};
