//! Integration tests - full engine runs against the in-memory adapter
//!
//! These tests drive `Engine` end to end through a YAML catalog and check the
//! adapter call log, the stored rows and the merged result trees.


mod read_tests;
mod rollback_tests;
mod transaction_tests;
mod write_tests;
