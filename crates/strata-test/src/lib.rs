//! # strata-test
//!
//! Testing utilities for strata. Provides a scripted in-memory
//! [`DatabaseContext`](strata_db::DatabaseContext) that records every
//! statement, builders for in-memory roadmap resources, and assertion helpers
//! over the recorded statements.

pub mod assert_statements;
pub mod recording;
pub mod resources;

pub use assert_statements::{assert_executed, assert_not_executed, assert_statements_in_order};
pub use recording::{RecordedStatement, RecordingContext};
pub use resources::{MemoryResources, PhaseBuilder};
