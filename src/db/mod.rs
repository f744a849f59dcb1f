//! Database access layer.
//!
//! - Connection pool construction per datasource
//! - Single-statement execution with normalized outcomes
//! - Row-to-JSON conversion with typed decoding
//! - Bounded-parallel fan-out across datasources

pub mod executor;
pub mod fanout;
pub mod pool;
pub mod row;

pub use executor::QueryOutcome;
pub use fanout::{DefaultRun, FanoutReport};
pub use pool::DbPool;
