pub mod engine;
pub mod rest_engine;

pub use engine::{ExecutionError, RowSet, StatementExecutor};
pub use rest_engine::{RestConnection, RestQueryEngine};
