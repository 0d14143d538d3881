//! Statement Executor Trait - contract for the remote data service
//!
//! The healing loop only sees opaque error text from the executor; the
//! classifier decides what that text means.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Records returned by one statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    pub records: Vec<serde_json::Value>,

    /// Total matching rows reported by the service (may exceed `records.len()`).
    pub total_count: u64,
}

impl RowSet {
    pub fn new(records: Vec<serde_json::Value>, total_count: u64) -> Self {
        Self {
            records,
            total_count,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// String values of `field` in record order, skipping records without it.
    pub fn identifiers(&self, field: &str, cap: usize) -> Vec<String> {
        self.records
            .iter()
            .filter_map(|record| record.get(field))
            .filter_map(|value| value.as_str())
            .take(cap)
            .map(|s| s.to_string())
            .collect()
    }
}

/// Failure reported by the remote service, kept as the service's own text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExecutionError {
    pub message: String,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait StatementExecutor: Send + Sync {
    /// Executor name used in logs.
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn execute(&self, statement: &str) -> std::result::Result<RowSet, ExecutionError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identifiers_skip_missing_and_respect_cap() {
        let rows = RowSet::new(
            vec![
                json!({"Id": "001A", "Name": "Acme"}),
                json!({"Name": "No id"}),
                json!({"Id": "001B"}),
                json!({"Id": "001C"}),
            ],
            4,
        );
        assert_eq!(rows.identifiers("Id", 2), vec!["001A", "001B"]);
        assert_eq!(rows.len(), 4);
    }
}
