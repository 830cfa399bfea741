//! Graph Executor Interface
//!
//! Narrow capability trait for the external graph database. The core never
//! owns a driver; it only needs "run this query, give me rows". Concrete
//! implementations (Neo4j bolt, an HTTP gateway, an in-memory fake for
//! tests) live outside this crate.

use async_trait::async_trait;
use serde_json::Value;

/// One result row: column name -> value.
pub type Row = serde_json::Map<String, Value>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum GraphError {
    /// The database could not be reached at all.
    #[error("graph connection error: {0}")]
    Connection(String),
    /// The database rejected or failed this particular query.
    #[error("query execution error: {0}")]
    Query(String),
}

impl GraphError {
    /// Connection errors mean every sibling query will fail too.
    pub fn is_connection(&self) -> bool {
        matches!(self, GraphError::Connection(_))
    }
}

/// Executes structured queries against the property graph.
#[async_trait]
pub trait GraphExecutor: Send + Sync {
    /// Run a query with optional named parameters, returning ordered rows.
    async fn execute(&self, query: &str, params: Option<&Value>) -> Result<Vec<Row>, GraphError>;
}

/// Pull a usable node identity out of a result row, if the query surfaced one.
///
/// Recognizes the conventional column names emitted by introspection and
/// retrieval queries (`id`, `node_id`, `identifier`).
pub fn row_identity(row: &Row) -> Option<String> {
    for key in ["id", "node_id", "identifier"] {
        match row.get(key) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identity_prefers_id_column() {
        let mut row = Row::new();
        row.insert("id".into(), json!(42));
        row.insert("name".into(), json!("Work Order"));
        assert_eq!(row_identity(&row), Some("42".to_string()));
    }

    #[test]
    fn identity_absent_without_known_columns() {
        let mut row = Row::new();
        row.insert("name".into(), json!("Work Order"));
        assert_eq!(row_identity(&row), None);
    }
}
