//! KG Assist graph layer: schema grounding and graph store access.
//!
//! The enterprise-process graph has a fixed shape:
//!
//! ```text
//! (Department)-[:IS_OWNER_OF]->(Process)-[:HAS_STEP]->(Step)
//!                                   (Role)-[:PERFORMS]->(Step)
//!                                 (System)-[:SUPPORTS]->(Step)
//! ```
//!
//! This crate does not interpret that shape. It provides:
//! - [`schema`]: loading the schema description that grounds query generation
//! - [`QueryExecutor`]: the single-call "run this query, give me rows" contract
//! - [`neo4j`]: a Neo4j HTTP implementation of [`QueryExecutor`]
//!
//! Executors never retry and never swallow failures; whether a failed query
//! degrades to "zero rows" is the caller's decision.

pub mod neo4j;
pub mod schema;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

use async_trait::async_trait;
use serde_json::{Map, Value};

pub use neo4j::{Neo4jConfig, Neo4jHttpExecutor};
pub use schema::{
    grounding_text, BuiltinSchemaProvider, FileSchemaProvider, Relationship, Schema,
    SchemaDocument, SchemaProvider, DEFAULT_SCHEMA_PATH, KGASSIST_SCHEMA_PATH_ENV,
    SCHEMA_PLACEHOLDER,
};

/// One result row: column alias → scalar or nested value, in column order.
pub type Row = Map<String, Value>;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Graph store unreachable: {0}")]
    Connection(String),
    #[error("Graph store HTTP error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Query rejected ({code}): {message}")]
    Query { code: String, message: String },
    #[error("Invalid graph store response: {0}")]
    InvalidResponse(String),
    #[error("Schema file unreadable: {0}")]
    Schema(String),
    #[error("Invalid graph store configuration: {0}")]
    Config(String),
}

impl GraphError {
    /// Whether the store itself rejected the query (as opposed to transport trouble).
    pub fn is_query_rejection(&self) -> bool {
        matches!(self, GraphError::Query { .. })
    }
}

// ============================================================================
// Query Executor
// ============================================================================

/// Executes a single query string against the graph store.
///
/// Implementations must not mutate anything outside the store and must
/// report failures as [`GraphError`] instead of panicking.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: &str) -> Result<Vec<Row>, GraphError>;
}

#[async_trait]
impl<T: QueryExecutor + ?Sized> QueryExecutor for std::sync::Arc<T> {
    async fn execute(&self, query: &str) -> Result<Vec<Row>, GraphError> {
        (**self).execute(query).await
    }
}

/// Connectivity check: `RETURN 1 AS test` must come back as a single row with `test = 1`.
pub async fn verify_graph(executor: &dyn QueryExecutor) -> Result<(), GraphError> {
    let rows = executor.execute("RETURN 1 AS test").await?;
    let check = rows.first().and_then(|row| row.get("test")).and_then(Value::as_i64);
    match check {
        Some(1) if rows.len() == 1 => Ok(()),
        _ => Err(GraphError::InvalidResponse(format!(
            "connectivity check returned unexpected rows: {}",
            Value::Array(rows.into_iter().map(Value::Object).collect())
        ))),
    }
}
