//! Neo4j graph store over the HTTP transactional endpoint.
//!
//! Each [`QueryExecutor::execute`] call is one auto-commit transaction
//! (`POST /db/{database}/tx/commit`) carrying a single statement.

use crate::{GraphError, QueryExecutor, Row};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

pub const NEO4J_URI_ENV: &str = "NEO4J_URI";
pub const NEO4J_USERNAME_ENV: &str = "NEO4J_USERNAME";
pub const NEO4J_PASSWORD_ENV: &str = "NEO4J_PASSWORD";
pub const NEO4J_DATABASE_ENV: &str = "NEO4J_DATABASE";

const DEFAULT_DATABASE: &str = "neo4j";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct Neo4jConfig {
    /// `http(s)://…` or a driver URI (`bolt://`, `neo4j://`, `neo4j+s://`, …).
    pub uri: String,
    pub username: String,
    pub password: String,
    pub database: String,
    pub timeout_secs: u64,
}

impl Neo4jConfig {
    pub fn new(uri: &str, username: &str, password: &str) -> Self {
        Self {
            uri: uri.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Load from `NEO4J_URI`, `NEO4J_USERNAME`, `NEO4J_PASSWORD` and optional `NEO4J_DATABASE`.
    pub fn from_env() -> Result<Self, GraphError> {
        let required = |name: &str| -> Result<String, GraphError> {
            match std::env::var(name) {
                Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
                _ => Err(GraphError::Config(format!("{name} is not set"))),
            }
        };

        let mut config = Self::new(
            &required(NEO4J_URI_ENV)?,
            &required(NEO4J_USERNAME_ENV)?,
            &required(NEO4J_PASSWORD_ENV)?,
        );
        if let Ok(db) = std::env::var(NEO4J_DATABASE_ENV) {
            if !db.trim().is_empty() {
                config.database = db.trim().to_string();
            }
        }
        Ok(config)
    }

    /// Base URL of the HTTP API. Driver schemes map to the default HTTP(S)
    /// ports of the same host.
    pub fn http_base_url(&self) -> Result<String, GraphError> {
        let uri = self.uri.trim().trim_end_matches('/');
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| GraphError::Config(format!("{NEO4J_URI_ENV}={uri:?} has no scheme")))?;

        let (http_scheme, port) = match scheme.to_ascii_lowercase().as_str() {
            "http" | "https" => return Ok(uri.to_string()),
            "bolt" | "neo4j" => ("http", 7474),
            "bolt+s" | "bolt+ssc" | "neo4j+s" | "neo4j+ssc" => ("https", 7473),
            other => {
                return Err(GraphError::Config(format!(
                    "unsupported {NEO4J_URI_ENV} scheme `{other}`"
                )))
            }
        };

        let authority = rest.split('/').next().unwrap_or(rest);
        let host = match authority.rsplit_once(':') {
            Some((host, maybe_port)) if maybe_port.chars().all(|c| c.is_ascii_digit()) => host,
            _ => authority,
        };
        if host.is_empty() {
            return Err(GraphError::Config(format!("{NEO4J_URI_ENV}={uri:?} has no host")));
        }
        Ok(format!("{http_scheme}://{host}:{port}"))
    }
}

// ============================================================================
// Executor
// ============================================================================

pub struct Neo4jHttpExecutor {
    client: Client,
    config: Neo4jConfig,
    commit_url: String,
}

impl Neo4jHttpExecutor {
    pub fn new(config: Neo4jConfig) -> Result<Self, GraphError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GraphError::Config(format!("failed to create HTTP client: {e}")))?;
        let commit_url = format!("{}/db/{}/tx/commit", config.http_base_url()?, config.database);
        Ok(Self {
            client,
            config,
            commit_url,
        })
    }

    pub fn from_env() -> Result<Self, GraphError> {
        Self::new(Neo4jConfig::from_env()?)
    }

    pub async fn execute_with_params(
        &self,
        query: &str,
        params: Map<String, Value>,
    ) -> Result<Vec<Row>, GraphError> {
        let body = json!({
            "statements": [{
                "statement": query,
                "parameters": params,
                "resultDataContents": ["row"],
            }]
        });

        let response = self
            .client
            .post(&self.commit_url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| GraphError::Connection(format!("{}: {e}", self.commit_url)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GraphError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let payload: CommitResponse = response
            .json()
            .await
            .map_err(|e| GraphError::InvalidResponse(e.to_string()))?;
        let rows = rows_from_response(payload)?;
        tracing::debug!(rows = rows.len(), "graph query executed");
        Ok(rows)
    }
}

#[async_trait]
impl QueryExecutor for Neo4jHttpExecutor {
    async fn execute(&self, query: &str) -> Result<Vec<Row>, GraphError> {
        self.execute_with_params(query, Map::new()).await
    }
}

// ============================================================================
// Response decoding
// ============================================================================

#[derive(Debug, Deserialize)]
struct CommitResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<StatementError>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<DataRow>,
}

#[derive(Debug, Deserialize)]
struct DataRow {
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct StatementError {
    code: String,
    message: String,
}

fn rows_from_response(payload: CommitResponse) -> Result<Vec<Row>, GraphError> {
    if let Some(err) = payload.errors.into_iter().next() {
        return Err(GraphError::Query {
            code: err.code,
            message: err.message,
        });
    }

    let Some(result) = payload.results.into_iter().next() else {
        return Ok(Vec::new());
    };

    result
        .data
        .into_iter()
        .map(|data| {
            if data.row.len() != result.columns.len() {
                return Err(GraphError::InvalidResponse(format!(
                    "row has {} values for {} columns",
                    data.row.len(),
                    result.columns.len()
                )));
            }
            Ok(result.columns.iter().cloned().zip(data.row).collect())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(v: Value) -> Result<Vec<Row>, GraphError> {
        rows_from_response(serde_json::from_value(v).unwrap())
    }

    #[test]
    fn zips_columns_with_rows_in_order() {
        let rows = decode(json!({
            "results": [{
                "columns": ["d.Name", "processes"],
                "data": [
                    {"row": ["Fleet", ["Onboarding", "Maintenance"]], "meta": [null, null]},
                    {"row": ["Finance", []], "meta": [null, null]}
                ]
            }],
            "errors": []
        }))
        .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["d.Name"], json!("Fleet"));
        assert_eq!(rows[0]["processes"], json!(["Onboarding", "Maintenance"]));
        let keys: Vec<_> = rows[1].keys().cloned().collect();
        assert_eq!(keys, vec!["d.Name".to_string(), "processes".to_string()]);
    }

    #[test]
    fn reports_statement_errors() {
        let err = decode(json!({
            "results": [],
            "errors": [{"code": "Neo.ClientError.Statement.SyntaxError", "message": "Invalid input 'X'"}]
        }))
        .unwrap_err();

        assert!(err.is_query_rejection());
        assert!(err.to_string().contains("SyntaxError"));
    }

    #[test]
    fn empty_results_are_zero_rows() {
        assert!(decode(json!({"results": [], "errors": []})).unwrap().is_empty());
    }

    #[test]
    fn maps_driver_uris_to_http() {
        let cfg = |uri: &str| Neo4jConfig::new(uri, "neo4j", "secret");
        assert_eq!(
            cfg("neo4j+s://abcd.databases.neo4j.io").http_base_url().unwrap(),
            "https://abcd.databases.neo4j.io:7473"
        );
        assert_eq!(
            cfg("bolt://localhost:7687").http_base_url().unwrap(),
            "http://localhost:7474"
        );
        assert_eq!(
            cfg("http://localhost:7474/").http_base_url().unwrap(),
            "http://localhost:7474"
        );
        assert!(cfg("localhost").http_base_url().is_err());
        assert!(cfg("ftp://localhost").http_base_url().is_err());
    }

    #[test]
    fn builds_commit_url_for_database() {
        let mut config = Neo4jConfig::new("bolt://db.internal:7687", "neo4j", "secret");
        config.database = "processes".to_string();
        let executor = Neo4jHttpExecutor::new(config).unwrap();
        assert_eq!(
            executor.commit_url,
            "http://db.internal:7474/db/processes/tx/commit"
        );
    }
}
