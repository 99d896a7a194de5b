//! Two-pass degraded mode: generate a query, run it, then ask for a
//! conversational answer from the rows. No tool calls are involved and every
//! step has a local fallback.

use crate::session::ConversationSession;
use crate::tools::{build_query_prompt, normalize_query_candidate};
use crate::{
    AgentError, AgentResponse, ExecutedQuery, PollConfig, ReasoningService, ResponseStatus,
    FALLBACK_MESSAGE,
};
use kgassist_graph::{grounding_text, QueryExecutor, Row, SchemaDocument, SCHEMA_PLACEHOLDER};
use std::sync::Arc;

/// Used when no query can be generated.
pub const FALLBACK_QUERY: &str = "MATCH (d:Department) RETURN d.Name LIMIT 25";

pub struct QueryPipeline {
    service: Arc<dyn ReasoningService>,
    poll: PollConfig,
    grounding: String,
}

impl QueryPipeline {
    pub fn new(service: Arc<dyn ReasoningService>, poll: PollConfig) -> Self {
        Self {
            service,
            poll,
            grounding: SCHEMA_PLACEHOLDER.to_string(),
        }
    }

    pub fn with_schema(mut self, schema: Option<&SchemaDocument>) -> Self {
        self.grounding = grounding_text(schema);
        self
    }

    pub async fn generate_query(&self, question: &str) -> String {
        let prompt = build_query_prompt(question, None, &self.grounding);
        match ConversationSession::ask_isolated(self.service.as_ref(), &self.poll, &prompt).await
        {
            Ok(reply) => {
                let query = normalize_query_candidate(&reply);
                if query.is_empty() {
                    tracing::warn!("empty query generated, using fallback");
                    FALLBACK_QUERY.to_string()
                } else {
                    query
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "query generation failed, using fallback");
                FALLBACK_QUERY.to_string()
            }
        }
    }

    /// Run `query`, treating a store failure as zero rows.
    pub async fn execute(&self, graph: &dyn QueryExecutor, query: &str) -> ExecutedQuery {
        match graph.execute(query).await {
            Ok(results) => ExecutedQuery {
                query: query.to_string(),
                results,
                error: None,
            },
            Err(err) => {
                tracing::warn!(query, error = %err, "query failed, continuing with no rows");
                ExecutedQuery {
                    query: query.to_string(),
                    results: Vec::new(),
                    error: Some(err.to_string()),
                }
            }
        }
    }

    /// Conversational answer from the rows; the fixed apology on failure.
    pub async fn format_response(&self, question: &str, rows: &[Row]) -> String {
        self.try_format_response(question, rows)
            .await
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "answer formatting failed");
                FALLBACK_MESSAGE.to_string()
            })
    }

    async fn try_format_response(&self, question: &str, rows: &[Row]) -> Result<String, AgentError> {
        let results = serde_json::to_string_pretty(rows).unwrap_or_else(|_| "[]".to_string());
        let prompt = format!(
            "User question: {question}\n\nDatabase results: {results}\n\n\
             Answer the question conversationally using only these results. \
             If there are no results, say that no matching data was found."
        );
        ConversationSession::ask_isolated(self.service.as_ref(), &self.poll, &prompt).await
    }

    /// All three steps. Each one degrades locally, so the response is always
    /// a success and never carries a conversation identifier.
    pub async fn answer(&self, question: &str, graph: &dyn QueryExecutor) -> AgentResponse {
        let query = self.generate_query(question).await;
        tracing::info!(query = %query, "running generated query");
        let executed = self.execute(graph, &query).await;
        let message = self.format_response(question, &executed.results).await;

        AgentResponse {
            message,
            conversation_id: None,
            executed_queries: vec![executed],
            status: ResponseStatus::Success,
            error: None,
            tool_errors: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RunScript, ScriptedService, ServiceCall};
    use crate::MessageRole;
    use kgassist_graph::testing::ScriptedExecutor;
    use kgassist_graph::GraphError;
    use serde_json::json;
    use std::time::Duration;

    fn pipeline(service: Arc<ScriptedService>) -> QueryPipeline {
        QueryPipeline::new(
            service,
            PollConfig::default()
                .with_interval(Duration::from_millis(2))
                .with_timeout(Duration::from_millis(60)),
        )
    }

    #[tokio::test]
    async fn answers_from_generated_query() {
        let service = Arc::new(
            ScriptedService::new()
                .with_run(RunScript::new().completes_with("```cypher\nMATCH (s:System) RETURN s.Name\n```"))
                .with_run(RunScript::new().completes_with("The systems are SAP and Jira.")),
        );
        let executor = ScriptedExecutor::new()
            .with_rows(vec![json!({"s.Name": "SAP"}), json!({"s.Name": "Jira"})]);

        let response = pipeline(service.clone())
            .answer("Which systems do we use?", &executor)
            .await;

        assert!(response.is_success());
        assert_eq!(response.message, "The systems are SAP and Jira.");
        assert_eq!(executor.queries(), vec!["MATCH (s:System) RETURN s.Name"]);
        assert_eq!(response.conversation_id, None);

        let prompts: Vec<_> = service
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                ServiceCall::AppendMessage {
                    role: MessageRole::User,
                    text,
                    ..
                } => Some(text),
                _ => None,
            })
            .collect();
        assert!(prompts[0].contains("capitalized"));
        assert!(prompts[1].starts_with("User question: Which systems do we use?"));
        assert!(prompts[1].contains("\"SAP\""));
    }

    #[tokio::test]
    async fn generation_failure_uses_fallback_query() {
        let service =
            Arc::new(ScriptedService::new().with_run(RunScript::new().fails("server_error: down")));
        assert_eq!(
            pipeline(service).generate_query("anything").await,
            FALLBACK_QUERY
        );
    }

    #[tokio::test]
    async fn store_failure_degrades_to_no_rows() {
        let service = Arc::new(ScriptedService::new());
        let executor = ScriptedExecutor::new().with_failure(GraphError::Connection("refused".into()));
        let executed = pipeline(service).execute(&executor, FALLBACK_QUERY).await;
        assert!(executed.results.is_empty());
        assert!(executed.error.unwrap().contains("refused"));
    }

    #[tokio::test]
    async fn formatting_failure_returns_apology() {
        let service = Arc::new(ScriptedService::unavailable());
        let message = pipeline(service).format_response("q", &[]).await;
        assert_eq!(message, FALLBACK_MESSAGE);
    }

    #[tokio::test]
    async fn answer_degrades_through_every_step() {
        let service = Arc::new(
            ScriptedService::new()
                .with_run(RunScript::new().fails("server_error: down"))
                .with_run(RunScript::new().fails("server_error: still down")),
        );
        let executor =
            ScriptedExecutor::new().with_failure(GraphError::Connection("refused".into()));

        let response = pipeline(service).answer("Who owns billing?", &executor).await;

        assert!(response.is_success());
        assert_eq!(response.message, FALLBACK_MESSAGE);
        assert_eq!(executor.queries(), vec![FALLBACK_QUERY]);
        assert_eq!(response.executed_queries.len(), 1);
        assert!(response.executed_queries[0].error.is_some());
    }
}
