//! Tool dispatch: maps a tool call from the reasoning service onto a
//! capability handler.
//!
//! Capabilities are a closed enum, so adding one is a compile-checked change
//! (new variant, new `match` arm) rather than a new key in a lookup table.

use crate::session::{ConversationSession, ToolCallHandler};
use crate::{AgentError, ExecutedQuery, PollConfig, ReasoningService, ToolCall};
use async_trait::async_trait;
use kgassist_graph::QueryExecutor;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Prefix of every output that carries no graph data.
pub const NO_DATA: &str = "No data collected";

// ============================================================================
// Capabilities
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Generate one graph query for a question, run it, report the rows.
    QueryKnowledgegraph,
}

impl Capability {
    pub const ALL: &'static [Capability] = &[Capability::QueryKnowledgegraph];

    pub fn name(self) -> &'static str {
        match self {
            Capability::QueryKnowledgegraph => "query_knowledgegraph",
        }
    }

    /// Function declaration to register on the hosted assistant.
    pub fn definition(self) -> Value {
        match self {
            Capability::QueryKnowledgegraph => json!({
                "type": "function",
                "function": {
                    "name": self.name(),
                    "description": "Query the enterprise process knowledge graph (departments, processes, steps, roles, systems) to answer a question with data.",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "user_question": {
                                "type": "string",
                                "description": "The question to answer from the knowledge graph, self-contained."
                            },
                            "context": {
                                "type": "string",
                                "description": "Optional conversation context needed to interpret the question."
                            }
                        },
                        "required": ["user_question"]
                    }
                }
            }),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Capability {
    type Err = AgentError;

    /// Exact, case-sensitive name match.
    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .iter()
            .copied()
            .find(|c| c.name() == name)
            .ok_or_else(|| AgentError::UnknownCapability(name.to_string()))
    }
}

// ============================================================================
// Query generation helpers
// ============================================================================

/// Grounding prompt for a single query-generation exchange.
pub fn build_query_prompt(question: &str, context: Option<&str>, grounding: &str) -> String {
    let mut prompt = format!(
        "Generate a Neo4j Cypher query for the enterprise process knowledge graph that will answer this question: {}",
        question.trim()
    );
    if let Some(context) = context {
        prompt.push_str(&format!("\n\nConversation context: {}", context.trim()));
    }
    prompt.push_str("\n\nGraph schema:\n");
    prompt.push_str(grounding.trim_end());
    prompt.push_str(
        "\n\nBe aware that all nodes, relationships and their properties are capitalized, \
         e.g. it should be Process and not process and Name and not name.",
    );
    prompt.push_str("\n\nDo not limit the number of returned rows: never add a LIMIT clause.");
    prompt.push_str(
        "\n\nProvide ONLY the Cypher query with no other text, explanation, or formatting \
         (no code fences).",
    );
    prompt
}

/// Strip wrappers models add even when asked not to: code fences (with or
/// without a language tag), a single inline-code span, a `cypher:` prefix and
/// trailing semicolons. Backticks inside the query quote identifiers and are
/// kept.
pub fn normalize_query_candidate(text: &str) -> String {
    let mut s = text.trim();

    if let Some(rest) = s.strip_prefix("```") {
        s = match rest.split_once('\n') {
            Some((tag, body)) if tag.trim().chars().all(|c| c.is_ascii_alphanumeric()) => body,
            _ => strip_language_word(rest),
        };
    }
    if let Some(rest) = s.trim_end().strip_suffix("```") {
        s = rest;
    }

    let mut s = strip_inline_code(s.trim());
    for prefix in ["cypher:", "Cypher:", "CYPHER:"] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.trim_start();
        }
    }

    // Trailing ';' out of SQL habit.
    let mut out = s.to_string();
    while out.ends_with(';') {
        out.pop();
        out.truncate(out.trim_end().len());
    }
    out
}

/// `` `MATCH …` `` as one inline-code span; only when no other backtick
/// appears, so `` n.`Step Name` `` survives.
fn strip_inline_code(s: &str) -> &str {
    match s.strip_prefix('`').and_then(|r| r.strip_suffix('`')) {
        Some(inner) if !inner.contains('`') => inner.trim(),
        _ => s,
    }
}

/// ```` ```cypher MATCH … ```` on a single line.
fn strip_language_word(rest: &str) -> &str {
    match rest.split_once(char::is_whitespace) {
        Some((word, body)) if word.eq_ignore_ascii_case("cypher") => body,
        _ => rest,
    }
}

fn render_rows(rows: &[kgassist_graph::Row]) -> String {
    serde_json::to_string(rows).unwrap_or_else(|_| "[]".to_string())
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Routes tool calls to capability handlers for one turn.
pub struct ToolDispatcher<'a> {
    service: &'a dyn ReasoningService,
    executor: &'a dyn QueryExecutor,
    poll: &'a PollConfig,
    grounding: &'a str,
}

impl<'a> ToolDispatcher<'a> {
    pub fn new(
        service: &'a dyn ReasoningService,
        executor: &'a dyn QueryExecutor,
        poll: &'a PollConfig,
        grounding: &'a str,
    ) -> Self {
        Self {
            service,
            executor,
            poll,
            grounding,
        }
    }

    /// Run the capability named `name`.
    ///
    /// Only an unknown name is an error. Every other failure is folded into
    /// the returned output text so the run can carry on.
    pub async fn dispatch(
        &self,
        name: &str,
        args: &HashMap<String, String>,
        executed: &mut Vec<ExecutedQuery>,
    ) -> Result<String, AgentError> {
        let capability: Capability = name.parse()?;
        let output = match capability {
            Capability::QueryKnowledgegraph => self.query_knowledgegraph(args, executed).await,
        };
        Ok(output)
    }

    /// Ask the reasoning service for a single query in an isolated exchange.
    pub async fn generate_query(
        &self,
        question: &str,
        context: Option<&str>,
    ) -> Result<String, AgentError> {
        let prompt = build_query_prompt(question, context, self.grounding);
        let reply = ConversationSession::ask_isolated(self.service, self.poll, &prompt).await?;
        Ok(normalize_query_candidate(&reply))
    }

    async fn query_knowledgegraph(
        &self,
        args: &HashMap<String, String>,
        executed: &mut Vec<ExecutedQuery>,
    ) -> String {
        let arg = |key: &str| {
            args.get(key)
                .map(String::as_str)
                .filter(|v| !v.trim().is_empty())
        };
        let Some(question) = arg("user_question") else {
            return format!("{NO_DATA}: the required argument `user_question` is missing.");
        };

        let query = match self.generate_query(question, arg("context")).await {
            Ok(q) if !q.is_empty() => q,
            Ok(_) => {
                tracing::warn!("query generation returned nothing");
                return format!("{NO_DATA}: no query could be generated for this question.");
            }
            Err(err) => {
                tracing::warn!(error = %err, "query generation failed");
                return format!("{NO_DATA}: no query could be generated ({err}).");
            }
        };
        tracing::info!(query = %query, "generated graph query");

        match self.executor.execute(&query).await {
            Ok(rows) => {
                tracing::info!(rows = rows.len(), "graph query returned");
                let output = format!(
                    "Cypher query executed:\n{query}\n\nResults ({} rows):\n{}",
                    rows.len(),
                    render_rows(&rows)
                );
                executed.push(ExecutedQuery {
                    query,
                    results: rows,
                    error: None,
                });
                output
            }
            Err(err) => {
                tracing::warn!(query = %query, error = %err, "graph query failed");
                let output =
                    format!("Cypher query failed:\n{query}\n\nError: {err}\n\n{NO_DATA}.");
                executed.push(ExecutedQuery {
                    query,
                    results: Vec::new(),
                    error: Some(err.to_string()),
                });
                output
            }
        }
    }
}

/// Per-turn accumulator: answers tool calls through a [`ToolDispatcher`]
/// and keeps what ran.
pub struct TurnTools<'d, 'a> {
    dispatcher: &'d ToolDispatcher<'a>,
    pub executed: Vec<ExecutedQuery>,
    pub tool_errors: Vec<String>,
}

impl<'d, 'a> TurnTools<'d, 'a> {
    pub fn new(dispatcher: &'d ToolDispatcher<'a>) -> Self {
        Self {
            dispatcher,
            executed: Vec::new(),
            tool_errors: Vec::new(),
        }
    }
}

#[async_trait]
impl ToolCallHandler for TurnTools<'_, '_> {
    async fn handle(&mut self, call: &ToolCall) -> String {
        match self
            .dispatcher
            .dispatch(&call.name, &call.arguments, &mut self.executed)
            .await
        {
            Ok(output) => output,
            Err(err) => {
                tracing::warn!(tool = %call.name, call_id = %call.id, error = %err, "tool call not served");
                self.tool_errors.push(err.to_string());
                format!("Error: {err}. Available tools: {}.", available_tools())
            }
        }
    }
}

fn available_tools() -> String {
    Capability::ALL
        .iter()
        .map(|c| c.name())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RunScript, ScriptedService};
    use kgassist_graph::testing::ScriptedExecutor;
    use kgassist_graph::{GraphError, SCHEMA_PLACEHOLDER};
    use serde_json::json;
    use std::time::Duration;

    fn fast_poll() -> PollConfig {
        PollConfig::default()
            .with_interval(Duration::from_millis(2))
            .with_timeout(Duration::from_millis(60))
    }

    fn question(q: &str) -> HashMap<String, String> {
        HashMap::from([("user_question".to_string(), q.to_string())])
    }

    #[test]
    fn capability_lookup_is_exact() {
        assert_eq!(
            "query_knowledgegraph".parse::<Capability>().unwrap(),
            Capability::QueryKnowledgegraph
        );
        assert!(matches!(
            "Query_KnowledgeGraph".parse::<Capability>(),
            Err(AgentError::UnknownCapability(_))
        ));
        assert!(matches!(
            "frobnicate".parse::<Capability>(),
            Err(AgentError::UnknownCapability(name)) if name == "frobnicate"
        ));
    }

    #[test]
    fn definition_requires_user_question() {
        let def = Capability::QueryKnowledgegraph.definition();
        assert_eq!(def["function"]["name"], "query_knowledgegraph");
        assert_eq!(def["function"]["parameters"]["required"], json!(["user_question"]));
        assert!(def["function"]["parameters"]["properties"]["context"].is_object());
    }

    #[test]
    fn prompt_embeds_question_context_and_grounding() {
        let prompt = build_query_prompt(
            "Which roles perform onboarding steps?",
            Some("We talked about the Fleet department."),
            "- (Role)-[:PERFORMS]->(Step)",
        );
        assert!(prompt.contains("Which roles perform onboarding steps?"));
        assert!(prompt.contains("Conversation context: We talked about the Fleet department."));
        assert!(prompt.contains("- (Role)-[:PERFORMS]->(Step)"));
        assert!(prompt.contains("never add a LIMIT clause"));
        assert!(prompt.contains("ONLY the Cypher query"));
    }

    #[test]
    fn prompt_with_placeholder_grounding_still_builds() {
        let prompt = build_query_prompt("List all departments", None, SCHEMA_PLACEHOLDER);
        assert!(prompt.contains(SCHEMA_PLACEHOLDER));
        assert!(!prompt.contains("Conversation context"));
    }

    #[test]
    fn strips_fences_prefixes_and_semicolons() {
        let cases = [
            ("```cypher\nMATCH (d:Department) RETURN d.Name\n```", "MATCH (d:Department) RETURN d.Name"),
            ("```\nMATCH (p:Process) RETURN p.Name;\n```", "MATCH (p:Process) RETURN p.Name"),
            ("```cypher MATCH (r:Role) RETURN r.Name```", "MATCH (r:Role) RETURN r.Name"),
            ("`MATCH (s:System) RETURN s.Name`", "MATCH (s:System) RETURN s.Name"),
            ("cypher: MATCH (n) RETURN n ;;", "MATCH (n) RETURN n"),
            ("  MATCH (n) RETURN count(n)  ", "MATCH (n) RETURN count(n)"),
            ("MATCH (n:Step) RETURN n.`Step Name`", "MATCH (n:Step) RETURN n.`Step Name`"),
            ("`Process`", "Process"),
            (
                "```cypher\nMATCH (n:`Process`) RETURN n.`Name`\n```",
                "MATCH (n:`Process`) RETURN n.`Name`",
            ),
            (
                "```cypher MATCH (n) RETURN n.`Name````",
                "MATCH (n) RETURN n.`Name`",
            ),
            (
                "`MATCH (n:Step) RETURN n.`Step Name``",
                "`MATCH (n:Step) RETURN n.`Step Name``",
            ),
        ];
        for (raw, expected) in cases {
            assert_eq!(normalize_query_candidate(raw), expected, "input: {raw:?}");
        }
    }

    #[test]
    fn keeps_multiline_queries_intact() {
        let raw = "```cypher\nMATCH (d:Department)-[:IS_OWNER_OF]->(p:Process)\nRETURN d.Name, collect(p.Name)\n```";
        assert_eq!(
            normalize_query_candidate(raw),
            "MATCH (d:Department)-[:IS_OWNER_OF]->(p:Process)\nRETURN d.Name, collect(p.Name)"
        );
    }

    #[tokio::test]
    async fn query_capability_records_executed_query() {
        let service = ScriptedService::new().with_run(
            RunScript::new().completes_with("```cypher\nMATCH (d:Department) RETURN d.Name\n```"),
        );
        let executor = ScriptedExecutor::new().with_rows(vec![json!({"d.Name": "Fleet"})]);
        let poll = fast_poll();
        let dispatcher = ToolDispatcher::new(&service, &executor, &poll, "schema");

        let mut executed = Vec::new();
        let output = dispatcher
            .dispatch("query_knowledgegraph", &question("List departments"), &mut executed)
            .await
            .unwrap();

        assert_eq!(executor.queries(), vec!["MATCH (d:Department) RETURN d.Name"]);
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].query, "MATCH (d:Department) RETURN d.Name");
        assert_eq!(executed[0].results[0]["d.Name"], json!("Fleet"));
        assert!(output.contains("MATCH (d:Department) RETURN d.Name"));
        assert!(output.contains(r#"[{"d.Name":"Fleet"}]"#));
    }

    #[tokio::test]
    async fn store_failure_becomes_output_text() {
        let service = ScriptedService::new()
            .with_run(RunScript::new().completes_with("MATCH (x:Nope RETURN x"));
        let executor = ScriptedExecutor::new().with_failure(GraphError::Query {
            code: "Neo.ClientError.Statement.SyntaxError".into(),
            message: "Invalid input".into(),
        });
        let poll = fast_poll();
        let dispatcher = ToolDispatcher::new(&service, &executor, &poll, "schema");

        let mut executed = Vec::new();
        let output = dispatcher
            .dispatch("query_knowledgegraph", &question("Broken?"), &mut executed)
            .await
            .unwrap();

        assert!(output.contains("SyntaxError"));
        assert!(output.contains(NO_DATA));
        assert_eq!(executed.len(), 1);
        assert!(executed[0].results.is_empty());
        assert!(executed[0].error.is_some());
    }

    #[tokio::test]
    async fn generation_failure_records_nothing() {
        let service =
            ScriptedService::new().with_run(RunScript::new().fails("server_error: overloaded"));
        let executor = ScriptedExecutor::new();
        let poll = fast_poll();
        let dispatcher = ToolDispatcher::new(&service, &executor, &poll, "schema");

        let mut executed = Vec::new();
        let output = dispatcher
            .dispatch("query_knowledgegraph", &question("Anything?"), &mut executed)
            .await
            .unwrap();

        assert!(output.starts_with(NO_DATA));
        assert!(executed.is_empty());
        assert!(executor.queries().is_empty());
    }

    #[tokio::test]
    async fn missing_question_is_reported_without_calling_out() {
        let service = ScriptedService::new();
        let executor = ScriptedExecutor::new();
        let poll = fast_poll();
        let dispatcher = ToolDispatcher::new(&service, &executor, &poll, "schema");

        let mut executed = Vec::new();
        let output = dispatcher
            .dispatch("query_knowledgegraph", &HashMap::new(), &mut executed)
            .await
            .unwrap();

        assert!(output.contains("`user_question` is missing"));
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_capability_is_reported_not_ignored() {
        let service = ScriptedService::new();
        let executor = ScriptedExecutor::new();
        let poll = fast_poll();
        let dispatcher = ToolDispatcher::new(&service, &executor, &poll, "schema");

        let err = dispatcher
            .dispatch("frobnicate", &HashMap::new(), &mut Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::UnknownCapability(name) if name == "frobnicate"));

        let mut turn = TurnTools::new(&dispatcher);
        let output = turn.handle(&ToolCall::named("call_x", "frobnicate")).await;
        assert!(output.contains("Unknown capability `frobnicate`"));
        assert!(output.contains("query_knowledgegraph"));
        assert_eq!(turn.tool_errors, vec!["Unknown capability `frobnicate`"]);
    }
}
