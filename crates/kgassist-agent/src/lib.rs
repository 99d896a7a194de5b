//! KG Assist agent: answers natural-language questions from the process graph
//! through a hosted, tool-calling conversation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           ONE USER TURN                              │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                                                                      │
//! │  user text ──► Agent::respond ──► ConversationSession                │
//! │                                      │ append message, start run     │
//! │                                      ▼                               │
//! │                                 poll run status ◄──────────────┐     │
//! │                                      │                         │     │
//! │                  requires_action ────┤                         │     │
//! │                         ▼            │ completed               │     │
//! │                  ToolDispatcher      ▼                         │     │
//! │                  query_knowledgegraph   latest assistant reply │     │
//! │                    │  isolated sub-conversation → query text   │     │
//! │                    │  QueryExecutor → rows                     │     │
//! │                    └─► submit tool outputs (whole batch) ──────┘     │
//! │                                                                      │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The agent keeps no conversation history of its own. The only state that
//! crosses turns is the opaque conversation identifier handed back in
//! [`AgentResponse`].

pub mod agent;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod service;
pub mod session;
pub mod tools;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

use kgassist_graph::Row;
use serde::{Deserialize, Serialize};

pub use agent::{Agent, ConversationRegistry};
pub use config::{AssistantConfig, ConfigError, PollConfig};
pub use error::{AgentError, AssistantError};
pub use pipeline::QueryPipeline;
pub use service::{
    verify_assistant, AssistantInfo, AssistantsClient, ReasoningService, Run, RunStatus,
    ThreadMessage, ToolCall, ToolOutput,
};
pub use session::ConversationSession;
pub use tools::{normalize_query_candidate, Capability, ToolDispatcher, TurnTools};

/// Shown to the user whenever a turn cannot be completed.
pub const FALLBACK_MESSAGE: &str =
    "I'm sorry, I encountered an issue processing your request. Please try again.";

// ============================================================================
// Core Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// A query that ran during a turn, with what it returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedQuery {
    pub query: String,
    pub results: Vec<Row>,
    /// Set when the graph store rejected or could not run the query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Everything a chat surface needs to render one assistant turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub message: String,
    /// `None` only when no conversation existed before the turn and creating one failed.
    pub conversation_id: Option<String>,
    pub executed_queries: Vec<ExecutedQuery>,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Tool calls that could not be served (e.g. unknown capabilities). The
    /// run still received a descriptive output for each.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_errors: Vec<String>,
}

impl AgentResponse {
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}
