//! Remote reasoning service interface.
//!
//! The service owns conversations ("threads") and runs. Identifiers it hands
//! out are opaque: they are stored and passed back, never parsed or built.

mod assistants;

pub use assistants::{verify_assistant, AssistantsClient};

use crate::{AssistantError, MessageRole};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Trait for conversation-oriented reasoning backends
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Create an empty conversation and return its identifier.
    async fn create_conversation(&self) -> Result<String, AssistantError>;

    async fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        text: &str,
    ) -> Result<(), AssistantError>;

    /// Start processing the conversation; returns the run with its initial status.
    async fn start_run(&self, conversation_id: &str) -> Result<Run, AssistantError>;

    async fn retrieve_run(&self, conversation_id: &str, run_id: &str)
        -> Result<Run, AssistantError>;

    /// Resume a `requires_action` run with one output per pending tool call.
    async fn submit_tool_outputs(
        &self,
        conversation_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<(), AssistantError>;

    /// Messages of the conversation, most recent first.
    async fn list_messages(&self, conversation_id: &str)
        -> Result<Vec<ThreadMessage>, AssistantError>;
}

// ============================================================================
// Runs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[serde(alias = "queued")]
    Pending,
    #[serde(alias = "cancelling")]
    InProgress,
    RequiresAction,
    Completed,
    Failed,
    Cancelled,
    Expired,
    Incomplete,
    /// Anything the service adds later; treated as still running.
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed
                | RunStatus::Failed
                | RunStatus::Cancelled
                | RunStatus::Expired
                | RunStatus::Incomplete
        )
    }

    /// No longer worth polling: either terminal or waiting on us.
    pub fn is_settled(self) -> bool {
        self.is_terminal() || self == RunStatus::RequiresAction
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::InProgress => "in_progress",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Expired => "expired",
            RunStatus::Incomplete => "incomplete",
            RunStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one processing pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    /// Pending calls; only populated while `requires_action`.
    pub tool_calls: Vec<ToolCall>,
    /// The service's failure description, if any.
    pub last_error: Option<String>,
}

impl Run {
    pub fn new(id: &str, status: RunStatus) -> Self {
        Self {
            id: id.to_string(),
            status,
            tool_calls: Vec::new(),
            last_error: None,
        }
    }
}

// ============================================================================
// Tool calls
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: HashMap<String, String>,
}

impl ToolCall {
    pub fn new<'a>(
        id: &str,
        name: &str,
        arguments: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn named(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            arguments: HashMap::new(),
        }
    }

    pub fn argument(&self, key: &str) -> Option<&str> {
        self.arguments
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadMessage {
    pub role: MessageRole,
    pub text: String,
}

/// Identity of the hosted assistant runs are started with.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssistantInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_names() {
        let parse = |s: &str| serde_json::from_value::<RunStatus>(serde_json::json!(s)).unwrap();
        assert_eq!(parse("queued"), RunStatus::Pending);
        assert_eq!(parse("in_progress"), RunStatus::InProgress);
        assert_eq!(parse("cancelling"), RunStatus::InProgress);
        assert_eq!(parse("requires_action"), RunStatus::RequiresAction);
        assert_eq!(parse("expired"), RunStatus::Expired);
        assert_eq!(parse("paused_for_reasons"), RunStatus::Unknown);
    }

    #[test]
    fn settled_covers_terminal_and_action() {
        assert!(RunStatus::RequiresAction.is_settled());
        assert!(!RunStatus::RequiresAction.is_terminal());
        for status in [RunStatus::Pending, RunStatus::InProgress, RunStatus::Unknown] {
            assert!(!status.is_settled(), "{status} should keep polling");
        }
        for status in [
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
            RunStatus::Expired,
        ] {
            assert!(status.is_terminal(), "{status} is terminal");
        }
    }

    #[test]
    fn blank_arguments_count_as_absent() {
        let call = ToolCall::new("call_1", "query_knowledgegraph", [("context", "  ")]);
        assert_eq!(call.argument("context"), None);
        assert_eq!(call.argument("user_question"), None);
    }
}
