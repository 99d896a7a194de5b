//! Hosted-assistants HTTP client (threads, messages, runs).

use super::{AssistantInfo, ReasoningService, Run, RunStatus, ThreadMessage, ToolCall, ToolOutput};
use crate::{AssistantConfig, AssistantError, MessageRole};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

const ASSISTANTS_BETA_HEADER: (&str, &str) = ("OpenAI-Beta", "assistants=v2");

pub struct AssistantsClient {
    client: Client,
    config: AssistantConfig,
}

impl AssistantsClient {
    pub fn new(config: AssistantConfig) -> Result<Self, AssistantError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| AssistantError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn assistant_id(&self) -> &str {
        &self.config.assistant_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.config.api_key)
            .header(ASSISTANTS_BETA_HEADER.0, ASSISTANTS_BETA_HEADER.1)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, AssistantError> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(|e| AssistantError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AssistantError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T, AssistantError> {
        self.send(builder)
            .await?
            .json()
            .await
            .map_err(|e| AssistantError::InvalidResponse(e.to_string()))
    }

    /// Fetch the configured assistant; used to verify credentials and id.
    pub async fn retrieve_assistant(&self) -> Result<AssistantInfo, AssistantError> {
        let url = self.url(&format!("assistants/{}", self.config.assistant_id));
        self.send_json(self.client.get(url)).await
    }
}

/// Confirm the configured assistant exists and return its display name
/// (the id when it has none).
pub async fn verify_assistant(client: &AssistantsClient) -> Result<String, AssistantError> {
    let info = client.retrieve_assistant().await?;
    Ok(info.name.filter(|n| !n.trim().is_empty()).unwrap_or(info.id))
}

#[async_trait]
impl ReasoningService for AssistantsClient {
    async fn create_conversation(&self) -> Result<String, AssistantError> {
        let thread: IdOnly = self
            .send_json(self.client.post(self.url("threads")).json(&json!({})))
            .await?;
        tracing::debug!(thread_id = %thread.id, "thread created");
        Ok(thread.id)
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        text: &str,
    ) -> Result<(), AssistantError> {
        let url = self.url(&format!("threads/{conversation_id}/messages"));
        let body = json!({ "role": role.as_str(), "content": text });
        self.send(self.client.post(url).json(&body)).await?;
        Ok(())
    }

    async fn start_run(&self, conversation_id: &str) -> Result<Run, AssistantError> {
        let url = self.url(&format!("threads/{conversation_id}/runs"));
        let body = json!({ "assistant_id": self.config.assistant_id });
        let run: RunObject = self.send_json(self.client.post(url).json(&body)).await?;
        Ok(run.into_run())
    }

    async fn retrieve_run(
        &self,
        conversation_id: &str,
        run_id: &str,
    ) -> Result<Run, AssistantError> {
        let url = self.url(&format!("threads/{conversation_id}/runs/{run_id}"));
        let run: RunObject = self.send_json(self.client.get(url)).await?;
        Ok(run.into_run())
    }

    async fn submit_tool_outputs(
        &self,
        conversation_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<(), AssistantError> {
        let url = self.url(&format!(
            "threads/{conversation_id}/runs/{run_id}/submit_tool_outputs"
        ));
        let body = json!({ "tool_outputs": outputs });
        self.send(self.client.post(url).json(&body)).await?;
        Ok(())
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<ThreadMessage>, AssistantError> {
        let url = self.url(&format!("threads/{conversation_id}/messages"));
        let page: MessagePage = self
            .send_json(self.client.get(url).query(&[("order", "desc")]))
            .await?;
        Ok(page.into_messages())
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RunObject {
    id: String,
    status: RunStatus,
    #[serde(default)]
    required_action: Option<RequiredAction>,
    #[serde(default)]
    last_error: Option<RunError>,
    #[serde(default)]
    incomplete_details: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RequiredAction {
    #[serde(default)]
    submit_tool_outputs: Option<SubmitToolOutputs>,
}

#[derive(Debug, Deserialize)]
struct SubmitToolOutputs {
    #[serde(default)]
    tool_calls: Vec<ToolCallObject>,
}

#[derive(Debug, Deserialize)]
struct ToolCallObject {
    id: String,
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct RunError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl RunObject {
    fn into_run(self) -> Run {
        let tool_calls = self
            .required_action
            .and_then(|a| a.submit_tool_outputs)
            .map(|s| s.tool_calls)
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCall {
                arguments: parse_arguments(&call.id, &call.function.arguments),
                id: call.id,
                name: call.function.name,
            })
            .collect();

        let last_error = match (self.last_error, self.incomplete_details) {
            (Some(err), _) => Some(match (err.code, err.message) {
                (Some(code), Some(message)) => format!("{code}: {message}"),
                (code, message) => message.or(code).unwrap_or_default(),
            }),
            (None, Some(details)) if !details.is_null() => Some(details.to_string()),
            _ => None,
        };

        Run {
            id: self.id,
            status: self.status,
            tool_calls,
            last_error,
        }
    }
}

/// Function arguments arrive as a JSON-encoded object. String values are
/// kept as-is, anything else is rendered back to JSON text.
fn parse_arguments(call_id: &str, raw: &str) -> HashMap<String, String> {
    if raw.trim().is_empty() {
        return HashMap::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map
            .into_iter()
            .map(|(k, v)| match v {
                Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect(),
        Ok(other) => {
            tracing::warn!(call_id, arguments = %other, "tool arguments are not an object");
            HashMap::new()
        }
        Err(err) => {
            tracing::warn!(call_id, error = %err, "tool arguments are not valid JSON");
            HashMap::new()
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessagePage {
    #[serde(default)]
    data: Vec<MessageObject>,
}

#[derive(Debug, Deserialize)]
struct MessageObject {
    role: MessageRole,
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<TextContent>,
}

#[derive(Debug, Deserialize)]
struct TextContent {
    value: String,
}

impl MessagePage {
    fn into_messages(self) -> Vec<ThreadMessage> {
        self.data
            .into_iter()
            .map(|m| ThreadMessage {
                role: m.role,
                text: m
                    .content
                    .into_iter()
                    .filter(|part| part.kind == "text")
                    .filter_map(|part| part.text.map(|t| t.value))
                    .collect::<Vec<_>>()
                    .join("\n"),
            })
            .collect()
    }
}
