//! Turn orchestration: one user message in, one [`AgentResponse`] out.

use crate::session::ConversationSession;
use crate::tools::{ToolDispatcher, TurnTools};
use crate::{
    AgentError, AgentResponse, PollConfig, ReasoningService, ResponseStatus, FALLBACK_MESSAGE,
};
use kgassist_graph::{grounding_text, QueryExecutor, SchemaDocument, SCHEMA_PLACEHOLDER};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub struct Agent {
    service: Arc<dyn ReasoningService>,
    poll: PollConfig,
    grounding: String,
    registry: ConversationRegistry,
}

impl Agent {
    /// An agent that grounds query generation on the placeholder text until
    /// a schema is supplied with [`Agent::with_schema`].
    pub fn new(service: Arc<dyn ReasoningService>, poll: PollConfig) -> Self {
        Self {
            service,
            poll,
            grounding: SCHEMA_PLACEHOLDER.to_string(),
            registry: ConversationRegistry::new(),
        }
    }

    pub fn with_schema(mut self, schema: Option<&SchemaDocument>) -> Self {
        self.grounding = grounding_text(schema);
        self
    }

    pub fn grounding(&self) -> &str {
        &self.grounding
    }

    pub fn service(&self) -> &dyn ReasoningService {
        self.service.as_ref()
    }

    pub fn poll(&self) -> &PollConfig {
        &self.poll
    }

    /// Drive one turn to completion.
    ///
    /// Never fails: any error becomes `status = error` with the fallback
    /// message, the detail in `error`, the conversation identifier known so
    /// far and the queries that already ran.
    pub async fn respond(
        &self,
        user_message: &str,
        graph: &dyn QueryExecutor,
        conversation_id: Option<&str>,
    ) -> AgentResponse {
        let dispatcher =
            ToolDispatcher::new(self.service.as_ref(), graph, &self.poll, &self.grounding);
        let mut tools = TurnTools::new(&dispatcher);
        let mut known_id = conversation_id.map(str::to_string);

        let outcome = self
            .drive_turn(user_message, conversation_id, &mut tools, &mut known_id)
            .await;

        let executed_queries = std::mem::take(&mut tools.executed);
        let tool_errors = std::mem::take(&mut tools.tool_errors);
        match outcome {
            Ok(message) => {
                tracing::info!(
                    conversation_id = known_id.as_deref().unwrap_or_default(),
                    queries = executed_queries.len(),
                    "turn completed"
                );
                AgentResponse {
                    message,
                    conversation_id: known_id,
                    executed_queries,
                    status: ResponseStatus::Success,
                    error: None,
                    tool_errors,
                }
            }
            Err(err) => {
                tracing::error!(
                    conversation_id = known_id.as_deref().unwrap_or_default(),
                    error = %err,
                    "turn failed"
                );
                AgentResponse {
                    message: FALLBACK_MESSAGE.to_string(),
                    conversation_id: known_id,
                    executed_queries,
                    status: ResponseStatus::Error,
                    error: Some(err.to_string()),
                    tool_errors,
                }
            }
        }
    }

    /// Like [`Agent::respond`], but waits for any turn already running on
    /// the same conversation identifier.
    pub async fn respond_serialized(
        &self,
        user_message: &str,
        graph: &dyn QueryExecutor,
        conversation_id: Option<&str>,
    ) -> AgentResponse {
        let Some(id) = conversation_id else {
            // A new conversation cannot collide with anyone.
            return self.respond(user_message, graph, None).await;
        };
        let lock = self.registry.lock_for(id);
        let turn = lock.lock().await;
        let response = self.respond(user_message, graph, Some(id)).await;
        drop(turn);
        self.registry.release(id, lock);
        response
    }

    async fn drive_turn(
        &self,
        user_message: &str,
        conversation_id: Option<&str>,
        tools: &mut TurnTools<'_, '_>,
        known_id: &mut Option<String>,
    ) -> Result<String, AgentError> {
        let service = self.service.as_ref();
        let session = match conversation_id {
            Some(id) => ConversationSession::resume(service, &self.poll, id),
            None => ConversationSession::create(service, &self.poll).await?,
        };
        *known_id = Some(session.id().to_string());

        session.post_user_message(user_message).await?;
        let started = session.start_run().await?;
        session.run_to_completion(started, tools).await?;
        session.latest_assistant_message().await
    }
}

/// Per-conversation turn locks.
///
/// The remote run model does not allow two runs on one conversation at a
/// time, so turns sharing an identifier must queue.
#[derive(Default)]
pub struct ConversationRegistry {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, conversation_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(conversation_id.to_string())
            .or_default()
            .clone()
    }

    /// Hand back a lock from [`ConversationRegistry::lock_for`]. The entry is
    /// dropped once no other turn holds or waits on it.
    pub fn release(&self, conversation_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock();
        // One reference in the map, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(conversation_id);
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}
