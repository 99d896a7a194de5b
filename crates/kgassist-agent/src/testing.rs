//! Scripted reasoning service for tests.
//!
//! Each `start_run` takes the next [`RunScript`] from a queue. Every
//! `retrieve_run` advances that script by one step; once the script runs out
//! its last step repeats. The service enforces the tool-output protocol: a
//! run waiting on outputs rejects polls, and a submission must answer
//! exactly the pending calls.

use crate::{
    AssistantError, MessageRole, ReasoningService, Run, RunStatus, ThreadMessage, ToolCall,
    ToolOutput,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone)]
enum Step {
    Status(RunStatus),
    RequiresAction(Vec<ToolCall>),
    Completes(String),
    Fails(String),
}

/// Sequence of statuses one run reports.
#[derive(Debug, Clone, Default)]
pub struct RunScript {
    steps: Vec<Step>,
}

impl RunScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_progress(mut self) -> Self {
        self.steps.push(Step::Status(RunStatus::InProgress));
        self
    }

    pub fn status(mut self, status: RunStatus) -> Self {
        self.steps.push(Step::Status(status));
        self
    }

    pub fn requires_action(mut self, calls: Vec<ToolCall>) -> Self {
        self.steps.push(Step::RequiresAction(calls));
        self
    }

    /// Complete and leave `reply` as the newest assistant message.
    pub fn completes_with(mut self, reply: &str) -> Self {
        self.steps.push(Step::Completes(reply.to_string()));
        self
    }

    pub fn fails(mut self, detail: &str) -> Self {
        self.steps.push(Step::Fails(detail.to_string()));
        self
    }
}

/// Every call the service received, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    CreateConversation {
        conversation_id: String,
    },
    AppendMessage {
        conversation_id: String,
        role: MessageRole,
        text: String,
    },
    StartRun {
        conversation_id: String,
        run_id: String,
    },
    RetrieveRun {
        conversation_id: String,
        run_id: String,
    },
    SubmitToolOutputs {
        conversation_id: String,
        run_id: String,
        outputs: Vec<ToolOutput>,
    },
    ListMessages {
        conversation_id: String,
    },
}

struct RunState {
    conversation_id: String,
    steps: VecDeque<Step>,
    last: Option<Step>,
    awaiting: Option<Vec<String>>,
    replied: bool,
}

#[derive(Default)]
struct Inner {
    scripts: VecDeque<RunScript>,
    conversations: HashMap<String, Vec<ThreadMessage>>,
    runs: HashMap<String, RunState>,
    calls: Vec<ServiceCall>,
    next_run: usize,
    unavailable: bool,
}

#[derive(Default)]
pub struct ScriptedService {
    inner: Mutex<Inner>,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    /// A service that refuses every call with a network error.
    pub fn unavailable() -> Self {
        let service = Self::default();
        service.inner.lock().unavailable = true;
        service
    }

    /// Queue the script for the next started run.
    pub fn with_run(self, script: RunScript) -> Self {
        self.inner.lock().scripts.push_back(script);
        self
    }

    pub fn push_run(&self, script: RunScript) {
        self.inner.lock().scripts.push_back(script);
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.inner.lock().calls.clone()
    }

    /// Output batches in submission order.
    pub fn submitted_outputs(&self) -> Vec<Vec<ToolOutput>> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                ServiceCall::SubmitToolOutputs { outputs, .. } => Some(outputs.clone()),
                _ => None,
            })
            .collect()
    }

    /// Conversations that received at least one message, first use first.
    pub fn conversations_with_messages(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for call in &self.inner.lock().calls {
            if let ServiceCall::AppendMessage {
                conversation_id, ..
            } = call
            {
                if !seen.contains(conversation_id) {
                    seen.push(conversation_id.clone());
                }
            }
        }
        seen
    }

    /// Messages of one conversation, oldest first.
    pub fn messages(&self, conversation_id: &str) -> Vec<ThreadMessage> {
        self.inner
            .lock()
            .conversations
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl Inner {
    fn check_available(&self) -> Result<(), AssistantError> {
        if self.unavailable {
            return Err(AssistantError::Network("connection refused".to_string()));
        }
        Ok(())
    }

    fn check_conversation(&self, conversation_id: &str) -> Result<(), AssistantError> {
        if self.conversations.contains_key(conversation_id) {
            Ok(())
        } else {
            Err(not_found(&format!("No thread found with id '{conversation_id}'.")))
        }
    }

    fn run_mut(
        &mut self,
        conversation_id: &str,
        run_id: &str,
    ) -> Result<&mut RunState, AssistantError> {
        match self.runs.get_mut(run_id) {
            Some(state) if state.conversation_id == conversation_id => Ok(state),
            _ => Err(not_found(&format!("No run found with id '{run_id}'."))),
        }
    }
}

fn not_found(message: &str) -> AssistantError {
    AssistantError::Api {
        status: 404,
        body: message.to_string(),
    }
}

#[async_trait]
impl ReasoningService for ScriptedService {
    async fn create_conversation(&self) -> Result<String, AssistantError> {
        let mut inner = self.inner.lock();
        inner.check_available()?;
        let conversation_id = format!("thread_{}", uuid::Uuid::new_v4().simple());
        inner
            .conversations
            .insert(conversation_id.clone(), Vec::new());
        inner.calls.push(ServiceCall::CreateConversation {
            conversation_id: conversation_id.clone(),
        });
        Ok(conversation_id)
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        text: &str,
    ) -> Result<(), AssistantError> {
        let mut inner = self.inner.lock();
        inner.check_available()?;
        inner.calls.push(ServiceCall::AppendMessage {
            conversation_id: conversation_id.to_string(),
            role,
            text: text.to_string(),
        });
        inner.check_conversation(conversation_id)?;
        if let Some(messages) = inner.conversations.get_mut(conversation_id) {
            messages.push(ThreadMessage {
                role,
                text: text.to_string(),
            });
        }
        Ok(())
    }

    async fn start_run(&self, conversation_id: &str) -> Result<Run, AssistantError> {
        let mut inner = self.inner.lock();
        inner.check_available()?;
        inner.check_conversation(conversation_id)?;
        inner.next_run += 1;
        let run_id = format!("run_{}", inner.next_run);
        let script = inner.scripts.pop_front().unwrap_or_default();
        inner.runs.insert(
            run_id.clone(),
            RunState {
                conversation_id: conversation_id.to_string(),
                steps: script.steps.into(),
                last: None,
                awaiting: None,
                replied: false,
            },
        );
        inner.calls.push(ServiceCall::StartRun {
            conversation_id: conversation_id.to_string(),
            run_id: run_id.clone(),
        });
        Ok(Run::new(&run_id, RunStatus::Pending))
    }

    async fn retrieve_run(
        &self,
        conversation_id: &str,
        run_id: &str,
    ) -> Result<Run, AssistantError> {
        let mut inner = self.inner.lock();
        inner.check_available()?;
        inner.calls.push(ServiceCall::RetrieveRun {
            conversation_id: conversation_id.to_string(),
            run_id: run_id.to_string(),
        });

        let state = inner.run_mut(conversation_id, run_id)?;
        if state.awaiting.is_some() {
            return Err(AssistantError::InvalidResponse(format!(
                "run {run_id} polled while tool outputs are still pending"
            )));
        }
        let step = match state.steps.pop_front() {
            Some(step) => {
                state.last = Some(step.clone());
                step
            }
            None => state
                .last
                .clone()
                .unwrap_or_else(|| Step::Completes(String::new())),
        };

        let mut run = Run::new(run_id, RunStatus::InProgress);
        let mut reply = None;
        match step {
            Step::Status(status) => run.status = status,
            Step::RequiresAction(calls) => {
                state.awaiting = Some(calls.iter().map(|c| c.id.clone()).collect());
                run.status = RunStatus::RequiresAction;
                run.tool_calls = calls;
            }
            Step::Completes(text) => {
                run.status = RunStatus::Completed;
                if !state.replied && !text.is_empty() {
                    state.replied = true;
                    reply = Some(text);
                }
            }
            Step::Fails(detail) => {
                run.status = RunStatus::Failed;
                run.last_error = Some(detail);
            }
        }

        if let Some(text) = reply {
            if let Some(messages) = inner.conversations.get_mut(conversation_id) {
                messages.push(ThreadMessage {
                    role: MessageRole::Assistant,
                    text,
                });
            }
        }
        Ok(run)
    }

    async fn submit_tool_outputs(
        &self,
        conversation_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<(), AssistantError> {
        let mut inner = self.inner.lock();
        inner.check_available()?;
        inner.calls.push(ServiceCall::SubmitToolOutputs {
            conversation_id: conversation_id.to_string(),
            run_id: run_id.to_string(),
            outputs: outputs.clone(),
        });

        let state = inner.run_mut(conversation_id, run_id)?;
        let Some(pending) = state.awaiting.take() else {
            return Err(AssistantError::Api {
                status: 400,
                body: format!("Run {run_id} is not waiting on tool outputs."),
            });
        };
        let mut submitted: Vec<_> = outputs.iter().map(|o| o.tool_call_id.clone()).collect();
        let mut expected = pending.clone();
        submitted.sort();
        expected.sort();
        if submitted != expected {
            state.awaiting = Some(pending);
            return Err(AssistantError::Api {
                status: 400,
                body: format!(
                    "Expected tool outputs for {expected:?}, received {submitted:?}."
                ),
            });
        }
        Ok(())
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<ThreadMessage>, AssistantError> {
        let mut inner = self.inner.lock();
        inner.check_available()?;
        inner.calls.push(ServiceCall::ListMessages {
            conversation_id: conversation_id.to_string(),
        });
        inner.check_conversation(conversation_id)?;
        Ok(inner
            .conversations
            .get(conversation_id)
            .map(|m| m.iter().rev().cloned().collect())
            .unwrap_or_default())
    }
}
