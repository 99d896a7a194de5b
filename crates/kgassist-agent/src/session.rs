//! Conversation session and the run polling state machine.
//!
//! ```text
//! pending/in_progress --poll--> pending/in_progress
//! pending/in_progress --poll--> requires_action --submit whole batch--> pending/in_progress
//! pending/in_progress --poll--> completed | failed | cancelled | expired
//! ```
//!
//! A run in `requires_action` is never polled again before every pending
//! tool call of its batch has an output submitted.

use crate::{
    AgentError, AssistantError, MessageRole, PollConfig, ReasoningService, Run, RunStatus,
    ToolCall, ToolOutput,
};
use async_trait::async_trait;
use tokio::time::{sleep, Instant};

/// Produces the output for one pending tool call.
///
/// Handlers never fail: problems are reported inside the output text so the
/// run still gets an answer for every call.
#[async_trait]
pub trait ToolCallHandler: Send {
    async fn handle(&mut self, call: &ToolCall) -> String;
}

pub struct ConversationSession<'a> {
    service: &'a dyn ReasoningService,
    poll: &'a PollConfig,
    conversation_id: String,
}

impl<'a> ConversationSession<'a> {
    /// Create a fresh conversation on the service.
    pub async fn create(
        service: &'a dyn ReasoningService,
        poll: &'a PollConfig,
    ) -> Result<Self, AgentError> {
        let conversation_id = service.create_conversation().await?;
        tracing::debug!(conversation_id = %conversation_id, "conversation created");
        Ok(Self {
            service,
            poll,
            conversation_id,
        })
    }

    /// Continue a conversation the service issued earlier.
    pub fn resume(
        service: &'a dyn ReasoningService,
        poll: &'a PollConfig,
        conversation_id: &str,
    ) -> Self {
        Self {
            service,
            poll,
            conversation_id: conversation_id.to_string(),
        }
    }

    pub fn id(&self) -> &str {
        &self.conversation_id
    }

    pub async fn post_user_message(&self, text: &str) -> Result<(), AgentError> {
        self.service
            .append_message(&self.conversation_id, MessageRole::User, text)
            .await?;
        Ok(())
    }

    pub async fn start_run(&self) -> Result<Run, AgentError> {
        let run = self.service.start_run(&self.conversation_id).await?;
        tracing::debug!(
            conversation_id = %self.conversation_id,
            run_id = %run.id,
            status = %run.status,
            "run started"
        );
        Ok(run)
    }

    /// Poll until the run is settled (terminal or `requires_action`).
    ///
    /// One call is one poll cycle and is bounded by `PollConfig::timeout`.
    pub async fn wait_for_run(&self, run_id: &str) -> Result<Run, AgentError> {
        let started = Instant::now();
        // An absurd timeout means "wait indefinitely", not an overflow panic.
        let deadline = started.checked_add(self.poll.timeout);
        loop {
            let run = self
                .service
                .retrieve_run(&self.conversation_id, run_id)
                .await?;
            if run.status.is_settled() {
                return Ok(run);
            }

            let now = Instant::now();
            let remaining = deadline.map(|d| d.saturating_duration_since(now));
            if remaining.is_some_and(|r| r.is_zero()) {
                tracing::warn!(
                    conversation_id = %self.conversation_id,
                    run_id,
                    status = %run.status,
                    "run did not settle in time"
                );
                return Err(AgentError::RunTimeout {
                    run_id: run_id.to_string(),
                    waited: self.poll.timeout,
                });
            }
            let pause = match remaining {
                Some(r) => self.poll.interval.min(r),
                None => self.poll.interval,
            };
            sleep(pause).await;
        }
    }

    /// Drive a started run to `completed`, answering every tool-call batch
    /// through `handler`.
    pub async fn run_to_completion(
        &self,
        started: Run,
        handler: &mut dyn ToolCallHandler,
    ) -> Result<Run, AgentError> {
        let mut run = started;
        let mut cycles = 0usize;

        loop {
            if !run.status.is_settled() {
                run = self.wait_for_run(&run.id).await?;
                continue;
            }

            match run.status {
                RunStatus::Completed => return Ok(run),
                RunStatus::RequiresAction => {
                    cycles += 1;
                    if cycles > self.poll.max_action_cycles {
                        return Err(AgentError::CycleLimit {
                            run_id: run.id,
                            cycles: self.poll.max_action_cycles,
                        });
                    }
                    if run.tool_calls.is_empty() {
                        return Err(AssistantError::InvalidResponse(format!(
                            "run {} requires action but lists no tool calls",
                            run.id
                        ))
                        .into());
                    }

                    let mut outputs = Vec::with_capacity(run.tool_calls.len());
                    for call in &run.tool_calls {
                        tracing::info!(
                            run_id = %run.id,
                            tool = %call.name,
                            call_id = %call.id,
                            "dispatching tool call"
                        );
                        outputs.push(ToolOutput {
                            tool_call_id: call.id.clone(),
                            output: handler.handle(call).await,
                        });
                    }
                    self.service
                        .submit_tool_outputs(&self.conversation_id, &run.id, outputs)
                        .await?;
                    run = self.wait_for_run(&run.id).await?;
                }
                status => {
                    return Err(AgentError::RunFailed {
                        run_id: run.id,
                        status,
                        detail: run
                            .last_error
                            .unwrap_or_else(|| "no failure description".to_string()),
                    })
                }
            }
        }
    }

    /// The most recent assistant message in the conversation.
    pub async fn latest_assistant_message(&self) -> Result<String, AgentError> {
        let messages = self.service.list_messages(&self.conversation_id).await?;
        messages
            .into_iter()
            .find(|m| m.role == MessageRole::Assistant)
            .map(|m| m.text)
            .ok_or_else(|| AssistantError::NoAssistantReply(self.conversation_id.clone()).into())
    }

    /// One prompt in, one reply out, on a brand-new conversation that is
    /// never reused. Tool calls are not expected here; any that arrive are
    /// answered with a refusal.
    pub async fn ask_isolated(
        service: &'a dyn ReasoningService,
        poll: &'a PollConfig,
        prompt: &str,
    ) -> Result<String, AgentError> {
        let session = Self::create(service, poll).await?;
        session.post_user_message(prompt).await?;
        let started = session.start_run().await?;
        session.run_to_completion(started, &mut RejectTools).await?;
        session.latest_assistant_message().await
    }
}

/// Handler for exchanges that must not call tools.
struct RejectTools;

#[async_trait]
impl ToolCallHandler for RejectTools {
    async fn handle(&mut self, call: &ToolCall) -> String {
        tracing::warn!(tool = %call.name, "tool call in a tool-free exchange");
        format!("Tool `{}` is not available in this conversation.", call.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RunScript, ScriptedService, ServiceCall};
    use std::time::Duration;

    fn fast_poll() -> PollConfig {
        PollConfig::default()
            .with_interval(Duration::from_millis(2))
            .with_timeout(Duration::from_millis(60))
    }

    struct Echo(Vec<String>);

    #[async_trait]
    impl ToolCallHandler for Echo {
        async fn handle(&mut self, call: &ToolCall) -> String {
            self.0.push(call.id.clone());
            format!("handled {}", call.id)
        }
    }

    #[tokio::test]
    async fn completes_after_in_progress_polls() {
        let service = ScriptedService::new().with_run(
            RunScript::new()
                .in_progress()
                .in_progress()
                .completes_with("done"),
        );
        let poll = fast_poll();
        let session = ConversationSession::create(&service, &poll).await.unwrap();
        session.post_user_message("hi").await.unwrap();
        let started = session.start_run().await.unwrap();
        let run = session
            .run_to_completion(started, &mut Echo(Vec::new()))
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(session.latest_assistant_message().await.unwrap(), "done");
    }

    #[tokio::test]
    async fn submits_whole_batch_before_polling_again() {
        let service = ScriptedService::new().with_run(
            RunScript::new()
                .requires_action(vec![
                    ToolCall::named("call_a", "query_knowledgegraph"),
                    ToolCall::named("call_b", "query_knowledgegraph"),
                ])
                .completes_with("ok"),
        );
        let poll = fast_poll();
        let session = ConversationSession::create(&service, &poll).await.unwrap();
        let started = session.start_run().await.unwrap();
        let mut handler = Echo(Vec::new());
        session.run_to_completion(started, &mut handler).await.unwrap();

        assert_eq!(handler.0, vec!["call_a", "call_b"]);
        let submitted = service.submitted_outputs();
        assert_eq!(submitted.len(), 1);
        let ids: Vec<_> = submitted[0].iter().map(|o| o.tool_call_id.as_str()).collect();
        assert_eq!(ids, vec!["call_a", "call_b"]);
        assert_eq!(submitted[0][1].output, "handled call_b");
    }

    #[tokio::test]
    async fn times_out_on_stuck_run() {
        let service = ScriptedService::new().with_run(RunScript::new().in_progress());
        let poll = fast_poll();
        let session = ConversationSession::create(&service, &poll).await.unwrap();
        let started = session.start_run().await.unwrap();

        let began = std::time::Instant::now();
        let err = session
            .run_to_completion(started, &mut Echo(Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::RunTimeout { .. }));
        assert!(began.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn failure_carries_service_description() {
        let service =
            ScriptedService::new().with_run(RunScript::new().fails("server_error: boom"));
        let poll = fast_poll();
        let session = ConversationSession::create(&service, &poll).await.unwrap();
        let started = session.start_run().await.unwrap();
        let err = session
            .run_to_completion(started, &mut Echo(Vec::new()))
            .await
            .unwrap_err();

        match err {
            AgentError::RunFailed { status, detail, .. } => {
                assert_eq!(status, RunStatus::Failed);
                assert_eq!(detail, "server_error: boom");
            }
            other => panic!("expected RunFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn every_unsuccessful_terminal_status_fails_the_run() {
        for terminal in [
            RunStatus::Cancelled,
            RunStatus::Expired,
            RunStatus::Incomplete,
        ] {
            let service = ScriptedService::new()
                .with_run(RunScript::new().in_progress().status(terminal));
            let poll = fast_poll();
            let session = ConversationSession::create(&service, &poll).await.unwrap();
            let started = session.start_run().await.unwrap();
            let err = session
                .run_to_completion(started, &mut Echo(Vec::new()))
                .await
                .unwrap_err();

            match err {
                AgentError::RunFailed { status, detail, .. } => {
                    assert_eq!(status, terminal);
                    assert_eq!(detail, "no failure description");
                }
                other => panic!("{terminal}: expected RunFailed, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn huge_timeout_does_not_overflow() {
        let service = ScriptedService::new()
            .with_run(RunScript::new().in_progress().completes_with("done"));
        let poll = fast_poll().with_timeout(Duration::from_secs(u64::MAX));
        let session = ConversationSession::create(&service, &poll).await.unwrap();
        session.post_user_message("hi").await.unwrap();
        let started = session.start_run().await.unwrap();
        let run = session
            .run_to_completion(started, &mut Echo(Vec::new()))
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn caps_requires_action_cycles() {
        let call = ToolCall::named("call_loop", "query_knowledgegraph");
        let service =
            ScriptedService::new().with_run(RunScript::new().requires_action(vec![call]));
        let poll = fast_poll().with_max_action_cycles(3);
        let session = ConversationSession::create(&service, &poll).await.unwrap();
        let started = session.start_run().await.unwrap();
        let mut handler = Echo(Vec::new());
        let err = session
            .run_to_completion(started, &mut handler)
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::CycleLimit { cycles: 3, .. }));
        assert_eq!(handler.0.len(), 3);
        assert_eq!(service.submitted_outputs().len(), 3);
    }

    #[tokio::test]
    async fn isolated_exchange_uses_a_new_conversation() {
        let service = ScriptedService::new()
            .with_run(RunScript::new().completes_with("first"))
            .with_run(RunScript::new().completes_with("second"));
        let poll = fast_poll();

        let a = ConversationSession::ask_isolated(&service, &poll, "p1")
            .await
            .unwrap();
        let b = ConversationSession::ask_isolated(&service, &poll, "p2")
            .await
            .unwrap();
        assert_eq!((a.as_str(), b.as_str()), ("first", "second"));

        let created: Vec<_> = service
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                ServiceCall::CreateConversation { conversation_id } => Some(conversation_id),
                _ => None,
            })
            .collect();
        assert_eq!(created.len(), 2);
        assert_ne!(created[0], created[1]);
    }
}
