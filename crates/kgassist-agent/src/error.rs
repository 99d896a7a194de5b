use crate::RunStatus;
use std::time::Duration;

/// Failures talking to the remote reasoning service.
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Conversation {0} has no assistant reply")]
    NoAssistantReply(String),
}

/// Failures of the turn protocol.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Run {run_id} did not finish within {}s", waited.as_secs_f64())]
    RunTimeout { run_id: String, waited: Duration },
    #[error("Run {run_id} ended as {status}: {detail}")]
    RunFailed {
        run_id: String,
        status: RunStatus,
        detail: String,
    },
    #[error("Unknown capability `{0}`")]
    UnknownCapability(String),
    #[error("Run {run_id} requested tool outputs {cycles} times; giving up")]
    CycleLimit { run_id: String, cycles: usize },
    #[error(transparent)]
    Assistant(#[from] AssistantError),
}
