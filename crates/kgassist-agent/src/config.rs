//! Environment-driven configuration.
//!
//! Precedence is always: env var (when set and non-empty) → default.

use std::time::Duration;

pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const OPENAI_ASSISTANT_ID_ENV: &str = "OPENAI_ASSISTANT_ID";
pub const OPENAI_BASE_URL_ENV: &str = "OPENAI_BASE_URL";
pub const KGASSIST_HTTP_TIMEOUT_SECS_ENV: &str = "KGASSIST_HTTP_TIMEOUT_SECS";
pub const KGASSIST_POLL_INTERVAL_MS_ENV: &str = "KGASSIST_POLL_INTERVAL_MS";
pub const KGASSIST_RUN_TIMEOUT_SECS_ENV: &str = "KGASSIST_RUN_TIMEOUT_SECS";
pub const KGASSIST_MAX_ACTION_CYCLES_ENV: &str = "KGASSIST_MAX_ACTION_CYCLES";

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_RUN_TIMEOUT_SECS: u64 = 60;
// Bounds worst-case latency against a peer that keeps asking for tools.
const DEFAULT_MAX_ACTION_CYCLES: usize = 10;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("invalid {name}={value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_required(name: &'static str) -> Result<String, ConfigError> {
    env_non_empty(name).ok_or(ConfigError::Missing(name))
}

fn env_u64(name: &'static str, default: u64, min: u64) -> Result<u64, ConfigError> {
    let Some(raw) = env_non_empty(name) else {
        return Ok(default);
    };
    let n = raw.parse::<u64>().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.clone(),
        reason: "expected a non-negative integer",
    })?;
    if n < min {
        return Err(ConfigError::Invalid {
            name,
            value: raw,
            reason: "below the allowed minimum",
        });
    }
    Ok(n)
}

// ============================================================================
// Remote reasoning service
// ============================================================================

#[derive(Clone)]
pub struct AssistantConfig {
    pub api_key: String,
    pub assistant_id: String,
    pub base_url: String,
    pub http_timeout_secs: u64,
}

impl std::fmt::Debug for AssistantConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssistantConfig")
            .field("api_key", &"<redacted>")
            .field("assistant_id", &self.assistant_id)
            .field("base_url", &self.base_url)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .finish()
    }
}

impl AssistantConfig {
    pub fn new(api_key: &str, assistant_id: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            assistant_id: assistant_id.to_string(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }

    /// Load from `OPENAI_API_KEY`, `OPENAI_ASSISTANT_ID`, and the optional
    /// `OPENAI_BASE_URL` / `KGASSIST_HTTP_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::new(
            &env_required(OPENAI_API_KEY_ENV)?,
            &env_required(OPENAI_ASSISTANT_ID_ENV)?,
        );
        if let Some(base_url) = env_non_empty(OPENAI_BASE_URL_ENV) {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }
        config.http_timeout_secs =
            env_u64(KGASSIST_HTTP_TIMEOUT_SECS_ENV, DEFAULT_HTTP_TIMEOUT_SECS, 1)?;
        Ok(config)
    }
}

// ============================================================================
// Run polling
// ============================================================================

/// Knobs for the run polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Pause between two status checks.
    pub interval: Duration,
    /// Upper bound on one wait for a run to settle.
    pub timeout: Duration,
    /// Upper bound on `requires_action` round-trips within one run.
    pub max_action_cycles: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            timeout: Duration::from_secs(DEFAULT_RUN_TIMEOUT_SECS),
            max_action_cycles: DEFAULT_MAX_ACTION_CYCLES,
        }
    }
}

impl PollConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            interval: Duration::from_millis(env_u64(
                KGASSIST_POLL_INTERVAL_MS_ENV,
                DEFAULT_POLL_INTERVAL_MS,
                1,
            )?),
            timeout: Duration::from_secs(env_u64(
                KGASSIST_RUN_TIMEOUT_SECS_ENV,
                DEFAULT_RUN_TIMEOUT_SECS,
                1,
            )?),
            max_action_cycles: env_u64(
                KGASSIST_MAX_ACTION_CYCLES_ENV,
                DEFAULT_MAX_ACTION_CYCLES as u64,
                1,
            )? as usize,
        })
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_action_cycles(mut self, cycles: usize) -> Self {
        self.max_action_cycles = cycles.max(1);
        self
    }
}
