#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, OnceLock, PoisonError},
    time::Duration,
};

use anyhow::{Context, Result};
use async_openai::types::chat::ReasoningEffort;

use crate::constants::{CHAT_HISTORY_TURNS, PROMPT_TRUNCATE};

/// Parses the optional reasoning-effort environment value into the OpenAI enum.
/// Unset or unrecognised values leave the field off the request, since not
/// every OpenAI-compatible model accepts it.
fn parse_reasoning_effort(val: Option<String>) -> Option<ReasoningEffort> {
    match val?.trim().to_ascii_lowercase().as_str() {
        "low" => Some(ReasoningEffort::Low),
        "medium" => Some(ReasoningEffort::Medium),
        "high" => Some(ReasoningEffort::High),
        _ => None,
    }
}

/// OpenAI-compatible credentials and optional tuning parameters sourced from
/// the environment.
#[derive(Clone)]
pub struct OpenAiEnv {
    /// Base URL for the OpenAI-compatible API endpoint.
    api_base:         String,
    /// API key used to authenticate requests.
    api_key:          String,
    /// Model identifier for chat completions.
    model:            String,
    /// Optional temperature override, if provided.
    temperature:      Option<f32>,
    /// Optional top-p override, if provided.
    top_p:            Option<f32>,
    /// Reasoning effort hint, if configured.
    reasoning_effort: Option<ReasoningEffort>,
}

impl OpenAiEnv {
    /// Construct an `OpenAiEnv` from environment variables; returns `None` if
    /// any required field is missing.
    fn from_env() -> Option<Self> {
        let api_base = std::env::var("OPENAI_ENDPOINT").ok()?.trim().to_owned();
        let api_key = std::env::var("OPENAI_API_KEY").ok()?.trim().to_owned();
        let model = std::env::var("OPENAI_MODEL").ok()?.trim().to_owned();

        if api_base.is_empty() || api_key.is_empty() || model.is_empty() {
            return None;
        }

        Some(Self {
            api_base,
            api_key,
            model,
            temperature: read_parsed("OPENAI_TEMPERATURE"),
            top_p: read_parsed("OPENAI_TOP_P"),
            reasoning_effort: parse_reasoning_effort(std::env::var("OPENAI_REASONING_EFFORT").ok()),
        })
    }

    /// Builds an environment bundle directly, eg. for tests or embedding.
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_base:         api_base.into(),
            api_key:          api_key.into(),
            model:            model.into(),
            temperature:      None,
            top_p:            None,
            reasoning_effort: None,
        }
    }

    /// Returns the API base URL.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Returns the API key.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Returns the model identifier.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns the configured temperature, if any.
    pub fn temperature(&self) -> Option<f32> {
        self.temperature
    }

    /// Returns the configured top_p, if any.
    pub fn top_p(&self) -> Option<f32> {
        self.top_p
    }

    /// Returns the reasoning effort hint, if any.
    pub fn reasoning_effort(&self) -> Option<ReasoningEffort> {
        self.reasoning_effort.clone()
    }
}

impl std::fmt::Debug for OpenAiEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEnv")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Tunables for prompts, the gateway and the HTTP server.
#[derive(Debug, Clone)]
pub struct TutorSettings {
    /// Language the report and chat answers are written in.
    report_language:    String,
    /// Transcript turns replayed as prior conversation in chat requests.
    chat_history_turns: usize,
    /// Characters of submission text sent before truncating.
    prompt_truncate:    usize,
    /// Per-call timeout for the completion service.
    request_timeout:    Duration,
    /// Retries for transient completion-service failures.
    max_retries:        u32,
    /// Access code required by the HTTP server, if any.
    access_code:        Option<String>,
    /// Address the HTTP server binds to.
    bind_addr:          SocketAddr,
    /// How long an HTTP session may sit unused before it is dropped.
    session_idle:       Duration,
}

impl Default for TutorSettings {
    fn default() -> Self {
        Self {
            report_language:    "Traditional Chinese".to_string(),
            chat_history_turns: CHAT_HISTORY_TURNS,
            prompt_truncate:    PROMPT_TRUNCATE,
            request_timeout:    Duration::from_secs(60),
            max_retries:        2,
            access_code:        None,
            bind_addr:          SocketAddr::from(([127, 0, 0, 1], 8080)),
            session_idle:       Duration::from_secs(60 * 60),
        }
    }
}

impl TutorSettings {
    /// Reads every setting from the environment, falling back to defaults.
    fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let bind_addr = match std::env::var("TUTOR_BIND") {
            Ok(value) if !value.trim().is_empty() => value
                .trim()
                .parse()
                .with_context(|| format!("TUTOR_BIND is not a socket address: {value}"))?,
            _ => defaults.bind_addr,
        };

        Ok(Self {
            report_language: std::env::var("TUTOR_REPORT_LANGUAGE")
                .ok()
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
                .unwrap_or(defaults.report_language),
            chat_history_turns: read_parsed("TUTOR_CHAT_HISTORY_TURNS")
                .unwrap_or(defaults.chat_history_turns),
            prompt_truncate: read_parsed("TUTOR_PROMPT_TRUNCATE").unwrap_or(defaults.prompt_truncate),
            request_timeout: read_parsed("TUTOR_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            max_retries: read_parsed("TUTOR_MAX_RETRIES").unwrap_or(defaults.max_retries),
            access_code: std::env::var("TUTOR_ACCESS_CODE")
                .ok()
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty()),
            bind_addr,
            session_idle: read_parsed("TUTOR_SESSION_IDLE_SECS")
                .filter(|secs: &u64| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.session_idle),
        })
    }

    /// Returns the report language.
    pub fn report_language(&self) -> &str {
        &self.report_language
    }

    /// Returns how many transcript turns are replayed in chat requests.
    pub fn chat_history_turns(&self) -> usize {
        self.chat_history_turns
    }

    /// Returns the submission truncation length in characters.
    pub fn prompt_truncate(&self) -> usize {
        self.prompt_truncate
    }

    /// Returns the completion-service timeout.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Returns the retry budget for transient failures.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns the HTTP access code, if one is required.
    pub fn access_code(&self) -> Option<&str> {
        self.access_code.as_deref()
    }

    /// Returns the HTTP bind address.
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Returns how long an unused HTTP session is kept.
    pub fn session_idle(&self) -> Duration {
        self.session_idle
    }

    /// Returns a copy that requires `code` on HTTP requests.
    pub fn with_access_code(mut self, code: impl Into<String>) -> Self {
        self.access_code = Some(code.into());
        self
    }

    /// Returns a copy with a different bind address.
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }
}

/// Runtime configuration shared across the crate.
#[derive(Debug)]
pub struct ConfigState {
    /// Completion-service credentials, if configured.
    openai:   Option<OpenAiEnv>,
    /// Everything else.
    settings: TutorSettings,
}

impl ConfigState {
    /// Construct a new configuration instance from the environment.
    fn new() -> Result<Self> {
        Ok(Self {
            openai:   OpenAiEnv::from_env(),
            settings: TutorSettings::from_env()?,
        })
    }

    /// Returns the completion-service configuration, if all required
    /// environment variables are present.
    pub fn openai(&self) -> Option<&OpenAiEnv> {
        self.openai.as_ref()
    }

    /// Returns the tunables.
    pub fn settings(&self) -> &TutorSettings {
        &self.settings
    }
}

/// Shared configuration handle used throughout the crate.
#[derive(Clone)]
pub struct ConfigHandle(Arc<ConfigState>);

impl std::ops::Deref for ConfigHandle {
    type Target = ConfigState;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Global storage for the lazily constructed configuration state.
static CONFIG_SLOT: OnceLock<Mutex<Option<Arc<ConfigState>>>> = OnceLock::new();

/// Returns the mutex guarding the global configuration slot.
fn slot() -> &'static Mutex<Option<Arc<ConfigState>>> {
    CONFIG_SLOT.get_or_init(|| Mutex::new(None))
}

/// Ensure the global configuration has been initialized and return a handle.
pub fn ensure_initialized() -> Result<ConfigHandle> {
    let mut guard = slot().lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(cfg) = guard.as_ref() {
        return Ok(ConfigHandle(Arc::clone(cfg)));
    }

    let cfg = Arc::new(ConfigState::new()?);
    *guard = Some(Arc::clone(&cfg));
    Ok(ConfigHandle(cfg))
}

/// Returns the configured completion-service environment, or an error naming
/// the missing variables.
pub fn openai_config() -> Result<OpenAiEnv> {
    ensure_initialized()?
        .openai()
        .cloned()
        .context("OPENAI_ENDPOINT, OPENAI_API_KEY and OPENAI_MODEL must be set")
}

/// Returns the configured tunables.
pub fn settings() -> Result<TutorSettings> {
    Ok(ensure_initialized()?.settings().clone())
}

/// Parses an environment variable, returning `None` when it is missing or
/// does not parse.
fn read_parsed<T: std::str::FromStr>(env: &str) -> Option<T> {
    std::env::var(env)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
}
