//! Retry-with-backoff orchestration around "ask the LLM for JSON".
//!
//! One call owns one [`RetryState`]. Each attempt invokes the LLM, runs the
//! strict parser and the required-key check, and on failure waits
//! `backoff_base * attempt` before the next attempt. JSON mode is requested
//! on the first attempt only. When attempts run out the configured fallback
//! is returned, otherwise an [`LlmJsonError`] carrying the last error.
//!
//! Nothing here writes anywhere: callers get a complete value, the fallback,
//! or the terminal error.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::{DEFAULT_BACKOFF_BASE_SECS, DEFAULT_MAX_RETRIES, DEFAULT_MAX_TOKENS, RetryConfig};
use crate::errors::{AttemptError, LlmError, LlmJsonError, ParseError};
use crate::json_parser::{ParseOutcome, check_required_keys, excerpt, parse_strict_json};
use crate::json_scanner::JsonShape;
use crate::llm_client::{ChatMessage, CompletionRequest, LlmClient};

/// Non-blocking delay used between attempts
#[async_trait]
pub trait Delay: Send + Sync {
    async fn wait(&self, duration: Duration);
}

/// Cooperative delay on the tokio runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDelay;

#[async_trait]
impl Delay for TokioDelay {
    async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Per-call options
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRequestOptions {
    pub shape: JsonShape,
    pub max_retries: u32,
    pub required_keys: Vec<String>,
    pub fallback: Option<Value>,
    pub backoff_base: Duration,
    pub max_tokens: u32,
}

impl Default for JsonRequestOptions {
    fn default() -> Self {
        Self {
            shape: JsonShape::Object,
            max_retries: DEFAULT_MAX_RETRIES,
            required_keys: Vec::new(),
            fallback: None,
            backoff_base: Duration::from_secs(DEFAULT_BACKOFF_BASE_SECS),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl JsonRequestOptions {
    pub fn from_retry_config(retry: &RetryConfig) -> Self {
        Self {
            max_retries: retry.max_retries,
            backoff_base: retry.backoff_base(),
            ..Self::default()
        }
    }

    pub fn shape(mut self, shape: JsonShape) -> Self {
        self.shape = shape;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn required_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn fallback(mut self, fallback: Value) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Run parse-and-validate for one raw response
    pub fn evaluate(&self, raw: &str) -> ParseOutcome {
        let value = parse_strict_json(Some(raw), self.shape)?;
        check_required_keys(&value, &self.required_keys)?;
        Ok(value)
    }
}

/// What the caller receives from a successful orchestration
#[derive(Debug, Clone, PartialEq)]
pub enum JsonOutcome {
    /// A response parsed and validated
    Parsed { value: Value, attempts: u32 },
    /// Every attempt failed and the configured fallback was used
    Fallback { value: Value, attempts: u32, last_error: AttemptError },
}

impl JsonOutcome {
    pub fn value(&self) -> &Value {
        match self {
            JsonOutcome::Parsed { value, .. } | JsonOutcome::Fallback { value, .. } => value,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            JsonOutcome::Parsed { value, .. } | JsonOutcome::Fallback { value, .. } => value,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            JsonOutcome::Parsed { attempts, .. } | JsonOutcome::Fallback { attempts, .. } => *attempts,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, JsonOutcome::Fallback { .. })
    }
}

/// Orchestrator state after each transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Attempting(u32),
    Success,
    ExhaustedWithFallback,
    ExhaustedFailure,
}

/// Attempt counter, last error and fallback for one logical call
#[derive(Debug)]
pub struct RetryState {
    attempt: u32,
    max_retries: u32,
    backoff_base: Duration,
    last_error: Option<AttemptError>,
    fallback: Option<Value>,
    state: AttemptState,
}

impl RetryState {
    pub fn new(options: &JsonRequestOptions) -> Self {
        Self {
            attempt: 1,
            // At least one attempt is always made
            max_retries: options.max_retries.max(1),
            backoff_base: options.backoff_base,
            last_error: None,
            fallback: options.fallback.clone(),
            state: AttemptState::Attempting(1),
        }
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn last_error(&self) -> Option<&AttemptError> {
        self.last_error.as_ref()
    }

    /// JSON mode is only requested on the first attempt
    pub fn json_mode(&self) -> bool {
        self.attempt == 1
    }

    /// Delay before the attempt following the current one
    pub fn backoff(&self) -> Duration {
        self.backoff_base.saturating_mul(self.attempt)
    }

    pub fn record_success(&mut self) -> AttemptState {
        self.state = AttemptState::Success;
        self.state
    }

    /// Record a failed attempt and move to the next state. The attempt
    /// counter only advances when another attempt will be made.
    pub fn record_failure(&mut self, error: AttemptError) -> AttemptState {
        self.last_error = Some(error);
        self.state = if self.attempt < self.max_retries {
            AttemptState::Attempting(self.attempt + 1)
        } else if self.fallback.is_some() {
            AttemptState::ExhaustedWithFallback
        } else {
            AttemptState::ExhaustedFailure
        };
        self.state
    }

    /// Advance the counter after the backoff delay has elapsed
    pub fn advance(&mut self) {
        if let AttemptState::Attempting(next) = self.state {
            self.attempt = next;
        }
    }

    /// Resolve an exhausted state into the fallback outcome or the terminal error
    pub fn into_exhausted(self) -> Result<JsonOutcome, LlmJsonError> {
        let last_error = self
            .last_error
            .unwrap_or(AttemptError::Parse(ParseError::EmptyResponse));

        match self.fallback {
            Some(value) => {
                warn!(
                    attempts = self.attempt,
                    error = %last_error,
                    "LLM JSON retries exhausted, using fallback value"
                );
                Ok(JsonOutcome::Fallback { value, attempts: self.attempt, last_error })
            }
            None => {
                error!(
                    attempts = self.attempt,
                    error = %last_error,
                    "LLM JSON retries exhausted"
                );
                Err(LlmJsonError { attempts: self.attempt, last_error })
            }
        }
    }
}

/// Asks an [`LlmClient`] for JSON with bounded retries
#[derive(Clone)]
pub struct LlmJsonRequester {
    client: Arc<dyn LlmClient>,
    delay: Arc<dyn Delay>,
}

impl LlmJsonRequester {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self::with_delay(client, Arc::new(TokioDelay))
    }

    pub fn with_delay(client: Arc<dyn LlmClient>, delay: Arc<dyn Delay>) -> Self {
        Self { client, delay }
    }

    pub async fn request_json(
        &self,
        messages: Vec<ChatMessage>,
        options: &JsonRequestOptions,
    ) -> Result<JsonOutcome, LlmJsonError> {
        let mut retry = RetryState::new(options);

        loop {
            let request = CompletionRequest {
                messages: messages.clone(),
                max_tokens: options.max_tokens,
                json_mode: retry.json_mode(),
            };

            let result = match self.client.complete(&request).await {
                Ok(raw) => options.evaluate(&raw).map_err(|e| {
                    warn!(
                        kind = e.kind(),
                        response = %excerpt(&raw),
                        "LLM response rejected"
                    );
                    AttemptError::Parse(e)
                }),
                Err(e) => Err(AttemptError::Llm(e)),
            };

            match result {
                Ok(value) => {
                    retry.record_success();
                    info!(attempt = retry.attempt(), "LLM JSON response accepted");
                    return Ok(JsonOutcome::Parsed { value, attempts: retry.attempt() });
                }
                Err(e) => {
                    warn!(
                        "LLM JSON attempt {}/{} failed: {}",
                        retry.attempt(),
                        retry.max_retries(),
                        e
                    );
                    match retry.record_failure(e) {
                        AttemptState::Attempting(_) => {
                            let backoff = retry.backoff();
                            self.delay.wait(backoff).await;
                            retry.advance();
                        }
                        _ => return retry.into_exhausted(),
                    }
                }
            }
        }
    }
}

/// Blocking counterpart of [`LlmJsonRequester::request_json`] for synchronous
/// workers. `call` receives the JSON-mode flag for the attempt; `sleep` is
/// the thread-blocking delay (normally `std::thread::sleep`).
pub fn request_json_blocking<C, S>(
    options: &JsonRequestOptions,
    mut call: C,
    sleep: S,
) -> Result<JsonOutcome, LlmJsonError>
where
    C: FnMut(bool) -> Result<String, LlmError>,
    S: Fn(Duration),
{
    let mut retry = RetryState::new(options);

    loop {
        let result = call(retry.json_mode())
            .map_err(AttemptError::Llm)
            .and_then(|raw| options.evaluate(&raw).map_err(AttemptError::Parse));

        match result {
            Ok(value) => {
                retry.record_success();
                return Ok(JsonOutcome::Parsed { value, attempts: retry.attempt() });
            }
            Err(e) => {
                warn!(
                    "LLM JSON attempt {}/{} failed: {}",
                    retry.attempt(),
                    retry.max_retries(),
                    e
                );
                match retry.record_failure(e) {
                    AttemptState::Attempting(_) => {
                        sleep(retry.backoff());
                        retry.advance();
                    }
                    _ => return retry.into_exhausted(),
                }
            }
        }
    }
}
