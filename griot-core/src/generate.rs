//! Generation client: connectivity gate, per-attempt timeout, bounded retry.
//!
//! Wraps the external text-generation service behind the [`TextGenerator`]
//! capability. The client owns reliability policy only: it never caches and
//! never validates. Transient failures retry with exponential backoff inside
//! a total latency budget; non-retryable failures surface immediately.

use crate::prompt::PromptSpec;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

/// Per-attempt timeout applied when options do not override it.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);
/// Retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;
/// Cap on total time spent across attempts and backoff.
pub const DEFAULT_LATENCY_BUDGET: Duration = Duration::from_secs(20);

const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(5);

// ============================================================================
// Capabilities
// ============================================================================

/// Prompt text plus generation parameters, as the service consumes them.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// What the service hands back for one completed call.
#[derive(Debug, Clone)]
pub struct GenerationReply {
    pub text: String,
    /// True when the service stopped at its length cap.
    pub truncated: bool,
}

/// The external text-generation service.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, request: GenerationRequest)
        -> Result<GenerationReply, GenerationError>;

    /// Short name for logs.
    fn name(&self) -> &str {
        "generator"
    }
}

/// Reachability probe consulted before any network attempt.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Probe for environments that manage connectivity elsewhere. Always
/// reports online, leaving failures to surface through the service call.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnlineProbe;

#[async_trait]
impl ConnectivityProbe for OnlineProbe {
    async fn is_online(&self) -> bool {
        true
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Failures on the generation path.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("device is offline")]
    Offline,

    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("transient service failure: {0}")]
    Transient(String),

    #[error("generation request rejected: {0}")]
    Rejected(String),

    #[error("service returned an empty response")]
    Empty,
}

impl GenerationError {
    /// Whether another attempt could reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::Timeout(_) | GenerationError::Transient(_) | GenerationError::Empty
        )
    }
}

impl From<textgen::Error> for GenerationError {
    fn from(error: textgen::Error) -> Self {
        match error {
            textgen::Error::Api { status, message } if status == 429 || status >= 500 => {
                GenerationError::Transient(format!("status {status}: {message}"))
            }
            textgen::Error::Api { status, message } => {
                GenerationError::Rejected(format!("status {status}: {message}"))
            }
            textgen::Error::Network(message) => GenerationError::Transient(message),
            textgen::Error::Parse(message) => {
                GenerationError::Transient(format!("unreadable service response: {message}"))
            }
            textgen::Error::NoApiKey => {
                GenerationError::Rejected("API key not configured".to_string())
            }
            textgen::Error::Config(message) => GenerationError::Rejected(message),
        }
    }
}

// ============================================================================
// Raw response
// ============================================================================

/// Raw service output plus call metadata, handed on to validation.
#[derive(Debug, Clone)]
pub struct RawGenerationResponse {
    pub text: String,
    /// Wall-clock time from first attempt to success.
    pub latency: Duration,
    pub truncated: bool,
}

// ============================================================================
// Options
// ============================================================================

/// Reliability knobs for one generation call.
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    /// Hard timeout per attempt.
    pub timeout: Duration,
    /// Retries after the first attempt, transient failures only.
    pub max_retries: u32,
    /// Cap on total time across attempts and backoff.
    pub latency_budget: Duration,
    pub temperature: f32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_ATTEMPT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            latency_budget: DEFAULT_LATENCY_BUDGET,
            temperature: 0.7,
        }
    }
}

impl GenerationOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_latency_budget(mut self, budget: Duration) -> Self {
        self.latency_budget = budget;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

// ============================================================================
// Client
// ============================================================================

/// Reliability wrapper around the generation service.
#[derive(Clone)]
pub struct GenerationClient {
    generator: Arc<dyn TextGenerator>,
    probe: Arc<dyn ConnectivityProbe>,
    options: GenerationOptions,
}

impl GenerationClient {
    pub fn new(generator: Arc<dyn TextGenerator>, probe: Arc<dyn ConnectivityProbe>) -> Self {
        Self {
            generator,
            probe,
            options: GenerationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    /// Ask the connectivity probe whether generation is worth attempting.
    pub async fn is_online(&self) -> bool {
        self.probe.is_online().await
    }

    /// Generate with the client's configured options.
    pub async fn generate(
        &self,
        prompt: &PromptSpec,
    ) -> Result<RawGenerationResponse, GenerationError> {
        self.generate_with_options(prompt, &self.options).await
    }

    /// Generate with explicit options.
    ///
    /// Checks connectivity first: offline fails immediately with no network
    /// attempt. Each attempt runs under `options.timeout`, clamped to what
    /// remains of `options.latency_budget`; transient failures back off
    /// exponentially until retries or budget run out.
    pub async fn generate_with_options(
        &self,
        prompt: &PromptSpec,
        options: &GenerationOptions,
    ) -> Result<RawGenerationResponse, GenerationError> {
        if !self.probe.is_online().await {
            debug!(generator = self.generator.name(), "offline, skipping generation");
            return Err(GenerationError::Offline);
        }

        let started = Instant::now();
        let mut retries_used: u32 = 0;

        loop {
            let remaining = match options.latency_budget.checked_sub(started.elapsed()) {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => return Err(GenerationError::Timeout(options.latency_budget)),
            };
            let attempt_timeout = options.timeout.min(remaining);

            let request = GenerationRequest {
                system: prompt.system.clone(),
                prompt: prompt.text.clone(),
                max_tokens: prompt.contract.max_tokens_hint(),
                temperature: options.temperature,
            };

            let error = match timeout(attempt_timeout, self.generator.complete(request)).await {
                Ok(Ok(reply)) if reply.text.trim().is_empty() => GenerationError::Empty,
                Ok(Ok(reply)) => {
                    let latency = started.elapsed();
                    info!(
                        generator = self.generator.name(),
                        latency_ms = latency.as_millis() as u64,
                        truncated = reply.truncated,
                        retries_used,
                        "generation succeeded"
                    );
                    return Ok(RawGenerationResponse {
                        text: reply.text,
                        latency,
                        truncated: reply.truncated,
                    });
                }
                Ok(Err(error)) => error,
                Err(_) => GenerationError::Timeout(attempt_timeout),
            };

            if !error.is_retryable() {
                return Err(error);
            }
            if retries_used >= options.max_retries {
                return Err(error);
            }

            let delay = compute_retry_backoff(retries_used);
            if started.elapsed() + delay >= options.latency_budget {
                return Err(error);
            }
            warn!(
                generator = self.generator.name(),
                error = %error,
                retry_in_ms = delay.as_millis() as u64,
                retries_used,
                "retrying generation after retryable failure"
            );
            sleep(delay).await;
            retries_used += 1;
        }
    }
}

/// Exponential backoff: base doubled per retry, capped.
fn compute_retry_backoff(retries_used: u32) -> Duration {
    let shift = retries_used.min(16);
    let delay_ms = (RETRY_BASE_DELAY.as_millis() as u64).saturating_mul(1u64 << shift);
    Duration::from_millis(delay_ms.min(RETRY_MAX_DELAY.as_millis() as u64))
}

#[async_trait]
impl TextGenerator for textgen::Client {
    async fn complete(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationReply, GenerationError> {
        let api_request = textgen::CompletionRequest::new(request.prompt)
            .with_system(request.system)
            .with_max_tokens(request.max_tokens)
            .with_temperature(request.temperature);

        let completion = textgen::Client::complete(self, api_request).await?;
        Ok(GenerationReply {
            text: completion.text,
            truncated: completion.truncated,
        })
    }

    fn name(&self) -> &str {
        "textgen"
    }
}
