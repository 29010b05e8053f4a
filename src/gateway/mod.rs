//! Model gateway: one text-generation capability behind a uniform contract.
//!
//! Every stage talks to the model through [`ModelGateway::complete`]: a system
//! instruction plus an ordered turn history in, completion text out.

pub mod error;
pub mod openrouter;
pub mod pricing;
pub mod scripted;
pub mod types;
pub mod usage;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use openrouter::{ChatProvider, OpenRouterAdapter};
use usage::{CallStatus, ProviderCallRecord};

pub use error::{ErrorContext, GatewayError};
pub use pricing::chat_cost;
pub use scripted::{RecordedCall, ScriptedGateway};
pub use types::*;
pub use usage::{NoopUsageSink, TracingUsageSink, UsageSink};

pub const DEFAULT_MODEL: &str = "google/gemini-2.0-flash-001";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

#[async_trait::async_trait]
pub trait ModelGateway: Send + Sync {
    /// Produce a completion for `turns` under `system_instruction`.
    ///
    /// Implementations must not retry unless the caller configured them to.
    async fn complete(
        &self,
        system_instruction: &str,
        turns: &[ChatTurn],
        attribution: Attribution,
    ) -> Result<String, GatewayError>;
}

/// Sampling settings applied to every call a gateway makes.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
        }
    }
}

impl ModelSettings {
    /// Read `STARSTRUCK_MODEL`, `STARSTRUCK_TEMPERATURE` and `STARSTRUCK_MAX_TOKENS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            model: std::env::var("STARSTRUCK_MODEL").unwrap_or(defaults.model),
            temperature: env_parse("STARSTRUCK_TEMPERATURE").unwrap_or(defaults.temperature),
            max_tokens: env_parse("STARSTRUCK_MAX_TOKENS"),
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }
}

/// Retry policy. Retrying is a caller decision, so the default is none.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

impl GatewayConfig {
    /// Read `STARSTRUCK_MAX_RETRIES`.
    pub fn from_env() -> Self {
        Self {
            max_retries: env_parse("STARSTRUCK_MAX_RETRIES").unwrap_or(0),
            ..Self::default()
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Gateway over a chat-completions provider, reporting usage to a sink.
pub struct ProviderGateway<U: UsageSink> {
    provider: Arc<dyn ChatProvider>,
    usage_sink: Arc<U>,
    settings: ModelSettings,
    config: GatewayConfig,
}

#[async_trait::async_trait]
impl<U: UsageSink> ModelGateway for ProviderGateway<U> {
    async fn complete(
        &self,
        system_instruction: &str,
        turns: &[ChatTurn],
        attribution: Attribution,
    ) -> Result<String, GatewayError> {
        let mut req = ChatRequest::from_turns(
            ChatModel::openrouter(&self.settings.model),
            system_instruction,
            turns,
            attribution,
        )
        .temperature(self.settings.temperature);
        if let Some(max) = self.settings.max_tokens {
            req = req.max_tokens(max);
        }

        self.chat(req).await.map(|resp| resp.content)
    }
}

impl<U: UsageSink> ProviderGateway<U> {
    /// OpenRouter adapter, model settings and retry policy from the environment.
    pub fn from_env(usage_sink: Arc<U>) -> Result<Self, GatewayError> {
        let adapter = OpenRouterAdapter::from_env()?;
        Ok(Self::with_config(
            adapter,
            usage_sink,
            ModelSettings::from_env(),
            GatewayConfig::from_env(),
        ))
    }

    pub fn with_config(
        provider: impl ChatProvider + 'static,
        usage_sink: Arc<U>,
        settings: ModelSettings,
        config: GatewayConfig,
    ) -> Self {
        Self {
            provider: Arc::new(provider),
            usage_sink,
            settings,
            config,
        }
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, GatewayError> {
        let mut attempt = 0;
        loop {
            match self.provider.chat(&req).await {
                Ok(resp) => {
                    tracing::debug!(
                        caller = req.attribution.caller,
                        chars = resp.content.len(),
                        finish = ?resp.finish_reason,
                        "completion received"
                    );
                    self.record_usage(&req, &resp, CallStatus::Success, None)
                        .await;
                    return Ok(resp);
                }
                Err(err) => {
                    let code = err.code().to_string();
                    self.record_usage(&req, &ChatResponse::empty(), CallStatus::Error, Some(code))
                        .await;

                    if !err.is_retryable() || attempt >= self.config.max_retries {
                        return Err(err);
                    }

                    let delay = backoff_delay(self.config.retry_base_delay, attempt);
                    tracing::warn!(
                        caller = req.attribution.caller,
                        attempt,
                        error = %err,
                        "retrying provider call in {delay:?}"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn record_usage(
        &self,
        req: &ChatRequest,
        resp: &ChatResponse,
        status: CallStatus,
        error_code: Option<String>,
    ) {
        let record = ProviderCallRecord::new(
            req.model.provider(),
            req.model.model_id(),
            req.attribution.caller,
        )
        .tokens(resp.input_tokens, resp.output_tokens)
        .cost(resp.cost_nanodollars)
        .run(req.attribution.run_id)
        .latency(resp.latency.as_millis() as u64);

        let record = if status == CallStatus::Error {
            record.error(error_code.unwrap_or_else(|| "provider_error".to_string()))
        } else {
            record
        };

        self.usage_sink.record(record).await;
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 2u32.pow(attempt.min(5));
    base * multiplier
}
