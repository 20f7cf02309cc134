//! OpenAI chat-completions client used as the fallback responder.
//!
//! Failures never escape as errors: `complete` always yields a `Completion`,
//! tagging failures as transient (worth retrying) or permanent.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Upper bound on the delay between retries.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Outcome of a completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Text(String),
    Unavailable(Unavailable),
}

/// Why a completion could not be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unavailable {
    /// Network errors, timeouts, rate limits, 5xx.
    Transient(String),
    /// Bad credentials, exhausted quota, rejected or malformed requests.
    Permanent(String),
}

impl Unavailable {
    pub fn reason(&self) -> &str {
        match self {
            Unavailable::Transient(r) | Unavailable::Permanent(r) => r,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Unavailable::Transient(_))
    }
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unavailable::Transient(r) => write!(f, "transient: {r}"),
            Unavailable::Permanent(r) => write!(f, "permanent: {r}"),
        }
    }
}

/// Something that can answer free text.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, text: &str) -> Completion;
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Retries after the first attempt, transient failures only.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each retry.
    pub initial_backoff: Duration,
}

impl Settings {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 2,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

pub struct Client {
    settings: Settings,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    code: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl Client {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            http: reqwest::Client::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    async fn attempt(&self, text: &str) -> Result<String, Unavailable> {
        let request = ApiRequest {
            model: &self.settings.model,
            messages: vec![ApiMessage {
                role: "user",
                content: text,
            }],
        };

        let url = format!("{}/v1/chat/completions", self.settings.base_url.trim_end_matches('/'));

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.settings.api_key)
            .timeout(self.settings.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Unavailable::Transient(format!("timed out after {:?}", self.settings.timeout))
                } else {
                    Unavailable::Transient(format!("HTTP error: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Unavailable::Transient(format!("failed to read response: {e}")))?;

        debug!("OpenAI response status: {status}");

        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let parsed: ApiResponse = serde_json::from_str(&body)
            .map_err(|e| Unavailable::Permanent(format!("malformed response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| Unavailable::Permanent("empty response".to_string()))
    }
}

/// Map a non-2xx response to a failure class.
fn classify_status(status: StatusCode, body: &str) -> Unavailable {
    let detail = serde_json::from_str::<ErrorEnvelope>(body).ok().map(|e| e.error);

    let quota_exhausted = detail.as_ref().is_some_and(|d| {
        d.code.as_deref() == Some("insufficient_quota") || d.kind.as_deref() == Some("insufficient_quota")
    });

    let message = detail
        .and_then(|d| d.message)
        .unwrap_or_else(|| body.chars().take(200).collect());
    let reason = format!("{status}: {message}");

    match status {
        StatusCode::TOO_MANY_REQUESTS if quota_exhausted => Unavailable::Permanent(reason),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => Unavailable::Transient(reason),
        s if s.is_server_error() => Unavailable::Transient(reason),
        _ => Unavailable::Permanent(reason),
    }
}

fn next_backoff(backoff: Duration) -> Duration {
    backoff.saturating_mul(2).min(MAX_BACKOFF)
}

#[async_trait]
impl Completer for Client {
    async fn complete(&self, text: &str) -> Completion {
        let mut backoff = self.settings.initial_backoff;
        let mut retries = 0;

        loop {
            match self.attempt(text).await {
                Ok(reply) => {
                    info!("🤖 OpenAI replied ({} chars)", reply.len());
                    return Completion::Text(reply);
                }
                Err(Unavailable::Transient(reason)) if retries < self.settings.max_retries => {
                    retries += 1;
                    warn!(
                        "⏳ OpenAI transient failure ({reason}), retry {retries}/{} in {backoff:?}",
                        self.settings.max_retries
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = next_backoff(backoff);
                }
                Err(unavailable) => {
                    match &unavailable {
                        Unavailable::Transient(r) => warn!("❌ OpenAI unavailable: {r}"),
                        Unavailable::Permanent(r) => error!("❌ OpenAI error: {r}"),
                    }
                    return Completion::Unavailable(unavailable);
                }
            }
        }
    }
}
