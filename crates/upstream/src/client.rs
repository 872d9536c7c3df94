//! The Copilot upstream client.

use relay_types::{ModelDescriptor, RelayError, Result};
use rquest::{Client, Method, RequestBuilder};
use serde_json::{Value, json};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Copilot API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.githubcopilot.com";

/// Per-request timeout for chat and listing calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Tighter budget for model verification probes.
const VERIFY_TIMEOUT: Duration = Duration::from_secs(6);

/// Retries after the initial attempt.
const DEFAULT_MAX_RETRIES: u32 = 2;

/// Backoff before retry `attempt`: `min(250 * 2^attempt, 1500)` ms.
fn backoff_delay(attempt: u32) -> Duration {
    let ms = 250u64.checked_shl(attempt).unwrap_or(u64::MAX).min(1500);
    Duration::from_millis(ms)
}

/// Fixed outbound headers attached to every request.
const FIXED_HEADERS: &[(&str, &str)] = &[
    ("User-Agent", "copilot-cli/1.0"),
    ("Editor-Version", "vscode/1.85.0"),
    ("Editor-Plugin-Version", "copilot-chat/0.11.0"),
    ("Openai-Organization", "github-copilot"),
];

/// The single shared outbound client for the Copilot API.
///
/// Owns no per-request mutable state; safe to call concurrently.
#[derive(Clone)]
pub struct CopilotClient {
    http: Client,
    base_url: String,
    max_retries: u32,
}

impl CopilotClient {
    /// Creates a client against the production base URL.
    #[must_use]
    pub fn new(http: Client) -> Self {
        Self::with_base_url(http, DEFAULT_BASE_URL)
    }

    /// Creates a client against a custom base URL (tests, self-hosted).
    #[must_use]
    pub fn with_base_url(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Overrides the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Fixed outbound headers plus the bearer token when provided.
    /// Caller-supplied headers are merged last and may override any of the
    /// fixed set, including `Authorization`.
    fn apply_headers(
        builder: RequestBuilder,
        token: Option<&str>,
        extra: Option<&[(String, String)]>,
    ) -> RequestBuilder {
        let overridden = |name: &str| {
            extra.is_some_and(|e| e.iter().any(|(k, _)| k.eq_ignore_ascii_case(name)))
        };
        let mut builder = builder;
        for (name, value) in FIXED_HEADERS {
            if !overridden(name) {
                builder = builder.header(*name, *value);
            }
        }
        if let Some(t) = token
            && !overridden("Authorization")
        {
            builder = builder.header("Authorization", format!("Bearer {t}"));
        }
        if let Some(extra) = extra {
            for (name, value) in extra {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        builder
    }

    /// The low-level request primitive: sends one request with retries,
    /// per-attempt timeout, and caller cancellation. Each attempt rebuilds
    /// the request and composes its own timeout with the caller's signal.
    /// `extra_headers` are merged after the fixed set and may override it.
    ///
    /// # Errors
    ///
    /// [`RelayError::Cancelled`] when the caller's signal trips (never
    /// retried); [`RelayError::Upstream`] for non-success statuses, after
    /// retries for transient ones; [`RelayError::Http`] for transport
    /// failures that survive the retry budget.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<&Value>,
        timeout: Duration,
        extra_headers: Option<&[(String, String)]>,
        cancel: Option<&CancellationToken>,
    ) -> Result<rquest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt: u32 = 0;
        loop {
            if let Some(c) = cancel
                && c.is_cancelled()
            {
                return Err(RelayError::Cancelled);
            }

            let mut builder = Self::apply_headers(
                self.http.request(method.clone(), &url),
                token,
                extra_headers,
            );
            if let Some(b) = body {
                builder = builder.json(b);
            }

            let send = tokio::time::timeout(timeout, builder.send());
            let outcome = match cancel {
                Some(c) => tokio::select! {
                    () = c.cancelled() => return Err(RelayError::Cancelled),
                    r = send => r,
                },
                None => send.await,
            };

            let err = match outcome {
                Ok(Ok(resp)) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }
                    let e = RelayError::Upstream {
                        status: status.as_u16(),
                        body: resp.text().await.unwrap_or_default(),
                    };
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    e
                }
                Ok(Err(e)) => RelayError::Http(e.to_string()),
                Err(_elapsed) => {
                    RelayError::Http(format!("request timed out after {}ms", timeout.as_millis()))
                }
            };

            if attempt >= self.max_retries {
                return Err(err);
            }
            let delay = backoff_delay(attempt);
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err,
                "retrying upstream request");
            match cancel {
                Some(c) => tokio::select! {
                    () = c.cancelled() => return Err(RelayError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                },
                None => tokio::time::sleep(delay).await,
            }
            attempt += 1;
        }
    }

    /// Lists the models available to the account behind `token`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Upstream`] for non-2xx responses and
    /// [`RelayError::Parse`] when the body is not the expected listing.
    pub async fn list_models(&self, token: &str) -> Result<Vec<ModelDescriptor>> {
        let resp = self
            .request(
                Method::GET,
                "/models",
                Some(token),
                None,
                DEFAULT_TIMEOUT,
                None,
                None,
            )
            .await?;
        let json: Value = resp
            .json()
            .await
            .map_err(|e| RelayError::Parse(e.to_string()))?;
        let data = json
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| RelayError::Parse("model listing missing data[]".into()))?;
        Ok(data
            .iter()
            .filter_map(|m| serde_json::from_value(m.clone()).ok())
            .collect())
    }

    /// Posts a chat completion and returns the raw response, so the caller
    /// may consume it as JSON or stream it. `extra_headers` are merged
    /// after the fixed set and may override it.
    ///
    /// # Errors
    ///
    /// See [`Self::request`]; a 401 surfaces unretried so the dispatcher can
    /// rotate credentials.
    pub async fn post_chat_completion(
        &self,
        token: &str,
        payload: &Value,
        extra_headers: Option<&[(String, String)]>,
        cancel: Option<&CancellationToken>,
    ) -> Result<rquest::Response> {
        self.request(
            Method::POST,
            "/chat/completions",
            Some(token),
            Some(payload),
            DEFAULT_TIMEOUT,
            extra_headers,
            cancel,
        )
        .await
    }

    /// Probes whether the account can actually call `model_id`.
    ///
    /// Issues a minimal completion (tiny prompt, `max_tokens: 5`,
    /// `temperature: 0`) with a 6 s budget and a single attempt. Any
    /// non-2xx, transport error, or timeout counts as `false`. The response
    /// body is always drained.
    pub async fn verify_model(
        &self,
        token: &str,
        model_id: &str,
        cancel: Option<&CancellationToken>,
    ) -> bool {
        let payload = json!({
            "model": model_id,
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 5,
            "temperature": 0,
        });

        let url = format!("{}/chat/completions", self.base_url);
        let builder = Self::apply_headers(self.http.post(&url), Some(token), None).json(&payload);
        let send = tokio::time::timeout(VERIFY_TIMEOUT, builder.send());
        let outcome = match cancel {
            Some(c) => tokio::select! {
                () = c.cancelled() => return false,
                r = send => r,
            },
            None => send.await,
        };

        match outcome {
            Ok(Ok(resp)) => {
                let ok = resp.status().is_success();
                let _ = resp.bytes().await;
                ok
            }
            _ => false,
        }
    }
}
