//! Authenticated JSON requests against the REST service.

use std::sync::Arc;
use std::time::Duration;

use mailpulse_oauth::AuthSession;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::config::RemoteSettings;
use crate::error::{Error, Result};
use crate::retry::{RetryDecision, RetryPolicy};

/// Asks the service to express every date-time in UTC.
const TIMEZONE_PREFERENCE: &str = "outlook.timezone=\"UTC\"";

/// Outcome of a request that reached the service.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// 2xx with a JSON body.
    Json(Value),
    /// 202/204 or an empty body.
    NoContent,
    /// Nobody is signed in, or the token could not be refreshed.
    NotAuthenticated,
}

/// HTTP client bound to one base URL and one auth session.
#[derive(Debug, Clone)]
pub struct GraphClient {
    http: Client,
    base_url: String,
    read_timeout: Duration,
    policy: RetryPolicy,
    session: Arc<AuthSession>,
}

impl GraphClient {
    /// Builds the client with the configured connect timeout.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the HTTP client cannot be built.
    pub fn new(settings: &RemoteSettings, session: Arc<AuthSession>) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(settings.connect_timeout())
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            read_timeout: settings.read_timeout(),
            policy: RetryPolicy::REMOTE,
            session,
        })
    }

    /// Overrides the retry policy.
    #[must_use]
    pub const fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The auth session tokens come from.
    #[must_use]
    pub const fn session(&self) -> &Arc<AuthSession> {
        &self.session
    }

    /// Absolute URL for `path`; absolute inputs (paging links) pass through.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("https://") || path.starts_with("http://") {
            path.to_string()
        } else {
            format!("{}{path}", self.base_url)
        }
    }

    /// GET with query parameters.
    ///
    /// # Errors
    ///
    /// See [`GraphClient::call`].
    pub async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Reply> {
        self.call(Method::GET, path, query, None).await
    }

    /// Sends one request with a silently acquired bearer token.
    ///
    /// Throttling and gateway errors are retried under the client's policy.
    ///
    /// # Errors
    ///
    /// Returns `Error::Connectivity` if the service could not be reached,
    /// `Error::Api` for a 4xx/5xx answer, and `Error::Serde` for a malformed
    /// body.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Reply> {
        let Some(token) = self.session.acquire_token_silent().await else {
            debug!(path, "No access token, skipping request");
            return Ok(Reply::NotAuthenticated);
        };

        let mut attempt = 1;
        loop {
            match self.execute(method.clone(), path, query, body, &token).await {
                Ok(reply) => return Ok(reply),
                Err(err) => match self.policy.decide(attempt, &err) {
                    RetryDecision::Retry(delay) => {
                        debug!(path, attempt, error = %err, "Retrying remote request");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    RetryDecision::GiveUp => return Err(err),
                },
            }
        }
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        token: &str,
    ) -> Result<Reply> {
        let mut request = self
            .http
            .request(method, self.url(path))
            .bearer_auth(token)
            .timeout(self.read_timeout)
            .header("Prefer", TIMEZONE_PREFERENCE);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| Error::from_transport(&e))?;
        let status = response.status();
        if status == StatusCode::NO_CONTENT || status == StatusCode::ACCEPTED {
            return Ok(Reply::NoContent);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message: api_message(&text),
            });
        }

        let bytes = response.bytes().await.map_err(|e| Error::from_transport(&e))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Reply::NoContent);
        }
        Ok(Reply::Json(serde_json::from_slice(&bytes)?))
    }
}

/// Pulls `error.message` out of an error body, or returns the raw text.
fn api_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.trim().to_string())
}
