use crate::core::config::ConfigError;
use crate::core::errors::AseError;
use crate::core::kernel::auth::{RequestAuthorizer, SignedMethod};
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, instrument, trace, warn};

/// How a unary request carries its signature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthMode {
    /// `Host`, `Date`, `Digest` and `Authorization` headers; the body digest is signed.
    #[default]
    Headers,
    /// Signed `host`/`date`/`authorization` query string; the body is not digested.
    Query,
}

/// Configuration for the unary caller
#[derive(Clone, Debug)]
pub struct UnaryConfig {
    /// Whole-request timeout, applied per attempt
    pub timeout: Duration,
    /// Extra attempts after the first, for transport errors and 5xx only
    pub retry_count: usize,
    pub auth_mode: AuthMode,
    pub user_agent: String,
}

impl Default for UnaryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry_count: 0,
            auth_mode: AuthMode::Headers,
            user_agent: format!("ase-sdk/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl UnaryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_count(mut self, retry_count: usize) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_auth_mode(mut self, auth_mode: AuthMode) -> Self {
        self.auth_mode = auth_mode;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Signed single-shot POST over reqwest.
///
/// Each attempt is signed afresh so a retried request never carries a
/// stale `Date`.
#[derive(Clone)]
pub struct UnaryCaller {
    client: Client,
    config: UnaryConfig,
    authorizer: RequestAuthorizer,
}

impl std::fmt::Debug for UnaryCaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnaryCaller")
            .field("config", &self.config)
            .field("authorizer", &self.authorizer)
            .finish_non_exhaustive()
    }
}

impl UnaryCaller {
    pub fn new(authorizer: RequestAuthorizer, config: UnaryConfig) -> Result<Self, AseError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                ConfigError::InvalidConfiguration(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            config,
            authorizer,
        })
    }

    pub fn config(&self) -> &UnaryConfig {
        &self.config
    }

    /// Serialize `body` and POST it; see [`Self::post_raw`].
    pub async fn post_json<T: Serialize + ?Sized>(&self, body: &T) -> Result<Vec<u8>, AseError> {
        let body = serde_json::to_vec(body)?;
        self.post_raw(&body).await
    }

    /// POST `body` and return the raw response body of a 200.
    /// Any other status becomes [`AseError::UnexpectedStatus`].
    #[instrument(skip(self, body), fields(host = %self.authorizer.endpoint().host, path = %self.authorizer.endpoint().path, bytes = body.len()))]
    pub async fn post_raw(&self, body: &[u8]) -> Result<Vec<u8>, AseError> {
        let strategy = ExponentialBackoff::from_millis(10)
            .factor(10)
            .max_delay(Duration::from_secs(2))
            .map(jitter)
            .take(self.config.retry_count);

        RetryIf::spawn(strategy, || self.attempt(body), is_retryable).await
    }

    async fn attempt(&self, body: &[u8]) -> Result<Vec<u8>, AseError> {
        let endpoint = self.authorizer.endpoint();
        let now = Utc::now();

        let request = match self.config.auth_mode {
            AuthMode::Headers => {
                let url = format!(
                    "{}://{}{}",
                    SignedMethod::Post.scheme(endpoint.use_tls),
                    endpoint.host,
                    endpoint.path
                );
                self.authorizer
                    .signed_headers(body, now)
                    .into_iter()
                    .fold(self.client.post(url), |request, (key, value)| {
                        request.header(key, value)
                    })
            }
            AuthMode::Query => {
                let signed = self.authorizer.signed_url(SignedMethod::Post, now);
                self.client
                    .post(signed.url)
                    .header("Content-Type", "application/json")
            }
        };

        let response = request.body(body.to_vec()).send().await.map_err(|e| {
            warn!(error = %e, "unary request failed");
            e
        })?;
        let status = response.status();
        let bytes = response.bytes().await?;

        trace!(%status, body = %String::from_utf8_lossy(&bytes), "unary response");

        if status != StatusCode::OK {
            debug!(%status, "unexpected unary status");
            return Err(AseError::UnexpectedStatus {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        Ok(bytes.to_vec())
    }
}

fn is_retryable(err: &AseError) -> bool {
    match err {
        AseError::Http(_) => true,
        AseError::UnexpectedStatus { status, .. } => *status >= 500,
        _ => false,
    }
}
