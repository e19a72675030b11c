use crate::config::EngineConfig;
use crate::error::{Error, QuotaUsage, Result};
use crate::sdk::{
    ConversationContext, CredentialBroker, SessionCredential, SessionSummaryRequest, Signaling, SummaryStore,
    ToolExecutor,
};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

const SESSION_PATH: &str = "realtime/session";
const FUNCTIONS_PATH: &str = "realtime/functions";
const SUMMARY_PATH: &str = "realtime/summary";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSecret {
    pub value: String,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub id: String,
}

/// Body returned by the credential endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialResponse {
    pub client_secret: ClientSecret,
    pub session: SessionDescriptor,
}

impl From<CredentialResponse> for SessionCredential {
    fn from(res: CredentialResponse) -> Self {
        Self {
            value: res.client_secret.value,
            session_id: res.session.id,
            expires_at: res.client_secret.expires_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct FunctionRequest<'a> {
    name: &'a str,
    arguments: &'a Value,
}

/// An adapter for the backend's realtime endpoints: credential issuance,
/// tool execution and session summaries.
#[derive(Clone, Debug)]
pub struct BackendRestAdapter {
    client: Client,
    base_url: Url,
    auth_header: HeaderValue,
}

impl BackendRestAdapter {
    /// # Errors
    /// Returns an error if the token results in an invalid header or client build fails.
    #[allow(clippy::result_large_err)]
    pub fn new(base_url: Url, api_token: &str) -> Result<Self> {
        Self::new_with_timeouts(base_url, api_token, DEFAULT_TIMEOUT, DEFAULT_POOL_IDLE_TIMEOUT)
    }

    /// # Errors
    /// Returns an error if the token results in an invalid header or client build fails.
    #[allow(clippy::result_large_err)]
    pub fn from_config(config: &EngineConfig, api_token: &str) -> Result<Self> {
        Self::new_with_timeouts(
            config.backend_url()?,
            api_token,
            config.http_timeout(),
            DEFAULT_POOL_IDLE_TIMEOUT,
        )
    }

    /// # Errors
    /// Returns an error if the token results in an invalid header or client build fails.
    #[allow(clippy::result_large_err)]
    pub fn new_with_timeouts(
        base_url: Url,
        api_token: &str,
        timeout: Duration,
        pool_idle_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(pool_idle_timeout)
            .build()?;
        let auth_header = HeaderValue::from_str(&format!("Bearer {api_token}"))?;
        Ok(Self { client, base_url, auth_header })
    }

    #[allow(clippy::result_large_err)]
    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }
}

#[async_trait]
impl CredentialBroker for BackendRestAdapter {
    async fn issue_session_credential(&self, context: &ConversationContext) -> Result<SessionCredential> {
        let res = self
            .client
            .post(self.endpoint(SESSION_PATH)?)
            .header(AUTHORIZATION, &self.auth_header)
            .json(context)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(credential_error(status, &body));
        }
        let credential: CredentialResponse = res.json().await?;
        tracing::debug!("Issued session credential for {}", credential.session.id);
        Ok(credential.into())
    }
}

#[async_trait]
impl ToolExecutor for BackendRestAdapter {
    async fn execute_function(&self, name: &str, arguments: Value) -> Result<Value> {
        let res = self
            .client
            .post(self.endpoint(FUNCTIONS_PATH)?)
            .header(AUTHORIZATION, &self.auth_header)
            .json(&FunctionRequest { name, arguments: &arguments })
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(Error::ToolExecution(format!("{name} returned {status}: {}", excerpt(&body))));
        }
        Ok(res.json().await?)
    }
}

#[async_trait]
impl SummaryStore for BackendRestAdapter {
    async fn store_session_summary(&self, request: SessionSummaryRequest) -> Result<()> {
        self.client
            .post(self.endpoint(SUMMARY_PATH)?)
            .header(AUTHORIZATION, &self.auth_header)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Exchanges session descriptions with the remote realtime engine, authorized
/// by the ephemeral session credential.
#[derive(Clone, Debug)]
pub struct RealtimeSignalingAdapter {
    client: Client,
    calls_url: Url,
}

impl RealtimeSignalingAdapter {
    /// # Errors
    /// Returns an error if the URL cannot be extended or client build fails.
    #[allow(clippy::result_large_err)]
    pub fn new(realtime_url: &Url, model: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .pool_idle_timeout(DEFAULT_POOL_IDLE_TIMEOUT)
            .build()?;
        Ok(Self { client, calls_url: calls_url(realtime_url, model)? })
    }

    /// # Errors
    /// Returns an error if the URL cannot be extended or client build fails.
    #[allow(clippy::result_large_err)]
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Self::new(&config.realtime_url()?, &config.model)
    }

    #[must_use]
    pub const fn calls_url(&self) -> &Url {
        &self.calls_url
    }
}

#[async_trait]
impl Signaling for RealtimeSignalingAdapter {
    async fn negotiate(&self, offer: String, credential: &str) -> Result<String> {
        let auth = HeaderValue::from_str(&format!("Bearer {credential}"))?;
        let res = self
            .client
            .post(self.calls_url.clone())
            .header(AUTHORIZATION, auth)
            .header(CONTENT_TYPE, "application/sdp")
            .body(offer)
            .send()
            .await?;

        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            return Err(Error::Negotiation(format!(
                "signaling rejected the offer ({status}): {}",
                excerpt(&body)
            )));
        }
        Ok(body)
    }
}

#[allow(clippy::result_large_err)]
fn calls_url(realtime_url: &Url, model: &str) -> Result<Url> {
    let base = format!("{}/", realtime_url.as_str().trim_end_matches('/'));
    let mut url = Url::parse(&base)?.join("calls")?;
    url.query_pairs_mut().append_pair("model", model);
    Ok(url)
}

fn credential_error(status: StatusCode, body: &str) -> Error {
    match status {
        StatusCode::PAYMENT_REQUIRED | StatusCode::TOO_MANY_REQUESTS => Error::QuotaExceeded(quota_usage(body)),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::AuthFailure(error_message(body).unwrap_or_else(|| status.to_string()))
        }
        _ => Error::Negotiation(format!("credential request failed ({status}): {}", excerpt(body))),
    }
}

/// Usage counters from a quota rejection, either top-level or under `usage`.
fn quota_usage(body: &str) -> QuotaUsage {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return QuotaUsage::default();
    };
    let usage = value.get("usage").unwrap_or(&value);
    serde_json::from_value(usage.clone()).unwrap_or_default()
}

fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let message = value
        .get("message")
        .or_else(|| value.get("error").and_then(|e| e.get("message")))
        .or_else(|| value.get("error"))?;
    message.as_str().map(str::to_owned)
}

fn excerpt(body: &str) -> std::borrow::Cow<'_, str> {
    crate::safe_truncate(body.trim(), 256)
}
