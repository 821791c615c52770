use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mirror_config::SyncConfig;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use super::domain::encode_domain;
use super::models::{RpcErrorBody, RpcRequest, RpcResponse};
use super::retry::{CallOutcome, RetryPolicy};
use crate::source::{PageQuery, RecordSource};

/// Exception names that mark a transient condition on the source's database.
const TRANSIENT_EXCEPTIONS: &[&str] = &[
    "SerializationFailure",
    "TransactionRollbackError",
    "OperationalError",
    "LockNotAvailable",
];

const ACCESS_EXCEPTIONS: &[&str] = &["AccessDenied", "AccessError", "SessionExpired"];

#[derive(Clone)]
pub struct RpcClientConfig {
    pub base_url: String,
    pub database: String,
    pub username: String,
    pub password: String,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
}

impl RpcClientConfig {
    pub fn from_sync_config(config: &SyncConfig) -> Self {
        Self {
            base_url: config.source.url.trim_end_matches('/').to_string(),
            database: config.source.database.clone(),
            username: config.source.username.clone(),
            password: config.source.password().to_string(),
            max_retries: config.retry.max_retries,
            base_delay: config.retry.base_delay(),
            timeout: config.retry.timeout(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/jsonrpc", self.base_url)
    }
}

impl fmt::Debug for RpcClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClientConfig")
            .field("base_url", &self.base_url)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RpcClientError {
    #[error("HTTP {status}: {body}")]
    HttpError { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("rpc error {code} ({name}): {message}")]
    Rpc {
        code: i64,
        name: String,
        message: String,
    },

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

impl RpcClientError {
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::AuthenticationFailed(_))
    }
}

type Outcome<T> = CallOutcome<T, RpcClientError>;

/// HTTP plumbing shared by login and reads.
struct Transport {
    http: Client,
    endpoint: String,
    policy: RetryPolicy,
    next_id: AtomicU64,
}

impl Transport {
    /// Run one JSON-RPC call, retrying transient failures. `interpret` turns
    /// a successful `result` into the caller's value and may itself classify
    /// it as retryable or fatal.
    async fn call<T: Send>(
        &self,
        service: &str,
        method: &str,
        args: Vec<Value>,
        interpret: impl Fn(Value) -> Outcome<T> + Send + Sync,
    ) -> Result<T, RpcClientError> {
        let mut retries = 0;

        loop {
            let outcome = match self.call_once(service, method, args.clone()).await {
                CallOutcome::Ok(value) => interpret(value),
                CallOutcome::Retryable { error, retry_after } => {
                    CallOutcome::Retryable { error, retry_after }
                }
                CallOutcome::Fatal(error) => CallOutcome::Fatal(error),
            };

            if let Some(delay) = self.policy.next_delay_jittered(&outcome, retries) {
                if let CallOutcome::Retryable { error, .. } = &outcome {
                    tracing::warn!(
                        service,
                        method,
                        attempt = retries + 1,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "retrying rpc call after backoff"
                    );
                }
                tokio::time::sleep(delay).await;
                retries += 1;
                continue;
            }

            return match outcome {
                CallOutcome::Ok(value) => Ok(value),
                CallOutcome::Fatal(error) => Err(error),
                CallOutcome::Retryable { error, .. } => Err(RpcClientError::MaxRetriesExceeded {
                    attempts: retries + 1,
                    last_error: error.to_string(),
                }),
            };
        }
    }

    async fn call_once(&self, service: &str, method: &str, args: Vec<Value>) -> Outcome<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::call(service, method, args, id);

        let response = match self.http.post(&self.endpoint).json(&request).send().await {
            Ok(resp) => resp,
            Err(e) => return classify_transport_error(e),
        };

        let status = response.status();

        // Honor Retry-After header for 429
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            return CallOutcome::Retryable {
                error: RpcClientError::HttpError { status, body },
                retry_after,
            };
        }

        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return CallOutcome::retryable(RpcClientError::HttpError { status, body });
        }

        // Fail fast on 4xx (except 429 handled above)
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return CallOutcome::Fatal(RpcClientError::HttpError { status, body });
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return classify_transport_error(e),
        };

        let envelope: RpcResponse = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(e) => {
                return CallOutcome::retryable(RpcClientError::MalformedResponse(format!(
                    "undecodable body: {e}"
                )))
            }
        };

        if let Some(error) = envelope.error {
            return classify_rpc_error(&error);
        }

        match envelope.result {
            Some(result) => CallOutcome::Ok(result),
            None => CallOutcome::retryable(RpcClientError::MalformedResponse(
                "response has neither result nor error".to_string(),
            )),
        }
    }
}

/// Network failures (refused, reset, closed mid-response, timed out) are
/// retryable. Only errors raised before anything reaches the wire are fatal.
fn classify_transport_error<T>(error: reqwest::Error) -> Outcome<T> {
    if error.is_builder() || error.is_redirect() {
        CallOutcome::Fatal(RpcClientError::RequestError(error))
    } else {
        CallOutcome::retryable(RpcClientError::RequestError(error))
    }
}

fn classify_rpc_error<T>(error: &RpcErrorBody) -> Outcome<T> {
    let name = error.exception_name();
    if ACCESS_EXCEPTIONS.iter().any(|n| name.ends_with(n)) {
        return CallOutcome::Fatal(RpcClientError::AuthenticationFailed(error.detail().to_string()));
    }

    let rpc_error = RpcClientError::Rpc {
        code: error.code,
        name: name.to_string(),
        message: error.detail().to_string(),
    };
    if TRANSIENT_EXCEPTIONS.iter().any(|n| name.contains(n)) {
        CallOutcome::retryable(rpc_error)
    } else {
        CallOutcome::Fatal(rpc_error)
    }
}

/// Authenticated JSON-RPC session against one source database.
pub struct RpcClient {
    transport: Transport,
    config: RpcClientConfig,
    uid: i64,
}

impl RpcClient {
    /// Build the HTTP client and log in. The session uid is fixed for the
    /// client's lifetime.
    pub async fn connect(config: RpcClientConfig) -> Result<Self, RpcClientError> {
        let http = Client::builder().timeout(config.timeout).build()?;
        let transport = Transport {
            http,
            endpoint: config.endpoint(),
            policy: RetryPolicy::new(config.max_retries, config.base_delay),
            next_id: AtomicU64::new(1),
        };

        let uid = authenticate(&transport, &config).await?;

        Ok(Self {
            transport,
            config,
            uid,
        })
    }

    pub fn uid(&self) -> i64 {
        self.uid
    }

    pub fn config(&self) -> &RpcClientConfig {
        &self.config
    }

    /// Run `search_read` for one page. Records come back in the order the
    /// query requests.
    pub async fn search_read(&self, query: &PageQuery) -> Result<Vec<Value>, RpcClientError> {
        let args = vec![
            json!(self.config.database),
            json!(self.uid),
            json!(self.config.password),
            json!(query.entity),
            json!("search_read"),
            json!([encode_domain(&query.filter)]),
            json!({
                "fields": query.fields,
                "order": query.order,
                "limit": query.limit,
            }),
        ];
        let limit = usize::try_from(query.limit).unwrap_or(usize::MAX);

        let records = self
            .transport
            .call("object", "execute_kw", args, |result| match result {
                Value::Array(records) if records.len() <= limit => CallOutcome::Ok(records),
                Value::Array(records) => CallOutcome::retryable(RpcClientError::MalformedResponse(
                    format!("page of {} records exceeds limit {limit}", records.len()),
                )),
                other => CallOutcome::retryable(RpcClientError::MalformedResponse(format!(
                    "search_read returned {} instead of a list",
                    json_kind(&other)
                ))),
            })
            .await?;

        tracing::debug!(entity = %query.entity, records = records.len(), "fetched page");
        Ok(records)
    }
}

async fn authenticate(transport: &Transport, config: &RpcClientConfig) -> Result<i64, RpcClientError> {
    let args = vec![
        json!(config.database),
        json!(config.username),
        json!(config.password),
    ];

    let result = transport
        .call("common", "login", args, |result| match result {
            Value::Number(n) => match n.as_i64() {
                Some(uid) if uid > 0 => CallOutcome::Ok(uid),
                _ => CallOutcome::Fatal(RpcClientError::AuthenticationFailed(format!(
                    "login returned invalid uid {n}"
                ))),
            },
            Value::Bool(false) | Value::Null => CallOutcome::Fatal(
                RpcClientError::AuthenticationFailed("credentials rejected".to_string()),
            ),
            other => CallOutcome::Fatal(RpcClientError::MalformedResponse(format!(
                "login returned {}",
                json_kind(&other)
            ))),
        })
        .await;

    match result {
        Err(RpcClientError::HttpError { status, body })
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN =>
        {
            Err(RpcClientError::AuthenticationFailed(format!("HTTP {status}: {body}")))
        }
        other => other,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl RecordSource for RpcClient {
    async fn fetch_page(&self, query: &PageQuery) -> Result<Vec<Value>, RpcClientError> {
        self.search_read(query).await
    }
}
