use crate::config::{ClientConfig, ClientParams};
use crate::error::{ClientError, Result};
use crate::health::HealthState;
use crate::response::{collapse_newlines, decode_list, decode_one, SecretMap};
use crate::retry::{escape_segment, Payload, RequestOutcome, RetryExecutor, RetryPolicy};
use crate::secret::Secret;
use crate::transport::{TlsPolicy, Transport, TransportBuilder};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tracing::{Instrument, Span};

const STATUS_PATH: &str = "_status";
const SECRETS_PATH: &str = "secrets";
const BATCH_SECRET_PATH: &str = "batchsecret";
const SECRET_PATH: &str = "secret";

/// Relative path of a single secret. `.` and `..` would be resolved as path steps, so
/// they are refused before anything reaches the wire.
fn secret_path(name: &str) -> Result<String> {
    match name {
        "" | "." | ".." => Err(ClientError::InvalidSecretName {
            name: name.to_string(),
        }),
        name => Ok(format!("{}/{}", SECRET_PATH, escape_segment(name))),
    }
}

/// Retrieval surface of a secrets backend.
#[async_trait]
pub trait SecretsClient: Send + Sync {
    /// A single secret with its contents. A secret that no longer exists yields
    /// [`ClientError::SecretDeleted`].
    async fn secret(&self, name: &str) -> Result<Secret>;

    /// All secrets visible to this client, without contents.
    async fn secret_list(&self) -> Result<SecretMap>;

    /// The named secrets with contents. Every secret must be accessible or the whole
    /// request fails.
    async fn secret_list_with_contents(&self, names: &[String]) -> Result<SecretMap>;

    /// Span every request of this client is recorded under.
    fn logger(&self) -> &Span;

    /// Reload certificates from disk.
    fn rebuild_client(&self) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct BatchSecretRequest<'a> {
    secrets: &'a [String],
}

/// Client for the v2 HTTP API over mutual TLS.
pub struct HttpSecretsClient {
    span: Span,
    params: ClientParams,
    builder: TransportBuilder,
    transport: RwLock<Arc<Transport>>,
    executor: RetryExecutor,
    health: HealthState,
}

impl HttpSecretsClient {
    /// Validate `config` and load the initial key pair. Fails before any network
    /// activity if a duration or file is bad.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Self::with_policy(config, TlsPolicy::restricted())
    }

    pub fn with_policy(config: &ClientConfig, policy: TlsPolicy) -> Result<Self> {
        let params = config.validate()?;
        let builder = TransportBuilder::new(policy);
        let transport = builder.build(&params)?;
        let executor = RetryExecutor::new(params.server_url.clone(), RetryPolicy::from(&params));
        let span = tracing::info_span!("keysync_client", server = %params.server_url);

        Ok(Self {
            span,
            params,
            builder,
            transport: RwLock::new(Arc::new(transport)),
            executor,
            health: HealthState::new(),
        })
    }

    pub fn params(&self) -> &ClientParams {
        &self.params
    }

    pub fn health(&self) -> &HealthState {
        &self.health
    }

    fn current_transport(&self) -> Arc<Transport> {
        let guard = self.transport.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Build a fresh transport from the configured files and swap it in. Requests
    /// already running keep the transport they started with. On failure the
    /// current transport stays active.
    pub fn rebuild_transport(&self) -> Result<()> {
        let _entered = self.span.enter();
        let transport = match self.builder.build(&self.params) {
            Ok(transport) => transport,
            Err(e) => {
                tracing::error!(error = %e, "Failed to rebuild transport, keeping the previous one");
                return Err(e);
            }
        };
        *self.transport.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(transport);
        tracing::debug!("Transport rebuilt");
        Ok(())
    }

    async fn exchange(
        &self,
        method: Method,
        path: &str,
        payload: Option<Payload>,
    ) -> Result<RequestOutcome> {
        let transport = self.current_transport();
        let started = Instant::now();
        let result = self
            .executor
            .execute(&transport, method.clone(), path, payload)
            .await;
        match &result {
            Ok(outcome) => tracing::info!(
                method = %method,
                path = %path,
                status = outcome.status,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Request completed"
            ),
            Err(e) => tracing::error!(
                method = %method,
                path = %path,
                error = %e,
                "Request failed"
            ),
        }
        result
    }

    /// Raw JSON of the server's `_status` endpoint, whatever its status code.
    pub async fn server_status(&self) -> Result<Bytes> {
        let outcome = self
            .exchange(Method::GET, STATUS_PATH, None)
            .instrument(self.span.clone())
            .await?;
        Ok(outcome.body)
    }

    /// Raw JSON of a single secret.
    pub async fn raw_secret(&self, name: &str) -> Result<Bytes> {
        let path = secret_path(name)?;
        async {
            let result = self.exchange(Method::GET, &path, None).await;
            self.settle(result, &format!("secret '{name}'"), true)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Raw JSON of the listing without contents.
    pub async fn raw_secret_list(&self) -> Result<Bytes> {
        async {
            let result = self.exchange(Method::GET, SECRETS_PATH, None).await;
            self.settle(result, "secrets without contents", false)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Raw JSON of the batch listing with contents.
    pub async fn raw_secret_list_with_contents(&self, names: &[String]) -> Result<Bytes> {
        async {
            let body = match serde_json::to_vec(&BatchSecretRequest { secrets: names }) {
                Ok(body) => body,
                Err(e) => {
                    tracing::error!(error = %e, "Error creating request to retrieve secrets with contents");
                    self.health.record_failure();
                    return Err(ClientError::from(e));
                }
            };

            let result = self
                .exchange(Method::POST, BATCH_SECRET_PATH, Some(Payload::json(body)))
                .await;
            self.settle(result, "secrets with contents", false)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Health accounting for every retrieval endpoint. A 404 on a single secret means
    /// it was deleted and leaves the health state alone.
    fn settle(
        &self,
        result: Result<RequestOutcome>,
        goal: &str,
        not_found_is_deleted: bool,
    ) -> Result<Bytes> {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                self.health.record_failure();
                return Err(e);
            }
        };

        match outcome.status {
            _ if outcome.is_success() => {
                self.health.record_success();
                Ok(outcome.body)
            }
            404 if not_found_is_deleted => {
                tracing::warn!("Not found getting {}", goal);
                Err(ClientError::SecretDeleted)
            }
            status => {
                let message = collapse_newlines(&outcome.body);
                tracing::warn!(
                    status,
                    message = %message,
                    "Bad response code getting {}",
                    goal
                );
                self.health.record_failure();
                Err(ClientError::BadStatus { status, message })
            }
        }
    }

    fn decoded<T>(&self, result: Result<T>, what: &str) -> Result<T> {
        if let Err(ref e) = result {
            tracing::error!(parent: &self.span, error = %e, "Error decoding retrieved {}", what);
        }
        result
    }
}

#[async_trait]
impl SecretsClient for HttpSecretsClient {
    async fn secret(&self, name: &str) -> Result<Secret> {
        let data = self.raw_secret(name).await?;
        self.decoded(decode_one(&data), "secret")
    }

    async fn secret_list(&self) -> Result<SecretMap> {
        let data = self.raw_secret_list().await?;
        self.decoded(decode_list(&data), "secrets")
    }

    async fn secret_list_with_contents(&self, names: &[String]) -> Result<SecretMap> {
        let data = self.raw_secret_list_with_contents(names).await?;
        self.decoded(decode_list(&data), "secrets with contents")
    }

    fn logger(&self) -> &Span {
        &self.span
    }

    fn rebuild_client(&self) -> Result<()> {
        self.rebuild_transport()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_request_serialization() {
        let names = vec!["db-password".to_string(), "api_token".to_string()];
        let json = serde_json::to_string(&BatchSecretRequest { secrets: &names }).unwrap();
        assert_eq!(json, r#"{"secrets":["db-password","api_token"]}"#);
    }

    #[test]
    fn test_secret_path_is_one_segment() {
        assert_eq!(secret_path("db-password").unwrap(), "secret/db-password");
        assert_eq!(secret_path("team/api key").unwrap(), "secret/team%2Fapi%20key");
        assert_eq!(secret_path("..x").unwrap(), "secret/..x");
        for name in ["", ".", ".."] {
            assert!(matches!(
                secret_path(name),
                Err(ClientError::InvalidSecretName { .. })
            ));
        }
    }

    #[test]
    fn test_secret_target_stays_under_secret_prefix() {
        let base = reqwest::Url::parse("https://keywhiz.example.com:4444/api/").unwrap();
        let executor = RetryExecutor::new(
            base,
            RetryPolicy {
                max_retries: 1,
                min_backoff: std::time::Duration::from_millis(1),
                max_backoff: std::time::Duration::from_millis(1),
            },
        );
        for name in ["../x", "a/../../b", "%2E%2E", "...", "~"] {
            let target = executor.target(&secret_path(name).unwrap());
            assert!(
                target.path().starts_with("/api/secret/"),
                "{name} -> {target}"
            );
            assert_eq!(target.path_segments().unwrap().count(), 3, "{name} -> {target}");
        }
    }

    #[test]
    fn test_new_fails_before_network_on_bad_duration() {
        let config = ClientConfig::new("/missing.crt", "/missing.key", "/missing-ca.crt", "https://localhost:1")
            .backoff("1ms", "later");
        assert!(matches!(
            HttpSecretsClient::new(&config),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn test_new_fails_on_missing_certificate() {
        let config =
            ClientConfig::new("/missing.crt", "/missing.key", "/missing-ca.crt", "https://localhost:1");
        assert!(matches!(
            HttpSecretsClient::new(&config),
            Err(ClientError::CertificateLoad { .. })
        ));
    }
}
