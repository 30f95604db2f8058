//! SAP request executor.

use std::error::Error as _;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::{redirect, Client};
use tracing::{debug, info, warn};

use crate::auth::BasicAuth;
use crate::builder::{ComposedRequest, KeyLookupPlan, RequestBuilder};
use crate::config::Config;
use crate::envelope::{Normalizer, RawResponse, ResultEnvelope};
use crate::error::{ClientInitError, NetworkError};
use crate::odata::KeyStyle;

/// Status codes from the paren attempt that trigger the segment retry.
const KEY_MISS_STATUSES: [u16; 2] = [400, 404];

/// HTTP client for the configured SAP host.
#[derive(Clone)]
pub struct SapClient {
    config: Arc<Config>,
    http_client: Client,
    auth: BasicAuth,
    normalizer: Normalizer,
}

impl SapClient {
    /// Create a new SAP client.
    ///
    /// # Errors
    /// Returns `ClientInitError` if the HTTP client cannot be created.
    pub fn new(config: Arc<Config>) -> Result<Self, ClientInitError> {
        let verify = config.environment.verifies_certificates();
        if verify {
            info!(environment = ?config.environment, "TLS certificate verification enabled");
        } else {
            warn!(
                environment = ?config.environment,
                "TLS certificate verification DISABLED; set ENVIRONMENT=production to enable it"
            );
        }

        let http_client = Client::builder()
            .timeout(config.timeout())
            .redirect(redirect::Policy::none())
            .danger_accept_invalid_certs(!verify)
            .build()
            .map_err(|e| ClientInitError(e.to_string()))?;

        let auth = BasicAuth::from_config(&config);
        let normalizer = Normalizer::new(auth.redactor(&config));

        Ok(Self {
            config,
            http_client,
            auth,
            normalizer,
        })
    }

    /// Request builder bound to this client's configuration.
    pub fn builder(&self) -> RequestBuilder<'_> {
        RequestBuilder::new(&self.config)
    }

    /// Issue one request. Only the network call suspends; nothing shared is
    /// touched, so dropping the future on timeout leaves no partial state.
    pub async fn send(
        &self,
        request: &ComposedRequest,
        timeout: Duration,
    ) -> Result<RawResponse, NetworkError> {
        debug!(method = %request.method, url = %request.url, "SAP request");

        let mut builder = self
            .http_client
            .request(request.method.as_reqwest(), &request.url)
            .timeout(timeout)
            .header(AUTHORIZATION, self.auth.header_value());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }

        let call = async {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>(RawResponse { status, body })
        };

        match tokio::time::timeout(timeout, call).await {
            Err(_) => {
                warn!(url = %request.url, ?timeout, "SAP request timed out");
                Err(NetworkError::Timeout)
            }
            Ok(Err(e)) => {
                let error = classify(&e);
                warn!(url = %request.url, error = %error, "SAP request failed");
                Err(error)
            }
            Ok(Ok(raw)) => {
                debug!(status = raw.status, bytes = raw.body.len(), "SAP response");
                Ok(raw)
            }
        }
    }

    /// Issue a request with the configured timeout and normalize the outcome.
    pub async fn execute(&self, request: &ComposedRequest) -> ResultEnvelope {
        self.execute_with_timeout(request, self.config.timeout()).await
    }

    pub async fn execute_with_timeout(
        &self,
        request: &ComposedRequest,
        timeout: Duration,
    ) -> ResultEnvelope {
        let outcome = self.send(request, timeout).await;
        self.normalizer.normalize(&request.url, outcome)
    }

    /// Run a key lookup plan and report which addressing style answered.
    ///
    /// `ParenThenSegment` is two explicit steps: the paren form, then the
    /// segment form once, only when the paren form got a key-miss status.
    pub async fn execute_lookup(&self, plan: &KeyLookupPlan) -> (KeyStyle, ResultEnvelope) {
        let timeout = self.config.timeout();
        match plan {
            KeyLookupPlan::Single { style, request } => {
                (*style, self.execute_with_timeout(request, timeout).await)
            }
            KeyLookupPlan::ParenThenSegment { paren, segment } => {
                match self.send(paren, timeout).await {
                    Ok(raw) if KEY_MISS_STATUSES.contains(&raw.status) => {
                        debug!(
                            status = raw.status,
                            "Parenthesized key not accepted, retrying with segment key"
                        );
                        (KeyStyle::Segment, self.execute_with_timeout(segment, timeout).await)
                    }
                    outcome => (
                        KeyStyle::Paren,
                        self.normalizer.normalize(&paren.url, outcome),
                    ),
                }
            }
        }
    }
}

impl std::fmt::Debug for SapClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SapClient")
            .field("base_url", &self.config.base_url())
            .field("environment", &self.config.environment)
            .finish()
    }
}

/// Map a transport error to its failure class.
fn classify(error: &reqwest::Error) -> NetworkError {
    if error.is_timeout() {
        return NetworkError::Timeout;
    }
    if error.is_connect() {
        // The top-level message embeds the URL; only inspect the causes.
        let mut messages = Vec::new();
        let mut source = error.source();
        while let Some(inner) = source {
            messages.push(inner.to_string());
            source = inner.source();
        }
        let unreachable = messages.iter().any(|m| {
            let m = m.to_ascii_lowercase();
            m.contains("dns") || m.contains("resolve") || m.contains("unreachable") || m.contains("no route")
        });
        return if unreachable {
            NetworkError::Unreachable
        } else {
            NetworkError::ConnectionFailed
        };
    }
    NetworkError::ConnectionFailed
}
