//! Schema registry HTTP client.
//!
//! Read-only consumer of the registry wire contract: the latest schema
//! version for a subject. Registration and other write paths live outside
//! this crate.

use crate::config::TlsClientConfig;
use crate::error::SchemaFlowError;
use bytes::Bytes;
use hyper::client::HttpConnector;
use hyper::{header, Body, Client, Method, Request, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

const ACCEPT_HEADER: &str = "application/vnd.schemaregistry.v1+json";
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_ATTEMPTS: usize = 3;

/// Latest schema definition for a subject as returned by the registry.
/// Immutable once fetched; a new version is a new (id, schema) pair.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrySchema {
    pub schema: String,
    pub id: u32,
}

pub struct RegistryClient {
    client: Client<hyper_rustls::HttpsConnector<HttpConnector>, Body>,
    base_url: String,
}

impl RegistryClient {
    pub fn new(base_url: &str, tls: Option<&TlsClientConfig>) -> crate::Result<Self> {
        base_url
            .parse::<hyper::Uri>()
            .map_err(|e| SchemaFlowError::Config(format!("invalid registry url: {}", e)))?;

        let builder = hyper_rustls::HttpsConnectorBuilder::new();
        let connector = match tls {
            Some(tls) => builder
                .with_tls_config(tls.client_config()?)
                .https_or_http()
                .enable_http1()
                .build(),
            None => builder
                .with_native_roots()
                .https_or_http()
                .enable_http1()
                .build(),
        };
        let client = Client::builder()
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .build(connector);

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetches the latest schema version for a subject.
    ///
    /// Each attempt is bounded by a fixed deadline and up to three attempts
    /// are made in total. A 404 is terminal and never retried; any other
    /// failure is transient and surfaces as `RegistryUnavailable` once the
    /// attempt budget is exhausted. A malformed response body is terminal.
    pub async fn fetch_latest(&self, subject: &str) -> crate::Result<RegistrySchema> {
        let uri = format!("{}/subjects/{}/versions/latest", self.base_url, subject);

        let mut last_error = String::new();
        let mut body = None;
        for _ in 0..MAX_ATTEMPTS {
            match self.attempt(&uri).await {
                Ok(bytes) => {
                    body = Some(bytes);
                    break;
                }
                Err(AttemptError::NotFound) => {
                    return Err(SchemaFlowError::SubjectNotFound(subject.to_string()));
                }
                Err(AttemptError::Transient(e)) => {
                    warn!(subject, error = %e, "schema registry request failed");
                    last_error = e;
                }
            }
        }

        let body = body.ok_or_else(|| SchemaFlowError::RegistryUnavailable {
            subject: subject.to_string(),
            last_error,
        })?;

        serde_json::from_slice(&body).map_err(|e| {
            SchemaFlowError::SchemaInvalid(format!(
                "unparseable registry response for subject '{}': {}",
                subject, e
            ))
        })
    }

    async fn attempt(&self, uri: &str) -> Result<Bytes, AttemptError> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header(header::ACCEPT, ACCEPT_HEADER)
            .body(Body::empty())
            .map_err(|e| AttemptError::Transient(e.to_string()))?;

        let attempt = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| AttemptError::Transient(e.to_string()))?;

            match response.status() {
                StatusCode::NOT_FOUND => return Err(AttemptError::NotFound),
                status if !status.is_success() => {
                    return Err(AttemptError::Transient(format!(
                        "registry returned status {}",
                        status
                    )))
                }
                _ => {}
            }

            let bytes = hyper::body::to_bytes(response.into_body())
                .await
                .map_err(|e| AttemptError::Transient(e.to_string()))?;
            if bytes.is_empty() {
                return Err(AttemptError::Transient(
                    "registry returned an empty body".to_string(),
                ));
            }
            Ok(bytes)
        };

        match tokio::time::timeout(ATTEMPT_TIMEOUT, attempt).await {
            Ok(result) => result,
            Err(_) => Err(AttemptError::Transient(format!(
                "attempt exceeded {:?} deadline",
                ATTEMPT_TIMEOUT
            ))),
        }
    }
}

enum AttemptError {
    NotFound,
    Transient(String),
}

impl std::fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
