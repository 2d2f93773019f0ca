//! HTTP-backed upstream providers
//!
//! Concrete implementations of the engine's provider contracts against
//! plain JSON endpoints. Transport failures surface as `ServiceDegraded`
//! so the engine's retry and breaker machinery treats them as retryable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use engram_core::{
    Classification, Embedding, EmbeddingProvider, Error, IdentityValidator, Result,
    SaveClassifier, ValidationReport,
};

/// Connect/request timeout for provider calls; the engine applies its own
/// overall budget on top
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(25);

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(PROVIDER_TIMEOUT)
        .build()
        .unwrap_or_default()
}

fn degraded(upstream: &str, e: impl std::fmt::Display) -> Error {
    Error::ServiceDegraded(format!("{upstream}: {e}"))
}

// ============================================================================
// EMBEDDING
// ============================================================================

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// Embedding provider speaking `POST {url} {"text": ...}`
pub struct HttpEmbedder {
    client: reqwest::Client,
    url: String,
    dimensions: usize,
}

impl HttpEmbedder {
    pub fn new(url: impl Into<String>, dimensions: usize) -> Self {
        Self {
            client: client(),
            url: url.into(),
            dimensions,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let response = self
            .client
            .post(&self.url)
            .json(&EmbedRequest { text })
            .send()
            .await
            .map_err(|e| degraded("embedding provider", e))?;
        let response = response
            .error_for_status()
            .map_err(|e| degraded("embedding provider", e))?;
        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| degraded("embedding provider", e))?;

        if body.embedding.len() != self.dimensions {
            return Err(Error::Internal(format!(
                "embedding provider returned {} dimensions, expected {}",
                body.embedding.len(),
                self.dimensions
            )));
        }
        Ok(Embedding::new(body.embedding))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClassifyRequest<'a> {
    text: &'a str,
    context: Option<&'a str>,
}

/// Auto-save classifier speaking `POST {url} {"text": ..., "context": ...}`
pub struct HttpClassifier {
    client: reqwest::Client,
    url: String,
}

impl HttpClassifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: client(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl SaveClassifier for HttpClassifier {
    async fn classify(&self, text: &str, context: Option<&str>) -> Result<Classification> {
        let response = self
            .client
            .post(&self.url)
            .json(&ClassifyRequest { text, context })
            .send()
            .await
            .map_err(|e| degraded("classifier", e))?;
        let response = response
            .error_for_status()
            .map_err(|e| degraded("classifier", e))?;
        response.json().await.map_err(|e| degraded("classifier", e))
    }
}

// ============================================================================
// IDENTITY VALIDATOR
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidateRequest<'a> {
    agent_identity: &'a str,
    response_text: &'a str,
}

/// Identity validator speaking `POST {url}`
pub struct HttpValidator {
    client: reqwest::Client,
    url: String,
}

impl HttpValidator {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: client(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl IdentityValidator for HttpValidator {
    async fn validate(
        &self,
        agent_identity: &str,
        response_text: &str,
    ) -> Result<ValidationReport> {
        let response = self
            .client
            .post(&self.url)
            .json(&ValidateRequest {
                agent_identity,
                response_text,
            })
            .send()
            .await
            .map_err(|e| degraded("identity validator", e))?;
        let response = response
            .error_for_status()
            .map_err(|e| degraded("identity validator", e))?;
        response
            .json()
            .await
            .map_err(|e| degraded("identity validator", e))
    }
}
