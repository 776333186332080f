//! Remote embedding provider
//!
//! HTTP client for the external embedding API. Speaks the common
//! `{"model": ..., "input": ...}` → `{"data": [{"embedding": [...]}]}` shape.
//! Timeouts, retries and disablement are handled by the caller's resource
//! guard; this type only performs a single request per call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{EmbeddingError, EmbeddingProvider, Result};

/// Per-request HTTP timeout. The guard's deadline is the authoritative
/// bound; this keeps a hung TCP connection from pinning a worker past it.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// External embedding API client.
pub struct RemoteEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimension: usize,
}

impl RemoteEmbeddingProvider {
    pub fn new(endpoint: String, api_key: String, model: String, dimension: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            model,
            dimension,
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedEntry>,
}

#[derive(Debug, Deserialize)]
struct EmbedEntry {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbedRequest { model: &self.model, input: text };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(HTTP_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbeddingError::Provider(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Provider(format!("{status}: {body}")));
        }

        let payload: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Response(e.to_string()))?;

        let vector = payload
            .data
            .into_iter()
            .next()
            .map(|e| e.embedding)
            .ok_or_else(|| EmbeddingError::Response("empty data array".to_string()))?;

        if vector.len() != self.dimension {
            return Err(EmbeddingError::Dimension {
                expected: self.dimension,
                got: vector.len(),
            });
        }

        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// TESTS
// ============================================================================
