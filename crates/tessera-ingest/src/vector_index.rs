//! HTTP vector index backend implementation.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument};

use tessera_core::{defaults, Error, Result, VectorDocument, VectorIndex};

/// Default vector index endpoint.
pub const DEFAULT_VECTOR_INDEX_URL: &str = defaults::VECTOR_INDEX_URL;

/// Timeout for vector index requests (seconds).
pub const VECTOR_INDEX_TIMEOUT_SECS: u64 = defaults::VECTOR_INDEX_TIMEOUT_SECS;

/// Vector index backend speaking the collection HTTP API.
///
/// The index embeds submitted documents server-side and returns one
/// vector id per document, in submission order.
pub struct HttpVectorIndex {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct AddDocumentsRequest<'a> {
    model: &'a str,
    documents: &'a [VectorDocument],
}

#[derive(Deserialize)]
struct AddDocumentsResponse {
    vector_ids: Vec<String>,
}

#[derive(Serialize)]
struct DeleteDocumentsRequest<'a> {
    vector_ids: &'a [String],
}

impl HttpVectorIndex {
    /// Create a new backend with default settings.
    pub fn new() -> Result<Self> {
        Self::with_config(
            DEFAULT_VECTOR_INDEX_URL.to_string(),
            defaults::EMBED_MODEL.to_string(),
        )
    }

    /// Create a new backend with custom configuration.
    pub fn with_config(base_url: String, model: String) -> Result<Self> {
        let timeout_secs = std::env::var("VECTOR_INDEX_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(VECTOR_INDEX_TIMEOUT_SECS);

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        info!(
            "Initializing vector index backend: url={}, model={}",
            base_url, model
        );

        Ok(Self {
            client,
            base_url,
            model,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("VECTOR_INDEX_URL")
            .unwrap_or_else(|_| DEFAULT_VECTOR_INDEX_URL.to_string());
        let model =
            std::env::var("EMBED_MODEL").unwrap_or_else(|_| defaults::EMBED_MODEL.to_string());

        Self::with_config(base_url, model)
    }
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    #[instrument(skip(self, documents), fields(count = documents.len()))]
    async fn add_documents(&self, documents: &[VectorDocument]) -> Result<Vec<String>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/documents", self.base_url);
        let request = AddDocumentsRequest {
            model: &self.model,
            documents,
        };

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::VectorIndex(format!(
                "add_documents failed with status {status}: {body}"
            )));
        }

        let parsed: AddDocumentsResponse = response
            .json()
            .await
            .map_err(|e| Error::VectorIndex(format!("invalid add_documents response: {e}")))?;

        debug!(
            submitted = documents.len(),
            returned = parsed.vector_ids.len(),
            "Indexed documents"
        );
        Ok(parsed.vector_ids)
    }

    #[instrument(skip(self, vector_ids), fields(count = vector_ids.len()))]
    async fn delete_by_ids(&self, vector_ids: &[String]) -> Result<()> {
        if vector_ids.is_empty() {
            return Ok(());
        }

        let url = format!("{}/documents/delete", self.base_url);
        let request = DeleteDocumentsRequest { vector_ids };

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::VectorIndex(format!(
                "delete_by_ids failed with status {status}: {body}"
            )));
        }

        Ok(())
    }
}
