use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

/// External text-extraction collaborator.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, storage_url: &str) -> anyhow::Result<String>;
}

/// External AI-analysis collaborator.
#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    async fn analyze(&self, text: &str) -> anyhow::Result<Value>;
}

/// key: analysis-clients -> reqwest JSON adapters
pub struct HttpTextExtractor {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTextExtractor {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExtractionResponse {
    text: String,
}

#[async_trait]
impl TextExtractor for HttpTextExtractor {
    async fn extract(&self, storage_url: &str) -> anyhow::Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "document_url": storage_url }))
            .send()
            .await?
            .error_for_status()?
            .json::<ExtractionResponse>()
            .await?;
        Ok(response.text)
    }
}

pub struct HttpDocumentAnalyzer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDocumentAnalyzer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl DocumentAnalyzer for HttpDocumentAnalyzer {
    async fn analyze(&self, text: &str) -> anyhow::Result<Value> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "text": text }))
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;
        Ok(response)
    }
}
