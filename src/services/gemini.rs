// Gemini streaming client for batched image extraction

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::TryStreamExt;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::core::types::WorkItem;
use crate::services::aggregate;
use crate::services::normalize::NOT_FOUND;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Backend seam for one batched extraction call.
///
/// The orchestrator only depends on this trait, so tests substitute a fake
/// and the retry logic never knows which backend answered.
#[async_trait]
pub trait BatchExtractor: Send + Sync {
    /// Sends one batch and returns the aggregated answer text, one line per
    /// image in input order.
    async fn extract_batch(&self, api_key: &str, items: &[WorkItem], prompt: &str)
        -> Result<String>;
}

/// HTTP client for the Gemini streaming generate-content endpoint.
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(model: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
        })
    }

    /// Points the client at a different endpoint root. Used by tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_request(&self, items: &[WorkItem], prompt: &str) -> Value {
        let mut parts: Vec<Value> = items
            .iter()
            .map(|item| {
                json!({
                    "inline_data": {
                        "mime_type": item.mime_type,
                        "data": BASE64.encode(item.bytes.as_slice()),
                    }
                })
            })
            .collect();

        let instruction = format!(
            "{prompt}. Answer with exactly one line per image, in order ({} images). \
             If an image contains no phone number, write {NOT_FOUND} on its line.",
            items.len()
        );
        parts.push(json!({ "text": instruction }));

        json!({ "contents": [{ "parts": parts }] })
    }
}

#[async_trait]
impl BatchExtractor for GeminiClient {
    async fn extract_batch(
        &self,
        api_key: &str,
        items: &[WorkItem],
        prompt: &str,
    ) -> Result<String> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, self.model, api_key
        );
        debug!(model = %self.model, batch_len = items.len(), "Dispatching batch");

        // transport errors quote the request URL, which both carries the API
        // key and contains text that confuses failure classification; drop it
        let response = self
            .http
            .post(&url)
            .json(&self.build_request(items, prompt))
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .context("Failed to send request")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            // the status code stays in the message so failure classification
            // can recognize quota responses
            anyhow::bail!("API request failed: {} - {}", status, detail);
        }

        let body = response.bytes_stream().map_err(reqwest::Error::without_url);
        aggregate::collect_sse(body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_one_part_per_image_plus_instruction() {
        let client = GeminiClient::new("gemma-3-27b-it").unwrap();
        let items = vec![
            WorkItem::new("a.jpg", "image/jpeg", vec![1, 2, 3]),
            WorkItem::new("b.png", "image/png", vec![4, 5]),
        ];
        let body = client.build_request(&items, "Extract the number");

        let parts = body
            .pointer("/contents/0/parts")
            .and_then(Value::as_array)
            .unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(
            parts[0].pointer("/inline_data/mime_type").unwrap(),
            "image/jpeg"
        );
        assert_eq!(
            parts[1].pointer("/inline_data/data").unwrap(),
            &json!(BASE64.encode([4u8, 5]))
        );
        let instruction = parts[2]["text"].as_str().unwrap();
        assert!(instruction.contains("2 images"));
        assert!(instruction.contains(NOT_FOUND));
    }
}
