//! Anthropic Messages API solver (streaming).

use base64::Engine;
use serde_json::{json, Value};
use tracing::debug;

use super::sse::for_each_event;
use super::{image_media_type, Solver, SOLVE_PROMPT};

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Keeps the whole conversation so follow-up captures build on earlier
/// answers.
pub struct AnthropicSolver {
    api_key: String,
    model: String,
    max_tokens: u32,
    endpoint: String,
    history: Vec<Value>,
    client: reqwest::Client,
}

impl AnthropicSolver {
    pub fn new(api_key: &str, model: &str, max_tokens: u32) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            max_tokens,
            endpoint: MESSAGES_URL.to_string(),
            history: Vec::new(),
            client: reqwest::Client::new(),
        }
    }

    /// Point at a different Messages endpoint (proxies, tests).
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    async fn stream_answer<F: FnMut(&str) + Send>(&self, on_delta: &mut F) -> anyhow::Result<String> {
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "stream": true,
            "messages": self.history,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Anthropic API error {}: {}", status, body);
        }

        let mut text = String::new();
        for_each_event(resp, |event| {
            let value: Value = serde_json::from_str(&event.data)?;
            if let Some(delta) = text_delta(&value)? {
                text.push_str(delta);
                on_delta(delta);
            }
            Ok(())
        })
        .await?;
        Ok(text)
    }
}

/// Text carried by one stream event, if any. Error events fail the stream.
fn text_delta(value: &Value) -> anyhow::Result<Option<&str>> {
    match value["type"].as_str() {
        Some("content_block_delta") if value["delta"]["type"] == "text_delta" => {
            Ok(value["delta"]["text"].as_str())
        }
        Some("error") => anyhow::bail!(
            "stream error: {}",
            value["error"]["message"].as_str().unwrap_or("unknown")
        ),
        _ => Ok(None),
    }
}

impl Solver for AnthropicSolver {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn solve<F: FnMut(&str) + Send>(&mut self, image: &[u8], mut on_delta: F) -> anyhow::Result<String> {
        let data = base64::engine::general_purpose::STANDARD.encode(image);
        self.history.push(json!({
            "role": "user",
            "content": [
                {
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": image_media_type(image),
                        "data": data,
                    }
                },
                { "type": "text", "text": SOLVE_PROMPT },
            ]
        }));
        debug!(bytes = image.len(), turns = self.history.len(), "Sending capture to Anthropic");

        let result = self.stream_answer(&mut on_delta).await;
        let text = match result {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => {
                self.history.pop();
                anyhow::bail!("no text in response");
            }
            Err(e) => {
                self.history.pop();
                return Err(e.context("api call failed"));
            }
        };

        self.history.push(json!({
            "role": "assistant",
            "content": [{ "type": "text", "text": text }],
        }));
        Ok(text)
    }
}
