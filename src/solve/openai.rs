//! OpenAI Responses API solver (streaming).

use base64::Engine;
use serde_json::{json, Value};
use tracing::debug;

use super::sse::for_each_event;
use super::{image_media_type, Solver, SOLVE_PROMPT};

const RESPONSES_URL: &str = "https://api.openai.com/v1/responses";

/// Conversation state lives server-side; each call chains onto the
/// previous response id.
pub struct OpenAiSolver {
    api_key: String,
    model: String,
    max_tokens: u32,
    endpoint: String,
    previous_response_id: Option<String>,
    client: reqwest::Client,
}

/// What one stream event contributes.
#[derive(Debug, PartialEq, Eq)]
enum StreamItem<'a> {
    Delta(&'a str),
    Completed(&'a str),
    Other,
}

impl OpenAiSolver {
    pub fn new(api_key: &str, model: &str, max_tokens: u32) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            max_tokens,
            endpoint: RESPONSES_URL.to_string(),
            previous_response_id: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    fn request_body(&self, image: &[u8]) -> Value {
        let data = base64::engine::general_purpose::STANDARD.encode(image);
        let data_url = format!("data:{};base64,{}", image_media_type(image), data);

        let mut body = json!({
            "model": self.model,
            "max_output_tokens": self.max_tokens,
            "stream": true,
            "input": [{
                "role": "user",
                "content": [
                    { "type": "input_text", "text": SOLVE_PROMPT },
                    { "type": "input_image", "image_url": data_url, "detail": "high" },
                ]
            }],
        });
        if let Some(id) = &self.previous_response_id {
            body["previous_response_id"] = json!(id);
        }
        body
    }
}

fn classify(value: &Value) -> anyhow::Result<StreamItem<'_>> {
    match value["type"].as_str() {
        Some("response.output_text.delta") => Ok(value["delta"]
            .as_str()
            .map(StreamItem::Delta)
            .unwrap_or(StreamItem::Other)),
        Some("response.completed") => Ok(value["response"]["id"]
            .as_str()
            .map(StreamItem::Completed)
            .unwrap_or(StreamItem::Other)),
        Some("error") | Some("response.failed") => anyhow::bail!(
            "stream error: {}",
            value["message"]
                .as_str()
                .or_else(|| value["response"]["error"]["message"].as_str())
                .unwrap_or("unknown")
        ),
        _ => Ok(StreamItem::Other),
    }
}

impl Solver for OpenAiSolver {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn solve<F: FnMut(&str) + Send>(&mut self, image: &[u8], mut on_delta: F) -> anyhow::Result<String> {
        let body = self.request_body(image);
        debug!(
            bytes = image.len(),
            chained = self.previous_response_id.is_some(),
            "Sending capture to OpenAI"
        );

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("api call failed: OpenAI API error {}: {}", status, body);
        }

        let mut text = String::new();
        let mut completed_id: Option<String> = None;
        for_each_event(resp, |event| {
            let value: Value = serde_json::from_str(&event.data)?;
            match classify(&value)? {
                StreamItem::Delta(delta) => {
                    text.push_str(delta);
                    on_delta(delta);
                }
                StreamItem::Completed(id) => completed_id = Some(id.to_string()),
                StreamItem::Other => {}
            }
            Ok(())
        })
        .await?;

        if let Some(id) = completed_id {
            self.previous_response_id = Some(id);
        }
        anyhow::ensure!(!text.is_empty(), "no text in response");
        Ok(text)
    }
}
