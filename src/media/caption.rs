//! Image captioning backend
//!
//! Captions come from a vision-capable chat model behind an OpenAI-style
//! endpoint; the image travels inline as a base64 data URL. Like the
//! speech-to-text backend, the captioner is initialized once per batch with
//! a reachability probe.

use crate::config::{CaptionConfig, ChatConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

/// Trait for image captioning providers
#[async_trait]
pub trait Captioner: Send + Sync {
    /// Produce a short natural-language description of a PNG-encoded image
    async fn caption(&self, image_png: &[u8]) -> Result<String>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// HTTP captioner against an OpenAI-style vision chat endpoint
pub struct HttpCaptioner {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    prompt: String,
}

impl HttpCaptioner {
    /// Connect to the backend and verify it is reachable
    ///
    /// An empty caption endpoint falls back to the chat endpoint.
    pub async fn connect(config: &CaptionConfig, chat: &ChatConfig) -> Result<Self> {
        let endpoint = if config.endpoint.is_empty() {
            chat.endpoint.clone()
        } else {
            config.endpoint.clone()
        };

        info!(
            "Initializing captioning backend at {} (model {})",
            endpoint, config.model
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(chat.timeout_secs))
            .build()
            .map_err(|e| Error::ModelBackend(format!("Cannot build HTTP client: {}", e)))?;

        let probe = format!("{}/models", endpoint.trim_end_matches('/'));
        let response = client.get(&probe).send().await.map_err(|e| {
            Error::ModelBackend(format!("Captioning backend unreachable at {}: {}", endpoint, e))
        })?;
        if !response.status().is_success() {
            return Err(Error::ModelBackend(format!(
                "Captioning backend returned HTTP {} at {}",
                response.status(),
                probe
            )));
        }

        info!("Captioning backend ready");
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            prompt: config.prompt.clone(),
        })
    }
}

#[async_trait]
impl Captioner for HttpCaptioner {
    async fn caption(&self, image_png: &[u8]) -> Result<String> {
        debug!("Captioning image ({} bytes)", image_png.len());

        let data_url = format!("data:image/png;base64,{}", STANDARD.encode(image_png));
        let body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": self.prompt},
                    {"type": "image_url", "image_url": {"url": data_url}}
                ]
            }]
        });

        let url = format!("{}/chat/completions", self.endpoint);
        let response = self.client.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(Error::ModelBackend(format!(
                "Captioning failed with HTTP {}",
                response.status()
            )));
        }

        let parsed: serde_json::Value = response.json().await?;
        let caption = parsed["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| Error::ModelBackend("No caption in response".to_string()))?
            .trim()
            .to_string();

        Ok(caption)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
