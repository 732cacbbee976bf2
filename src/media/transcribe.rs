//! Speech-to-text backend
//!
//! Audio files are transcribed through a whisper-compatible HTTP server.
//! The backend is initialized once per ingestion batch; a connection probe
//! at load time distinguishes a dead backend (job-level failure) from a
//! single bad file (recovered locally).

use crate::config::TranscribeConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// One time-aligned segment of a transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Full transcription result for one audio file
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    pub text: String,
    pub segments: Vec<TranscriptSegment>,
    pub language: String,
    pub duration_secs: Option<f64>,
}

/// Trait for speech-to-text providers
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one audio file
    async fn transcribe(&self, path: &Path) -> Result<Transcript>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// HTTP transcriber against an OpenAI-style `/audio/transcriptions` endpoint
#[derive(Debug)]
pub struct HttpTranscriber {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
    #[serde(default)]
    language: String,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    segments: Vec<ResponseSegment>,
}

#[derive(Debug, Deserialize)]
struct ResponseSegment {
    start: f64,
    end: f64,
    text: String,
}

impl HttpTranscriber {
    /// Connect to the backend and verify it is reachable
    pub async fn connect(config: &TranscribeConfig) -> Result<Self> {
        info!(
            "Initializing speech-to-text backend at {} (model {})",
            config.endpoint, config.model
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::ModelBackend(format!("Cannot build HTTP client: {}", e)))?;

        let probe = format!("{}/models", config.endpoint.trim_end_matches('/'));
        let response = client.get(&probe).send().await.map_err(|e| {
            Error::ModelBackend(format!(
                "Speech-to-text backend unreachable at {}: {}",
                config.endpoint, e
            ))
        })?;
        if !response.status().is_success() {
            return Err(Error::ModelBackend(format!(
                "Speech-to-text backend returned HTTP {} at {}",
                response.status(),
                probe
            )));
        }

        info!("Speech-to-text backend ready");
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, path: &Path) -> Result<Transcript> {
        debug!("Transcribing {:?}", path);

        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());

        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .part("file", part);

        let url = format!("{}/audio/transcriptions", self.endpoint);
        let response = self.client.post(&url).multipart(form).send().await?;

        if !response.status().is_success() {
            return Err(Error::ModelBackend(format!(
                "Transcription failed with HTTP {}",
                response.status()
            )));
        }

        let parsed: TranscriptionResponse = response.json().await?;
        Ok(Transcript {
            text: parsed.text,
            segments: parsed
                .segments
                .into_iter()
                .map(|s| TranscriptSegment {
                    start: s.start,
                    end: s.end,
                    text: s.text,
                })
                .collect(),
            language: parsed.language,
            duration_secs: parsed.duration,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(endpoint: String) -> TranscribeConfig {
        TranscribeConfig {
            endpoint,
            model: "whisper-base".to_string(),
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_connect_probes_backend() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let transcriber = HttpTranscriber::connect(&test_config(server.uri())).await.unwrap();
        assert_eq!(transcriber.model_name(), "whisper-base");
    }

    #[tokio::test]
    async fn test_connect_fails_when_backend_down() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = HttpTranscriber::connect(&test_config(server.uri())).await.unwrap_err();
        assert!(matches!(err, Error::ModelBackend(_)));
    }

    #[tokio::test]
    async fn test_transcribe_parses_verbose_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "text": "hello from the past",
                "language": "en",
                "duration": 3.5,
                "segments": [
                    {"start": 0.0, "end": 1.2, "text": "hello"},
                    {"start": 1.2, "end": 3.5, "text": "from the past"}
                ]
            })))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let audio_path = dir.path().join("voice.mp3");
        std::fs::write(&audio_path, b"fake audio bytes").unwrap();

        let transcriber = HttpTranscriber::connect(&test_config(server.uri())).await.unwrap();
        let transcript = transcriber.transcribe(&audio_path).await.unwrap();

        assert_eq!(transcript.text, "hello from the past");
        assert_eq!(transcript.language, "en");
        assert_eq!(transcript.duration_secs, Some(3.5));
        assert_eq!(transcript.segments.len(), 2);
        assert_eq!(transcript.segments[1].text, "from the past");
    }
}
