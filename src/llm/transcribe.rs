//! Whisper-compatible HTTP transcription adapter.
//!
//! Fetches the audio behind an `audio_ref` URL and posts it as multipart
//! form data to a Whisper-style `/audio/transcriptions` endpoint.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::adapters::Transcriber;
use crate::error::{Error, Result};

pub struct HttpTranscriber {
    http: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    model: String,
}

impl HttpTranscriber {
    pub fn new(endpoint: &str, api_key: SecretString) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
            api_key,
            model: "whisper-large-v3".to_string(),
        }
    }

    async fn fetch_audio(&self, audio_ref: &str) -> Result<Vec<u8>> {
        let response = self.http.get(audio_ref).send().await?;
        if !response.status().is_success() {
            return Err(Error::TranscriptionFailed {
                audio_ref: audio_ref.to_string(),
                reason: format!("audio fetch returned {}", response.status()),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, audio_ref: &str) -> Result<String> {
        let audio = self.fetch_audio(audio_ref).await?;

        let part = reqwest::multipart::Part::bytes(audio)
            .file_name("voice.ogg")
            .mime_str("audio/ogg")
            .map_err(|e| Error::TranscriptionFailed {
                audio_ref: audio_ref.to_string(),
                reason: e.to_string(),
            })?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::TranscriptionFailed {
                audio_ref: audio_ref.to_string(),
                reason: format!("transcription endpoint returned {}", response.status()),
            });
        }

        let body: TranscriptionResponse =
            response.json().await.map_err(|e| Error::TranscriptionFailed {
                audio_ref: audio_ref.to_string(),
                reason: format!("bad transcription response: {e}"),
            })?;

        let text = body.text.trim().to_string();
        if text.is_empty() {
            return Err(Error::TranscriptionFailed {
                audio_ref: audio_ref.to_string(),
                reason: "empty transcript".to_string(),
            });
        }
        Ok(text)
    }
}
