use crate::{
    errors::ProviderError, image, providers::vision::VisionProvider, types::ImageReference,
};
use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

// --- Ollama chat request and response structures ---

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct OllamaMessage<'a> {
    role: &'static str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
}

#[derive(Deserialize, Debug)]
struct OllamaChatResponse {
    message: Option<OllamaResponseMessage>,
}

#[derive(Deserialize, Debug)]
struct OllamaResponseMessage {
    content: String,
}

// --- Ollama provider implementation ---

/// Adapter for a self-hosted Ollama chat server.
///
/// Vision models take the prompt as a plain content string plus a list of
/// base64-encoded images. Requests are single-shot: a failure is terminal
/// and reported once, with no retry.
#[derive(Clone, Debug)]
pub struct OllamaProvider {
    client: ReqwestClient,
    chat_url: String,
    model: Option<String>,
}

impl OllamaProvider {
    pub fn new(host: &str, model: Option<String>) -> Result<Self, ProviderError> {
        let client = ReqwestClient::builder()
            .build()
            .map_err(ProviderError::ClientBuild)?;
        Ok(Self {
            client,
            chat_url: format!("{}/api/chat", host.trim_end_matches('/')),
            model,
        })
    }
}

#[async_trait]
impl VisionProvider for OllamaProvider {
    async fn describe(
        &self,
        image: &ImageReference,
        user_prompt: &str,
        system_prompt: Option<&str>,
        model: Option<&str>,
    ) -> Result<String, ProviderError> {
        let model = model
            .or(self.model.as_deref())
            .ok_or_else(|| ProviderError::MissingModel("ollama".to_string()))?;
        let img_b64 = image::fetch_base64(&self.client, image).await?;
        debug!("Sending Ollama chat request for {image} with model {model}");

        let mut messages = Vec::new();
        if let Some(system) = system_prompt {
            messages.push(OllamaMessage {
                role: "system",
                content: system,
                images: None,
            });
        }
        messages.push(OllamaMessage {
            role: "user",
            content: user_prompt,
            images: Some(vec![img_b64]),
        });

        let response = self
            .client
            .post(&self.chat_url)
            .timeout(REQUEST_TIMEOUT)
            .json(&OllamaChatRequest {
                model,
                messages,
                stream: false,
            })
            .send()
            .await
            .map_err(ProviderError::Request)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OllamaChatResponse = response
            .json()
            .await
            .map_err(ProviderError::Deserialization)?;
        Ok(parsed.message.map(|m| m.content).unwrap_or_default())
    }
}
