use crate::{
    errors::ProviderError, image, providers::vision::VisionProvider, types::ImageReference,
};
use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// OpenRouter chat completions endpoint.
pub const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Model used when neither the call nor the provider specifies one.
pub const DEFAULT_OPENROUTER_MODEL: &str = "google/gemini-2.5-flash";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

// --- OpenAI-style request and response structures ---

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    content: String,
}

// --- OpenRouter provider implementation ---

/// Adapter for the hosted OpenRouter gateway.
///
/// Images are always fetched client-side and re-encoded as base64 data URLs
/// before transmission. Rate-limit (429) responses and network-level
/// failures are retried with exponential backoff; any other non-success
/// status is terminal.
#[derive(Clone, Debug)]
pub struct OpenRouterProvider {
    client: ReqwestClient,
    api_url: String,
    api_key: String,
    model: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl OpenRouterProvider {
    /// Creates a new provider, resolving the API key from the argument or
    /// the `OPENROUTER_API_KEY` environment variable. A missing key fails
    /// here, before any network call is attempted.
    pub fn new(api_key: Option<String>) -> Result<Self, ProviderError> {
        let api_key = api_key
            .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
            .filter(|key| !key.is_empty())
            .ok_or(ProviderError::MissingApiKey)?;
        let client = ReqwestClient::builder()
            .build()
            .map_err(ProviderError::ClientBuild)?;
        Ok(Self {
            client,
            api_url: OPENROUTER_API_URL.to_string(),
            api_key,
            model: DEFAULT_OPENROUTER_MODEL.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    /// Overrides the endpoint URL (used by tests against a mock server).
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Tunes the retry budget and base backoff delay.
    pub fn with_retry(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// Text-only chat completion, used for metadata extraction from a
    /// caption without re-presenting the image.
    pub async fn chat(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        model: Option<&str>,
    ) -> Result<String, ProviderError> {
        let messages = vec![
            ChatMessage {
                role: "system",
                content: MessageContent::Text(system_prompt.to_string()),
            },
            ChatMessage {
                role: "user",
                content: MessageContent::Text(user_prompt.to_string()),
            },
        ];
        self.post_chat(&ChatRequest {
            model: model.unwrap_or(&self.model),
            messages,
        })
        .await
    }

    /// Sends a chat request, retrying 429s and network failures with
    /// `retry_delay * 2^attempt` backoff up to the retry budget.
    async fn post_chat(&self, request: &ChatRequest<'_>) -> Result<String, ProviderError> {
        let mut attempt: u32 = 0;
        loop {
            let result = self
                .client
                .post(&self.api_url)
                .bearer_auth(&self.api_key)
                .timeout(REQUEST_TIMEOUT)
                .json(request)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed: ChatResponse = response
                            .json()
                            .await
                            .map_err(ProviderError::Deserialization)?;
                        return Ok(parsed
                            .choices
                            .first()
                            .map(|c| c.message.content.clone())
                            .unwrap_or_default());
                    }
                    if status.as_u16() == 429 && attempt + 1 < self.max_retries {
                        let delay = self.retry_delay * 2u32.pow(attempt);
                        warn!(
                            "OpenRouter rate limited, retrying in {delay:?} (attempt {}/{})",
                            attempt + 1,
                            self.max_retries
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    let body = response.text().await.unwrap_or_default();
                    return Err(ProviderError::Api {
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(error) => {
                    if attempt + 1 < self.max_retries {
                        let delay = self.retry_delay * 2u32.pow(attempt);
                        warn!(
                            "OpenRouter request failed ({error}), retrying in {delay:?} (attempt {}/{})",
                            attempt + 1,
                            self.max_retries
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(ProviderError::Request(error));
                }
            }
        }
    }
}

#[async_trait]
impl VisionProvider for OpenRouterProvider {
    async fn describe(
        &self,
        image: &ImageReference,
        user_prompt: &str,
        system_prompt: Option<&str>,
        model: Option<&str>,
    ) -> Result<String, ProviderError> {
        let data_url = image::fetch_data_url(&self.client, image).await?;
        debug!("Sending multimodal chat request for {image}");

        let mut messages = Vec::new();
        if let Some(system) = system_prompt {
            messages.push(ChatMessage {
                role: "system",
                content: MessageContent::Text(system.to_string()),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: MessageContent::Parts(vec![
                ContentPart::Text {
                    text: user_prompt.to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: data_url },
                },
            ]),
        });

        self.post_chat(&ChatRequest {
            model: model.unwrap_or(&self.model),
            messages,
        })
        .await
    }
}
