//! # Backend Provider Factory
//!
//! Centralizes construction of vision providers from the closed [`Backend`]
//! enum and merged configuration, so the orchestrator selects a backend
//! once per step and never re-inspects identifier strings. The factory also
//! owns the one expensive resource in the system: local models are loaded
//! once per model id and shared across calls.

use crate::{
    config::{Backend, PipelineConfig},
    errors::ProviderError,
    providers::vision::{
        local::{LocalProvider, VlmLoader},
        ollama::OllamaProvider,
        openrouter::OpenRouterProvider,
        VisionProvider,
    },
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Clone)]
pub struct ProviderFactory {
    api_key: Option<String>,
    openrouter_url: Option<String>,
    retry: Option<(u32, Duration)>,
    vlm_loader: Option<Arc<dyn VlmLoader>>,
    local_models: Arc<Mutex<HashMap<String, LocalProvider>>>,
}

impl ProviderFactory {
    pub fn new(
        api_key: Option<String>,
        openrouter_url: Option<String>,
        retry: Option<(u32, Duration)>,
        vlm_loader: Option<Arc<dyn VlmLoader>>,
    ) -> Self {
        Self {
            api_key,
            openrouter_url,
            retry,
            vlm_loader,
            local_models: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Builds the remote gateway client. Fails when no API key is
    /// available, before any network traffic.
    pub fn openrouter(&self) -> Result<OpenRouterProvider, ProviderError> {
        let mut provider = OpenRouterProvider::new(self.api_key.clone())?;
        if let Some(url) = &self.openrouter_url {
            provider = provider.with_api_url(url.clone());
        }
        if let Some((max_retries, delay)) = self.retry {
            provider = provider.with_retry(max_retries, delay);
        }
        Ok(provider)
    }

    /// Builds the provider for one pipeline step.
    pub async fn create(
        &self,
        backend: Backend,
        config: &PipelineConfig,
    ) -> Result<Box<dyn VisionProvider>, ProviderError> {
        match backend {
            Backend::OpenRouter => Ok(Box::new(self.openrouter()?)),
            Backend::Ollama => Ok(Box::new(OllamaProvider::new(&config.ollama_host, None)?)),
            Backend::Local => {
                let loader = self.vlm_loader.as_ref().ok_or_else(|| {
                    ProviderError::LocalUnavailable(
                        "no local VLM loader is registered; register one on the pipeline builder"
                            .to_string(),
                    )
                })?;
                let model_id = config.local_vlm_id.clone();
                let mut cache = self.local_models.lock().await;
                if let Some(provider) = cache.get(&model_id) {
                    return Ok(Box::new(provider.clone()));
                }
                let provider = LocalProvider::load(loader.as_ref(), &model_id)?;
                info!("Local vision model '{model_id}' ready");
                cache.insert(model_id, provider.clone());
                Ok(Box::new(provider))
            }
        }
    }
}
