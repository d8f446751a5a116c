use crate::{
    errors::ProviderError, image, providers::vision::VisionProvider, types::ImageReference,
};
use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// An opaque, already-loaded vision-language model.
///
/// Generation is synchronous on-device compute, bounded only by output
/// length. Implementations live outside this crate; the pipeline only
/// cares that an image and a prompt turn into text.
pub trait VlmEngine: Send + Sync {
    fn model_id(&self) -> &str;
    fn generate(&mut self, image: &[u8], prompt: &str) -> Result<String, ProviderError>;
}

/// Loads a [`VlmEngine`] into memory. Registered once on the pipeline
/// builder; loading is expensive and a load failure is fatal for the
/// provider instance being constructed.
pub trait VlmLoader: Send + Sync {
    fn load(&self, model_id: &str) -> Result<Box<dyn VlmEngine>, ProviderError>;
}

/// Adapter over an in-process vision-language model.
///
/// The engine is loaded once at construction and reused for every call;
/// concurrent generation against the single loaded model is serialized
/// through a mutex. A per-call model override cannot swap an in-memory
/// model and is ignored with a warning. The system prompt, when present,
/// is folded into the user prompt since local engines take a single
/// prompt string.
#[derive(Clone)]
pub struct LocalProvider {
    client: ReqwestClient,
    engine: Arc<Mutex<Box<dyn VlmEngine>>>,
    model_id: String,
}

impl fmt::Debug for LocalProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalProvider")
            .field("model_id", &self.model_id)
            .finish_non_exhaustive()
    }
}

impl LocalProvider {
    pub fn load(loader: &dyn VlmLoader, model_id: &str) -> Result<Self, ProviderError> {
        let client = ReqwestClient::builder()
            .build()
            .map_err(ProviderError::ClientBuild)?;
        info!("Loading local vision model '{model_id}'");
        let engine = loader.load(model_id)?;
        Ok(Self {
            client,
            engine: Arc::new(Mutex::new(engine)),
            model_id: model_id.to_string(),
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[async_trait]
impl VisionProvider for LocalProvider {
    async fn describe(
        &self,
        image: &ImageReference,
        user_prompt: &str,
        system_prompt: Option<&str>,
        model: Option<&str>,
    ) -> Result<String, ProviderError> {
        if let Some(requested) = model {
            if requested != self.model_id {
                warn!(
                    "Local backend has '{}' loaded; ignoring per-call model '{requested}'",
                    self.model_id
                );
            }
        }
        let prompt = match system_prompt {
            Some(system) => format!("{system}\n\n{user_prompt}"),
            None => user_prompt.to_string(),
        };
        let fetched = image::fetch_bytes(&self.client, image).await?;
        let mut engine = self.engine.lock().await;
        let output = engine.generate(&fetched.bytes, &prompt)?;
        Ok(output.trim().to_string())
    }
}
