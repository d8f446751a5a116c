//! # Pipeline Orchestration
//!
//! Sequences the backend adapters, prompt templates, response parser, and
//! schema normalizer into the two named workflows:
//!
//! - **double**: one vision call produces alt text and caption jointly,
//!   then a text-only call extracts metadata from the caption. The text
//!   step always goes through the remote gateway; the other backends are
//!   not wired for text-only chat.
//! - **triple**: the same first step, then a vision call re-presents the
//!   image together with the caption for metadata extraction.
//!
//! Steps run strictly sequentially; a failure in step 1 aborts the
//! invocation and no partial output is returned.

use crate::{
    config::{self, Backend, ConfigError, PipelineConfig},
    errors::ProviderError,
    extract::{extract_json, ExtractError},
    normalize::normalize,
    prompts,
    providers::{vision::local::VlmLoader, ProviderFactory},
    types::{AltCaption, ImageReference, InputError, MetadataRecord, PipelineOutput},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Errors surfaced to the pipeline caller, labelled with the step that
/// failed.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("Alt/caption generation failed: {0}")]
    Caption(ProviderError),
    #[error("Alt text generation failed: {0}")]
    AltText(ProviderError),
    #[error("Metadata generation failed: {0}")]
    Metadata(ProviderError),
    #[error("Model did not return valid JSON for alt+caption: {0}")]
    MalformedCaption(ExtractError),
    #[error("Model did not return valid JSON for metadata: {0}")]
    MalformedMetadata(ExtractError),
    #[error("Mode must be 'double' or 'triple', got '{0}'")]
    UnknownMode(String),
}

/// The two multi-step workflows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// Metadata is extracted from the generated caption text only.
    #[default]
    Double,
    /// Metadata extraction re-presents the image alongside the caption.
    Triple,
}

impl FromStr for PipelineMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "double" => Ok(Self::Double),
            "triple" => Ok(Self::Triple),
            _ => Err(PipelineError::UnknownMode(s.to_string())),
        }
    }
}

/// Per-invocation options. Everything is optional; model and backend
/// overrides take precedence over a config file named by `config_path`,
/// which takes precedence over the configuration the pipeline was built
/// with.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    pub mode: PipelineMode,
    /// A precomputed dense caption; skips caption generation entirely.
    /// Alt text is still generated with a standalone vision call.
    pub caption_override: Option<String>,
    /// Config file merged at call time.
    pub config_path: Option<PathBuf>,
    pub caption_model: Option<String>,
    pub metadata_text_model: Option<String>,
    pub metadata_vision_model: Option<String>,
    pub caption_backend: Option<Backend>,
    pub metadata_vision_backend: Option<Backend>,
    pub local_vlm_id: Option<String>,
    /// Free text appended to the relevant user prompts to bias extraction.
    pub context: Option<String>,
    /// Whether `context` also applies to the caption-producing prompts.
    pub use_context_for_caption: bool,
    /// Word budget for alt text.
    pub max_alt_words: Option<usize>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            mode: PipelineMode::default(),
            caption_override: None,
            config_path: None,
            caption_model: None,
            metadata_text_model: None,
            metadata_vision_model: None,
            caption_backend: None,
            metadata_vision_backend: None,
            local_vlm_id: None,
            context: None,
            use_context_for_caption: true,
            max_alt_words: None,
        }
    }
}

/// A builder for creating [`MetadataPipeline`] instances.
#[derive(Default)]
pub struct MetadataPipelineBuilder {
    config: Option<PipelineConfig>,
    config_path: Option<PathBuf>,
    api_key: Option<String>,
    openrouter_url: Option<String>,
    retry: Option<(u32, Duration)>,
    vlm_loader: Option<Arc<dyn VlmLoader>>,
}

impl MetadataPipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses this configuration instead of loading one from disk.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Loads the startup configuration from this path.
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Sets the OpenRouter API key explicitly instead of reading
    /// `OPENROUTER_API_KEY`.
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Overrides the OpenRouter endpoint (used by tests).
    pub fn openrouter_url(mut self, url: impl Into<String>) -> Self {
        self.openrouter_url = Some(url.into());
        self
    }

    /// Tunes the remote gateway retry budget and base backoff delay.
    pub fn retry_policy(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.retry = Some((max_retries, retry_delay));
        self
    }

    /// Registers the loader for the local inference backend. Without one,
    /// selecting `backend = local` is a configuration error.
    pub fn vlm_loader(mut self, loader: Arc<dyn VlmLoader>) -> Self {
        self.vlm_loader = Some(loader);
        self
    }

    pub fn build(self) -> Result<MetadataPipeline, PipelineError> {
        let config = match self.config {
            Some(config) => config,
            None => PipelineConfig::load(self.config_path.as_deref())?,
        };
        info!(
            caption_backend = %config.caption_backend,
            metadata_vision_backend = %config.metadata_vision_backend,
            "Metadata pipeline ready"
        );
        Ok(MetadataPipeline {
            config,
            factory: ProviderFactory::new(
                self.api_key,
                self.openrouter_url,
                self.retry,
                self.vlm_loader,
            ),
        })
    }
}

/// The image understanding pipeline.
///
/// Holds an immutable configuration fixed at build time; concurrent
/// invocations share nothing mutable. Callers needing different settings
/// per request use [`PipelineOptions`] overrides or a call-time config
/// file, never in-place mutation.
#[derive(Clone)]
pub struct MetadataPipeline {
    config: PipelineConfig,
    factory: ProviderFactory,
}

impl std::fmt::Debug for MetadataPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataPipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MetadataPipeline {
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Resolves the effective configuration for one invocation: base
    /// config, then the call-time config file, then per-call overrides.
    fn resolve_config(&self, opts: &PipelineOptions) -> Result<PipelineConfig, PipelineError> {
        let mut cfg = match &opts.config_path {
            Some(path) => {
                let partial = config::read_partial(path)?;
                self.config.overlay(&partial)?
            }
            None => self.config.clone(),
        };
        if let Some(model) = &opts.caption_model {
            cfg.caption_model = model.clone();
        }
        if let Some(model) = &opts.metadata_text_model {
            cfg.metadata_text_model = model.clone();
        }
        if let Some(model) = &opts.metadata_vision_model {
            cfg.metadata_vision_model = model.clone();
        }
        if let Some(backend) = opts.caption_backend {
            cfg.caption_backend = backend;
        }
        if let Some(backend) = opts.metadata_vision_backend {
            cfg.metadata_vision_backend = backend;
        }
        if let Some(id) = &opts.local_vlm_id {
            cfg.local_vlm_id = id.clone();
        }
        Ok(cfg)
    }

    /// Runs the full pipeline and assembles the terminal record.
    pub async fn run(
        &self,
        image: &ImageReference,
        opts: &PipelineOptions,
    ) -> Result<PipelineOutput, PipelineError> {
        let cfg = self.resolve_config(opts)?;
        debug!(mode = ?opts.mode, image = %image, "Starting metadata pipeline");

        // A missing gateway credential must surface before any network
        // call, not as an auth error halfway through.
        let step1_remote = cfg.caption_backend == Backend::OpenRouter;
        let step2_remote = match opts.mode {
            PipelineMode::Double => true,
            PipelineMode::Triple => cfg.metadata_vision_backend == Backend::OpenRouter,
        };
        if step1_remote || step2_remote {
            if let Err(error) = self.factory.openrouter() {
                return Err(if step1_remote {
                    PipelineError::Caption(error)
                } else {
                    PipelineError::Metadata(error)
                });
            }
        }

        let (alt_text, caption) = match &opts.caption_override {
            Some(caption) => {
                info!("Caption override supplied, skipping caption generation");
                let alt_text = self.alt_text_with(&cfg, image, opts).await?;
                (alt_text, caption.clone())
            }
            None => {
                let pair = self.alt_and_caption_with(&cfg, image, opts).await?;
                (pair.alt_text, pair.caption)
            }
        };

        let metadata = match opts.mode {
            PipelineMode::Double => self.metadata_from_caption_with(&cfg, &caption).await?,
            PipelineMode::Triple => {
                self.structured_metadata_with(&cfg, image, &caption, opts.context.as_deref())
                    .await?
            }
        };

        Ok(PipelineOutput {
            alt_text,
            caption,
            metadata,
        })
    }

    /// Generates a one-sentence accessibility description.
    pub async fn alt_text(
        &self,
        image: &ImageReference,
        opts: &PipelineOptions,
    ) -> Result<String, PipelineError> {
        let cfg = self.resolve_config(opts)?;
        self.alt_text_with(&cfg, image, opts).await
    }

    /// Generates a multi-sentence factual caption.
    pub async fn dense_caption(
        &self,
        image: &ImageReference,
        opts: &PipelineOptions,
    ) -> Result<String, PipelineError> {
        let cfg = self.resolve_config(opts)?;
        let provider = self
            .factory
            .create(cfg.caption_backend, &cfg)
            .await
            .map_err(PipelineError::Caption)?;
        let user_prompt = self.caption_prompt(prompts::CAPTION_USER, opts);
        let raw = provider
            .describe(
                image,
                &user_prompt,
                Some(prompts::CAPTION_SYSTEM),
                Some(&cfg.caption_model),
            )
            .await
            .map_err(PipelineError::Caption)?;
        Ok(raw.trim().to_string())
    }

    /// Free-prompt captioning against the configured caption backend.
    pub async fn caption(
        &self,
        image: &ImageReference,
        prompt: Option<&str>,
        opts: &PipelineOptions,
    ) -> Result<String, PipelineError> {
        let cfg = self.resolve_config(opts)?;
        let provider = self
            .factory
            .create(cfg.caption_backend, &cfg)
            .await
            .map_err(PipelineError::Caption)?;
        let base = prompt.unwrap_or(prompts::DEFAULT_CAPTION_PROMPT);
        let user_prompt = prompts::with_context(base, opts.context.as_deref());
        let raw = provider
            .describe(image, &user_prompt, None, Some(&cfg.caption_model))
            .await
            .map_err(PipelineError::Caption)?;
        Ok(raw.trim().to_string())
    }

    /// Generates alt text and caption jointly in a single vision call.
    pub async fn alt_and_caption(
        &self,
        image: &ImageReference,
        opts: &PipelineOptions,
    ) -> Result<AltCaption, PipelineError> {
        let cfg = self.resolve_config(opts)?;
        self.alt_and_caption_with(&cfg, image, opts).await
    }

    /// Text-only metadata extraction from an existing caption.
    pub async fn metadata_from_caption(
        &self,
        caption: &str,
        opts: &PipelineOptions,
    ) -> Result<MetadataRecord, PipelineError> {
        let cfg = self.resolve_config(opts)?;
        self.metadata_from_caption_with(&cfg, caption).await
    }

    /// Vision-grounded metadata extraction from the image and a caption.
    pub async fn structured_metadata(
        &self,
        image: &ImageReference,
        caption: &str,
        opts: &PipelineOptions,
    ) -> Result<MetadataRecord, PipelineError> {
        let cfg = self.resolve_config(opts)?;
        self.structured_metadata_with(&cfg, image, caption, opts.context.as_deref())
            .await
    }

    fn caption_prompt(&self, base: &str, opts: &PipelineOptions) -> String {
        if opts.use_context_for_caption {
            prompts::with_context(base, opts.context.as_deref())
        } else {
            base.to_string()
        }
    }

    async fn alt_text_with(
        &self,
        cfg: &PipelineConfig,
        image: &ImageReference,
        opts: &PipelineOptions,
    ) -> Result<String, PipelineError> {
        let provider = self
            .factory
            .create(cfg.caption_backend, cfg)
            .await
            .map_err(PipelineError::AltText)?;
        let max_words = opts.max_alt_words.unwrap_or(prompts::DEFAULT_ALT_MAX_WORDS);
        let user_prompt = self.caption_prompt(&prompts::alt_user(max_words), opts);
        let raw = provider
            .describe(
                image,
                &user_prompt,
                Some(prompts::ALT_SYSTEM),
                Some(&cfg.caption_model),
            )
            .await
            .map_err(PipelineError::AltText)?;
        Ok(raw.trim().to_string())
    }

    async fn alt_and_caption_with(
        &self,
        cfg: &PipelineConfig,
        image: &ImageReference,
        opts: &PipelineOptions,
    ) -> Result<AltCaption, PipelineError> {
        let provider = self
            .factory
            .create(cfg.caption_backend, cfg)
            .await
            .map_err(PipelineError::Caption)?;
        let user_prompt = self.caption_prompt(prompts::AC_USER, opts);
        let raw = provider
            .describe(
                image,
                &user_prompt,
                Some(prompts::AC_SYSTEM),
                Some(&cfg.caption_model),
            )
            .await
            .map_err(PipelineError::Caption)?;
        let parsed = extract_json(&raw).map_err(PipelineError::MalformedCaption)?;
        Ok(AltCaption {
            alt_text: field_string(&parsed, "alt_text"),
            caption: field_string(&parsed, "caption"),
        })
    }

    async fn metadata_from_caption_with(
        &self,
        cfg: &PipelineConfig,
        caption: &str,
    ) -> Result<MetadataRecord, PipelineError> {
        let gateway = self.factory.openrouter().map_err(PipelineError::Metadata)?;
        let raw = gateway
            .chat(
                prompts::STRUCTURED_TEXT_SYSTEM,
                &prompts::structured_text_user(caption),
                Some(&cfg.metadata_text_model),
            )
            .await
            .map_err(PipelineError::Metadata)?;
        let parsed = extract_json(&raw).map_err(PipelineError::MalformedMetadata)?;
        Ok(normalize(parsed))
    }

    async fn structured_metadata_with(
        &self,
        cfg: &PipelineConfig,
        image: &ImageReference,
        caption: &str,
        context: Option<&str>,
    ) -> Result<MetadataRecord, PipelineError> {
        let provider = self
            .factory
            .create(cfg.metadata_vision_backend, cfg)
            .await
            .map_err(PipelineError::Metadata)?;
        // Context always biases vision-grounded extraction.
        let user_prompt = prompts::with_context(&prompts::structured_user(caption), context);
        let raw = provider
            .describe(
                image,
                &user_prompt,
                Some(prompts::STRUCTURED_SYSTEM),
                Some(&cfg.metadata_vision_model),
            )
            .await
            .map_err(PipelineError::Metadata)?;
        let parsed = extract_json(&raw).map_err(PipelineError::MalformedMetadata)?;
        Ok(normalize(parsed))
    }
}

fn field_string(parsed: &Value, key: &str) -> String {
    parsed
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string()
}
