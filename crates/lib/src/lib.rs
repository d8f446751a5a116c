//! # imagemeta
//!
//! Image understanding built on multimodal LLM backends: alt text, dense
//! captions, and structured metadata records, extracted by orchestrating a
//! hosted gateway (OpenRouter), a self-hosted chat server (Ollama), or an
//! in-process vision-language model behind one provider interface.
//!
//! The interesting part is not the HTTP plumbing but the back half: model
//! output is untrusted, semi-structured text, so every structured step runs
//! through an ordered-fallback JSON parser ([`extract_json`]) and a total,
//! idempotent schema normalizer ([`normalize`]) before anything reaches the
//! caller.

pub mod config;
pub mod errors;
pub mod extract;
mod image;
pub mod normalize;
pub mod pipeline;
pub mod prompts;
pub mod providers;
pub mod types;

pub use config::{Backend, ConfigError, PipelineConfig};
pub use errors::ProviderError;
pub use extract::{extract_json, ExtractError};
pub use normalize::{clamp, normalize};
pub use pipeline::{
    MetadataPipeline, MetadataPipelineBuilder, PipelineError, PipelineMode, PipelineOptions,
};
pub use types::{AltCaption, ImageReference, InputError, MetadataRecord, PipelineOutput};
