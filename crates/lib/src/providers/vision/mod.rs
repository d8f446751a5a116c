pub mod local;
pub mod ollama;
pub mod openrouter;

use crate::{errors::ProviderError, types::ImageReference};
use async_trait::async_trait;
use dyn_clone::DynClone;
use std::fmt::Debug;

/// A trait for vision-capable model backends.
///
/// This defines a common interface for generating text from an image and a
/// prompt, whether the model runs behind a hosted gateway, a self-hosted
/// chat server, or in-process.
#[async_trait]
pub trait VisionProvider: Send + Sync + Debug + DynClone {
    /// Generates a text response for the given image and prompts.
    ///
    /// `model` overrides the provider's configured model for this call.
    async fn describe(
        &self,
        image: &ImageReference,
        user_prompt: &str,
        system_prompt: Option<&str>,
        model: Option<&str>,
    ) -> Result<String, ProviderError>;
}

dyn_clone::clone_trait_object!(VisionProvider);
