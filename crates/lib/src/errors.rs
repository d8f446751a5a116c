use thiserror::Error;

/// Errors produced by the model backend adapters.
///
/// Every adapter call returns `Result<String, ProviderError>`: the `Ok`
/// side carries the generated text, the `Err` side a human-readable cause.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Failed to build Reqwest client: {0}")]
    ClientBuild(reqwest::Error),
    #[error("Failed to send request to model backend: {0}")]
    Request(reqwest::Error),
    #[error("Model backend returned HTTP {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Failed to deserialize model backend response: {0}")]
    Deserialization(reqwest::Error),
    #[error("OpenRouter API key not found. Set OPENROUTER_API_KEY or pass a key explicitly.")]
    MissingApiKey,
    #[error("A model id is required for the {0} backend but none is configured")]
    MissingModel(String),
    #[error("Local backend not available: {0}")]
    LocalUnavailable(String),
    #[error("Local model generation failed: {0}")]
    LocalGeneration(String),
    #[error("Failed to read image from {path}: {source}")]
    ImageRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to download image from {url}: {source}")]
    ImageFetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Image download from {url} returned HTTP {status}")]
    ImageStatus { url: String, status: u16 },
}
