//! Image fetching and encoding shared by the backend adapters.
//!
//! Remote chat APIs do not accept raw URLs reliably, so every image is
//! fetched (or read from disk) client-side and shipped as base64.

use crate::{errors::ProviderError, types::ImageReference};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::header::USER_AGENT;
use reqwest::Client as ReqwestClient;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const FETCH_USER_AGENT: &str = "Mozilla/5.0";

/// Raw image bytes plus what we know about their type.
pub(crate) struct ImageBytes {
    pub bytes: Vec<u8>,
    /// `Content-Type` reported by the server, when fetched over HTTP.
    pub content_type: Option<String>,
    /// URL or path string, used for the extension fallback.
    pub name: String,
}

/// Fetches the referenced image, downloading URLs and reading local paths.
pub(crate) async fn fetch_bytes(
    client: &ReqwestClient,
    image: &ImageReference,
) -> Result<ImageBytes, ProviderError> {
    match image {
        ImageReference::Url(url) => {
            debug!("Downloading image from {url}");
            let response = client
                .get(url)
                .header(USER_AGENT, FETCH_USER_AGENT)
                .timeout(FETCH_TIMEOUT)
                .send()
                .await
                .map_err(|source| ProviderError::ImageFetch {
                    url: url.clone(),
                    source,
                })?;
            let status = response.status();
            if !status.is_success() {
                return Err(ProviderError::ImageStatus {
                    url: url.clone(),
                    status: status.as_u16(),
                });
            }
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let bytes = response
                .bytes()
                .await
                .map_err(|source| ProviderError::ImageFetch {
                    url: url.clone(),
                    source,
                })?;
            Ok(ImageBytes {
                bytes: bytes.to_vec(),
                content_type,
                name: url.clone(),
            })
        }
        ImageReference::LocalPath(path) => {
            let bytes =
                tokio::fs::read(path)
                    .await
                    .map_err(|source| ProviderError::ImageRead {
                        path: path.display().to_string(),
                        source,
                    })?;
            Ok(ImageBytes {
                bytes,
                content_type: None,
                name: path.display().to_string(),
            })
        }
    }
}

/// Fetches the image and encodes it as a `data:` URL for OpenAI-style
/// multimodal chat requests.
pub(crate) async fn fetch_data_url(
    client: &ReqwestClient,
    image: &ImageReference,
) -> Result<String, ProviderError> {
    let fetched = fetch_bytes(client, image).await?;
    let mime = mime_type_for(fetched.content_type.as_deref(), &fetched.name);
    Ok(format!("data:{mime};base64,{}", BASE64.encode(&fetched.bytes)))
}

/// Fetches the image as a bare base64 string (Ollama's wire format).
pub(crate) async fn fetch_base64(
    client: &ReqwestClient,
    image: &ImageReference,
) -> Result<String, ProviderError> {
    let fetched = fetch_bytes(client, image).await?;
    Ok(BASE64.encode(&fetched.bytes))
}

/// Two-tier MIME resolution: a `Content-Type` header naming an image type
/// wins; otherwise the filename extension decides, defaulting to JPEG.
pub(crate) fn mime_type_for(content_type: Option<&str>, name: &str) -> String {
    if let Some(ct) = content_type {
        if ct.contains("image/") {
            return ct.to_string();
        }
    }
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    }
    .to_string()
}
