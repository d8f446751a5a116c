use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The normalized metadata object produced by [`crate::normalize::normalize`].
pub type MetadataRecord = serde_json::Map<String, serde_json::Value>;

/// Errors for malformed caller input.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum InputError {
    #[error("Provide either an image URL or a local file path")]
    MissingImage,
    #[error("Provide only one of image URL or local file path, not both")]
    AmbiguousImage,
}

/// A reference to the image under analysis.
///
/// Constructed fresh per request and discarded after use. Remote backends
/// fetch and re-encode the referenced bytes client-side, so both variants
/// behave identically from the caller's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference {
    Url(String),
    LocalPath(PathBuf),
}

impl ImageReference {
    /// Builds a reference from the optional URL/path pair used by tool-style
    /// callers. Exactly one of the two must be present.
    pub fn from_parts(url: Option<String>, path: Option<PathBuf>) -> Result<Self, InputError> {
        match (url, path) {
            (Some(_), Some(_)) => Err(InputError::AmbiguousImage),
            (Some(url), None) => Ok(Self::Url(url)),
            (None, Some(path)) => Ok(Self::LocalPath(path)),
            (None, None) => Err(InputError::MissingImage),
        }
    }

    /// Interprets a raw string as a URL when it has an http(s) scheme, and as
    /// a local path otherwise.
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            Self::Url(raw.to_string())
        } else {
            Self::LocalPath(PathBuf::from(raw))
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => write!(f, "{url}"),
            Self::LocalPath(path) => write!(f, "{}", path.display()),
        }
    }
}

/// The joint result of the combined alt-text + caption generation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AltCaption {
    pub alt_text: String,
    pub caption: String,
}

/// The terminal artifact of both pipeline modes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub alt_text: String,
    pub caption: String,
    pub metadata: MetadataRecord,
}
