use thiserror::Error;

/// Synchronous input problems surfaced inline next to the offending field.
/// They never block edits elsewhere.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{name}: not an image file ({mime_type})")]
    NotAnImage { name: String, mime_type: String },

    #[error("{name}: file is {size} bytes, limit is {limit} bytes")]
    FileTooLarge { name: String, size: u64, limit: u64 },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported video URL: {0}")]
    UnsupportedVideoUrl(String),

    #[error("could not extract a URL from the iframe code")]
    IframeWithoutSrc,
}
